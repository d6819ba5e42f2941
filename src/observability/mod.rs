//! Observability for the device client
//!
//! Structured logging through `tracing`, with span macros for the
//! provisioning exchange and the operational event loop.

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};

// Span macros for structured logging
pub use logging::{mqtt_span, provision_span, session_span};

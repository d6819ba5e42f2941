//! Wire formats and topic layout for the Connio MQTT API
//!
//! This module implements the payloads exchanged with the platform during
//! provisioning and operation, and the topics they travel on.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;

//! Testing utilities and mock implementations
//!
//! This module provides an in-memory broker for exercising provisioning and
//! operational sessions without a real MQTT broker.

pub mod mocks;

pub use mocks::*;

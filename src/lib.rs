//! Connio device client - Rust Implementation
//!
//! A reference client that connects one IoT device to the Connio platform
//! over MQTT.
//!
//! # Overview
//!
//! This crate provides:
//! - Runtime provisioning: trading a claim (such as a serial number) for
//!   operational credentials
//! - Operational sessions with a single inbound channel that separates
//!   configuration pushes from other messages
//! - A periodic telemetry workload driven by the current configuration
//! - An MQTT transport on rumqttc, behind traits that tests replace with
//!   an in-memory broker
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use connio_device::protocol::TopicBuilder;
//! use connio_device::session::{ClaimDescriptor, DeviceSession};
//! use connio_device::transport::{ConnectionParameters, MqttTransport};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = DeviceSession::new(MqttTransport::new(), TopicBuilder::default());
//!
//! let provisioning = ConnectionParameters::from_broker_url(
//!     "mqtt://mqtt.connio.cloud:1883",
//!     "provision-key-id",
//!     "provision-key-secret",
//! )?;
//! let identity = session
//!     .provision(
//!         provisioning.clone(),
//!         &ClaimDescriptor::serial_number("SN-0001"),
//!         Some("config"),
//!         Duration::from_secs(10),
//!         Duration::from_secs(60),
//!     )
//!     .await?;
//!
//! let operational = identity.connection_parameters(&provisioning);
//! println!("Provisioned as {}", operational.client_id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod testing;
pub mod transport;

pub use config::{Bootstrap, ConfigError, DeviceConfig};
pub use error::{DeviceError, DeviceResult};
pub use session::{
    ClaimDescriptor, ClaimType, ConfigSnapshot, ConfigStore, Connection, ConnectionHandle,
    DeviceSession, IssuedIdentity, ProvisionError, SessionContext, SessionError, SessionHandler,
};
pub use telemetry::{DataPublisher, Reading, TelemetryLoop};
pub use transport::{ConnectionParameters, MqttError, MqttTransport};

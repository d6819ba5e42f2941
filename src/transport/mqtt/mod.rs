//! MQTT 3.1.1 transport backed by rumqttc
//!
//! This module separates pure functions from I/O operations for better
//! testability:
//!
//! - [`connection`] - Pure connection parameters, errors and option building
//! - [`message_handler`] - Pure event reduction, payload decoding and message routing
//! - [`client`] - Impure I/O against `rumqttc::AsyncClient` / `rumqttc::EventLoop`
//!
//! # Usage
//!
//! ```rust,no_run
//! use connio_device::transport::mqtt::{ConnectionParameters, RumqttcConnector};
//! use connio_device::transport::{Connector, QoS, SessionClient, SessionEvents};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let params = ConnectionParameters::from_broker_url("mqtt://localhost:1883", "key-id", "secret")?;
//! let (client, mut events) = RumqttcConnector::new().open(&params, Duration::from_secs(30))?;
//! client.subscribe("connio/data/in/devices/my-device/#", QoS::AtMostOnce).await?;
//! let event = events.next_event().await?;
//! println!("{event:?}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

// Re-export public types for convenience
pub use client::{RumqttcClient, RumqttcConnector, RumqttcEvents};
pub use connection::{
    configure_mqtt_options, connack_description, random_client_id, ConnectionParameters,
    MqttError,
};
pub use message_handler::{MessageHandler, MessageRoute};

//! Transport layer for device sessions
//!
//! This module provides the session abstraction the provisioning coordinator
//! and the device session manager are written against, plus the rumqttc-backed
//! MQTT implementation.
//!
//! A session is split in two halves, mirroring `rumqttc::AsyncClient` /
//! `rumqttc::EventLoop`:
//!
//! - [`SessionClient`] issues requests (publish, subscribe, unsubscribe, disconnect)
//!   and is cheap to clone across tasks.
//! - [`SessionEvents`] yields acknowledgements and inbound messages in broker order.
//!
//! A [`Connector`] opens both halves from [`ConnectionParameters`].

use bytes::Bytes;
use std::time::Duration;

pub mod mqtt;

pub use mqtt::{ConnectionParameters, MqttError};
pub use rumqttc::QoS;

/// Session event, already reduced from the wire packet to what callers act on
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Connection accepted by the broker
    Connected { session_present: bool },
    /// Subscribe acknowledged; `None` marks a rejected topic filter
    Subscribed {
        packet_id: u16,
        granted: Vec<Option<u8>>,
    },
    /// Publish handed to the broker (QoS 0) or acknowledged (QoS 1)
    Published { packet_id: u16 },
    /// Inbound message on a subscribed topic
    Message { topic: String, payload: Bytes },
    /// Session ended, either by the broker or by our own disconnect
    Disconnected { reason: String },
    /// Keep-alive traffic and other packets nobody dispatches on
    Other(String),
}

/// Request half of a session
#[async_trait::async_trait]
pub trait SessionClient: Clone + Send + Sync + 'static {
    /// Publish `payload` to `topic`
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError>;

    /// Subscribe to a topic filter
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError>;

    /// Remove a subscription
    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError>;

    /// Request a clean disconnect; the event half reports `Disconnected` once it is sent
    async fn disconnect(&self) -> Result<(), MqttError>;
}

/// Event half of a session
#[async_trait::async_trait]
pub trait SessionEvents: Send + 'static {
    /// Drive the session until the next event.
    ///
    /// Errors other than [`MqttError::SessionClosed`] are transient: polling
    /// again lets the transport reconnect.
    async fn next_event(&mut self) -> Result<SessionEvent, MqttError>;
}

/// Opens transport sessions
pub trait Connector: Send + Sync {
    type Client: SessionClient;
    type Events: SessionEvents;

    /// Create a session for `params`. Connecting happens lazily on the first poll.
    fn open(
        &self,
        params: &ConnectionParameters,
        keep_alive: Duration,
    ) -> Result<(Self::Client, Self::Events), MqttError>;
}

/// Type alias for the rumqttc transport
pub type MqttTransport = mqtt::RumqttcConnector;

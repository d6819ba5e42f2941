//! Impure I/O operations for the MQTT transport
//!
//! This module wires the [`Connector`], [`SessionClient`] and [`SessionEvents`]
//! seams to `rumqttc::AsyncClient` and `rumqttc::EventLoop`.

use super::connection::{configure_mqtt_options, connack_description, ConnectionParameters, MqttError};
use super::message_handler::MessageHandler;
use crate::transport::{Connector, SessionClient, SessionEvent, SessionEvents};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop, QoS};
use std::time::Duration;
use tracing::{debug, Instrument};

/// Request queue depth between the client handle and the event loop
const DEFAULT_CHANNEL_CAPACITY: usize = 10;

/// Opens rumqttc sessions
#[derive(Debug, Clone)]
pub struct RumqttcConnector {
    channel_capacity: usize,
}

impl RumqttcConnector {
    pub fn new() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

impl Default for RumqttcConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for RumqttcConnector {
    type Client = RumqttcClient;
    type Events = RumqttcEvents;

    fn open(
        &self,
        params: &ConnectionParameters,
        keep_alive: Duration,
    ) -> Result<(Self::Client, Self::Events), MqttError> {
        let mqtt_options = configure_mqtt_options(params, keep_alive)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, self.channel_capacity);

        debug!(
            client_id = %params.client_id,
            host = %params.host,
            port = params.port,
            tls = params.tls,
            "Opened MQTT session"
        );

        Ok((RumqttcClient { client }, RumqttcEvents { event_loop }))
    }
}

/// Request half backed by `rumqttc::AsyncClient`
#[derive(Clone)]
pub struct RumqttcClient {
    client: AsyncClient,
}

impl RumqttcClient {
    /// Underlying rumqttc client
    pub fn inner(&self) -> &AsyncClient {
        &self.client
    }
}

#[async_trait]
impl SessionClient for RumqttcClient {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.client
            .publish(topic, qos, retain, payload)
            .instrument(crate::mqtt_span!(operation = "publish", topic = %topic))
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.client
            .subscribe(topic, qos)
            .instrument(crate::mqtt_span!(operation = "subscribe", topic = %topic))
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| MqttError::UnsubscribeFailed(Box::new(e)))
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| MqttError::DisconnectFailed(Box::new(e)))
    }
}

/// Event half backed by `rumqttc::EventLoop`
pub struct RumqttcEvents {
    event_loop: EventLoop,
}

#[async_trait]
impl SessionEvents for RumqttcEvents {
    async fn next_event(&mut self) -> Result<SessionEvent, MqttError> {
        match self.event_loop.poll().await {
            Ok(event) => Ok(MessageHandler::route_mqtt_event(&event)),
            Err(ConnectionError::ConnectionRefused(code)) => {
                Err(MqttError::ConnectionRefused(connack_description(code)))
            }
            Err(e) => Err(MqttError::ConnectionFailed(Box::new(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_does_not_connect() {
        // Connecting is lazy: opening against an unreachable broker still succeeds
        let connector = RumqttcConnector::new();
        let params = ConnectionParameters::new("localhost", 1, "user", "pass");
        let result = connector.open(&params, Duration::from_secs(30));
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_open_rejects_empty_client_id() {
        let connector = RumqttcConnector::new();
        let params = ConnectionParameters::new("localhost", 1883, "user", "pass").with_client_id("");
        let result = connector.open(&params, Duration::from_secs(30));
        assert!(matches!(result, Err(MqttError::InvalidClientId(_))));
    }

    #[tokio::test]
    async fn test_requests_queue_before_connect() {
        let connector = RumqttcConnector::new();
        let params = ConnectionParameters::new("localhost", 1, "user", "pass");
        let (client, _events) = connector.open(&params, Duration::from_secs(30)).unwrap();

        // Requests sit in the channel until the event loop is polled
        client
            .subscribe("connio/provisions/test", QoS::AtMostOnce)
            .await
            .unwrap();
        client
            .publish("connio/provisions", b"{}".to_vec(), QoS::AtMostOnce, false)
            .await
            .unwrap();
    }

    #[test]
    fn test_channel_capacity_floor() {
        let connector = RumqttcConnector::new().with_channel_capacity(0);
        assert_eq!(connector.channel_capacity, 1);
    }
}

//! Pure message routing and decoding logic for MQTT events
//!
//! This module contains pure functions for reducing rumqttc events to
//! [`SessionEvent`]s, decoding inbound payloads and deciding whether an
//! inbound message is a configuration push or a generic message.

use super::connection::connack_description;
use crate::protocol::topics::property_of;
use crate::transport::SessionEvent;
use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet, QoS, SubscribeReasonCode};
use serde_json::Value;

/// Pure message routing decisions for device sessions
pub struct MessageHandler;

impl MessageHandler {
    /// Reduce a rumqttc event to the session event callers dispatch on (pure function)
    pub fn route_mqtt_event(event: &Event) -> SessionEvent {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match connack.code {
                    ConnectReturnCode::Success => SessionEvent::Connected {
                        session_present: connack.session_present,
                    },
                    code => SessionEvent::Disconnected {
                        reason: connack_description(code).to_string(),
                    },
                },
                Packet::Publish(publish) => SessionEvent::Message {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                },
                Packet::SubAck(suback) => SessionEvent::Subscribed {
                    packet_id: suback.pkid,
                    granted: suback
                        .return_codes
                        .iter()
                        .map(|code| match code {
                            SubscribeReasonCode::Success(qos) => Some(qos_level(*qos)),
                            SubscribeReasonCode::Failure => None,
                        })
                        .collect(),
                },
                Packet::PubAck(puback) => SessionEvent::Published {
                    packet_id: puback.pkid,
                },
                Packet::Disconnect => SessionEvent::Disconnected {
                    reason: "Broker closed the session".to_string(),
                },
                other => SessionEvent::Other(format!("{other:?}")),
            },
            // QoS 0 publishes carry packet id 0 and are never acknowledged
            Event::Outgoing(Outgoing::Publish(0)) => SessionEvent::Published { packet_id: 0 },
            Event::Outgoing(Outgoing::Disconnect) => SessionEvent::Disconnected {
                reason: "Client disconnected".to_string(),
            },
            Event::Outgoing(other) => SessionEvent::Other(format!("{other:?}")),
        }
    }

    /// Decode an inbound payload as JSON (pure function)
    pub fn decode_payload(payload: &[u8]) -> Result<Value, String> {
        serde_json::from_slice(payload).map_err(|e| format!("Invalid JSON payload: {e}"))
    }

    /// Decide where an inbound message goes (pure function)
    ///
    /// A message is a configuration push only when a config property name was
    /// recorded, the topic's trailing segment equals it, and somebody listens
    /// for configuration updates.
    pub fn route_message(
        topic: &str,
        config_property: Option<&str>,
        accepts_config_updates: bool,
    ) -> MessageRoute {
        match config_property {
            Some(name) if accepts_config_updates && property_of(topic) == name => {
                MessageRoute::ConfigUpdate
            }
            _ => MessageRoute::Message,
        }
    }

    /// Validate subscription success from SubAck grants (pure function)
    pub fn validate_subscription_success(granted: &[Option<u8>]) -> Result<(), String> {
        if granted.is_empty() || granted.iter().any(Option::is_none) {
            Err(format!("Subscription rejected with grants: {granted:?}"))
        } else {
            Ok(())
        }
    }
}

/// Routing decision for an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRoute {
    /// Replace the configuration snapshot
    ConfigUpdate,
    /// Hand to the generic message callback
    Message,
}

/// Numeric QoS level as it appears on the wire
pub fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

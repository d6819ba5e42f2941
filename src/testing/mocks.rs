//! Mock implementations for testing
//!
//! [`MockBroker`] implements [`Connector`] in memory. It records every
//! request, acknowledges subscriptions and publishes like a broker would,
//! answers claims published to the provisioning topic with canned replies,
//! and counts claims published before their subscription was acknowledged.

use crate::transport::mqtt::message_handler::qos_level;
use crate::transport::{
    ConnectionParameters, Connector, MqttError, QoS, SessionClient, SessionEvent, SessionEvents,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

type EventSender = mpsc::UnboundedSender<Result<SessionEvent, MqttError>>;
type EventReceiver = mpsc::UnboundedReceiver<Result<SessionEvent, MqttError>>;

/// Request recorded by the mock broker
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Open {
        client_id: String,
        username: String,
    },
    Subscribe {
        client_id: String,
        topic: String,
        qos: QoS,
    },
    Unsubscribe {
        client_id: String,
        topic: String,
    },
    Publish {
        client_id: String,
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    },
    Disconnect {
        client_id: String,
    },
}

/// How the mock broker behaves
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Acknowledge connections; otherwise the first poll reports a refusal
    pub accept_connections: bool,
    /// Grant subscriptions; otherwise acknowledge them with a failure code
    pub grant_subscriptions: bool,
    /// Topic devices publish claims to
    pub provision_topic: String,
    /// Replies sent to `<provision_topic>/<clientId>` for each claim, in order
    pub provision_replies: Vec<Vec<u8>>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            accept_connections: true,
            grant_subscriptions: true,
            provision_topic: "connio/provisions".to_string(),
            provision_replies: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct MockSession {
    client_id: String,
    tx: Option<EventSender>,
    subscriptions: Vec<String>,
    suback_delivered: bool,
    events_closed: bool,
    next_packet_id: u16,
}

impl MockSession {
    fn push(&self, event: Result<SessionEvent, MqttError>) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(event).is_ok())
    }

    fn packet_id(&mut self) -> u16 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
        self.next_packet_id
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    behavior: MockBehavior,
    calls: Vec<MockCall>,
    sessions: Vec<MockSession>,
    ordering_violations: usize,
}

/// In-memory broker for tests
#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        let broker = Self::default();
        broker.lock().behavior = behavior;
        broker
    }

    /// Broker that answers every claim with `reply`
    pub fn with_provision_reply(reply: impl Into<Vec<u8>>) -> Self {
        Self::with_behavior(MockBehavior {
            provision_replies: vec![reply.into()],
            ..Default::default()
        })
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// `(topic, payload)` of every publish, in order
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Publish { topic, payload, .. } => Some((topic.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn subscribe_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Subscribe { .. }))
    }

    pub fn publish_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Publish { .. }))
    }

    pub fn disconnect_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Disconnect { .. }))
    }

    fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Claims published before the claiming session saw its subscribe acknowledgement
    pub fn ordering_violations(&self) -> usize {
        self.lock().ordering_violations
    }

    /// Client ids of every opened session, in order
    pub fn sessions_opened(&self) -> Vec<String> {
        self.lock()
            .sessions
            .iter()
            .map(|session| session.client_id.clone())
            .collect()
    }

    /// Whether the event half of session `index` has been dropped
    pub fn events_closed(&self, index: usize) -> bool {
        self.lock()
            .sessions
            .get(index)
            .is_some_and(|session| session.events_closed)
    }

    /// Deliver a message to the most recently opened session
    pub fn inject_message(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        self.inject(Ok(SessionEvent::Message {
            topic: topic.to_string(),
            payload: Bytes::from(payload.into()),
        }))
    }

    /// Deliver an arbitrary event or error to the most recently opened session
    pub fn inject(&self, event: Result<SessionEvent, MqttError>) -> bool {
        self.lock()
            .sessions
            .last()
            .is_some_and(|session| session.push(event))
    }

    /// Simulate a broker-side reconnect of the most recent session
    pub fn reconnect(&self) -> bool {
        let mut state = self.lock();
        let Some(session) = state.sessions.last_mut() else {
            return false;
        };
        session.subscriptions.clear();
        session.suback_delivered = false;
        session.push(Err(MqttError::ConnectionFailed("connection reset".into())))
            && session.push(Ok(SessionEvent::Connected {
                session_present: false,
            }))
    }

    /// End the event stream of the most recent session
    pub fn close_session(&self) {
        if let Some(session) = self.lock().sessions.last_mut() {
            session.tx = None;
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut BrokerState) -> T) -> T {
        f(&mut self.lock())
    }
}

impl Connector for MockBroker {
    type Client = MockClient;
    type Events = MockEvents;

    fn open(
        &self,
        params: &ConnectionParameters,
        _keep_alive: Duration,
    ) -> Result<(Self::Client, Self::Events), MqttError> {
        if params.client_id.is_empty() {
            return Err(MqttError::InvalidClientId(params.client_id.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();

        state.calls.push(MockCall::Open {
            client_id: params.client_id.clone(),
            username: params.username.clone(),
        });

        let first_event = if state.behavior.accept_connections {
            Ok(SessionEvent::Connected {
                session_present: false,
            })
        } else {
            Err(MqttError::ConnectionRefused(
                "Connection Refused: not authorised.",
            ))
        };
        let _ = tx.send(first_event);

        let index = state.sessions.len();
        state.sessions.push(MockSession {
            client_id: params.client_id.clone(),
            tx: Some(tx),
            subscriptions: Vec::new(),
            suback_delivered: false,
            events_closed: false,
            next_packet_id: 0,
        });

        Ok((
            MockClient {
                broker: self.clone(),
                index,
                client_id: params.client_id.clone(),
            },
            MockEvents {
                broker: self.clone(),
                index,
                rx,
            },
        ))
    }
}

/// Request half of a mock session
#[derive(Debug, Clone)]
pub struct MockClient {
    broker: MockBroker,
    index: usize,
    client_id: String,
}

#[async_trait]
impl SessionClient for MockClient {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.broker.with_state(|state| {
            let index = self.index;
            state.calls.push(MockCall::Publish {
                client_id: self.client_id.clone(),
                topic: topic.to_string(),
                payload: payload.clone(),
                qos,
                retain,
            });

            let is_claim = topic == state.behavior.provision_topic;
            let response_topic = format!("{}/{}", state.behavior.provision_topic, self.client_id);
            let replies = state.behavior.provision_replies.clone();
            if is_claim && !state.sessions[index].suback_delivered {
                state.ordering_violations += 1;
            }

            let session = &mut state.sessions[index];
            let packet_id = match qos {
                QoS::AtMostOnce => 0,
                _ => session.packet_id(),
            };
            if !session.push(Ok(SessionEvent::Published { packet_id })) {
                return Err(MqttError::SessionClosed);
            }

            if is_claim && session.subscriptions.contains(&response_topic) {
                for reply in replies {
                    session.push(Ok(SessionEvent::Message {
                        topic: response_topic.clone(),
                        payload: Bytes::from(reply),
                    }));
                }
            }

            Ok(())
        })
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.broker.with_state(|state| {
            let index = self.index;
            state.calls.push(MockCall::Subscribe {
                client_id: self.client_id.clone(),
                topic: topic.to_string(),
                qos,
            });

            let granted = state.behavior.grant_subscriptions;
            let session = &mut state.sessions[index];
            if granted {
                session.subscriptions.push(topic.to_string());
            }

            let packet_id = session.packet_id();
            let pushed = session.push(Ok(SessionEvent::Subscribed {
                packet_id,
                granted: vec![granted.then(|| qos_level(qos))],
            }));

            if pushed {
                Ok(())
            } else {
                Err(MqttError::SessionClosed)
            }
        })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.broker.with_state(|state| {
            let index = self.index;
            state.calls.push(MockCall::Unsubscribe {
                client_id: self.client_id.clone(),
                topic: topic.to_string(),
            });
            state.sessions[index].subscriptions.retain(|t| t != topic);
            Ok(())
        })
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        self.broker.with_state(|state| {
            let index = self.index;
            state.calls.push(MockCall::Disconnect {
                client_id: self.client_id.clone(),
            });

            let pushed = state.sessions[index].push(Ok(SessionEvent::Disconnected {
                reason: "Client disconnected".to_string(),
            }));

            if pushed {
                Ok(())
            } else {
                Err(MqttError::SessionClosed)
            }
        })
    }
}

/// Event half of a mock session
#[derive(Debug)]
pub struct MockEvents {
    broker: MockBroker,
    index: usize,
    rx: EventReceiver,
}

#[async_trait]
impl SessionEvents for MockEvents {
    async fn next_event(&mut self) -> Result<SessionEvent, MqttError> {
        match self.rx.recv().await {
            Some(Ok(SessionEvent::Subscribed { packet_id, granted })) => {
                let index = self.index;
                self.broker.with_state(|state| {
                    state.sessions[index].suback_delivered = true;
                });
                Ok(SessionEvent::Subscribed { packet_id, granted })
            }
            Some(event) => event,
            None => Err(MqttError::SessionClosed),
        }
    }
}

impl Drop for MockEvents {
    fn drop(&mut self) {
        let index = self.index;
        self.broker.with_state(|state| {
            if let Some(session) = state.sessions.get_mut(index) {
                session.events_closed = true;
            }
        });
    }
}

//! Active operational connection and its event loop
//!
//! [`ConnectionHandle`] is a thin pass-through to the transport that any task
//! may clone. [`Connection::run_loop`] drives inbound events on a background
//! task while a workload runs on the caller's task, and stops the background
//! task on every exit path.

use super::config_store::ConfigSnapshot;
use super::error::SessionError;
use super::handler::{SessionContext, SessionHandler};
use crate::transport::mqtt::{connack_description, MessageHandler, MessageRoute};
use crate::transport::{MqttError, QoS, SessionClient, SessionEvent, SessionEvents};
use bytes::Bytes;
use rumqttc::ConnectReturnCode;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn, Instrument};

/// How long `run_loop` waits for the event task to observe the disconnect
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Cloneable request handle for one session
#[derive(Debug, Clone)]
pub struct ConnectionHandle<C> {
    client: C,
}

impl<C: SessionClient> ConnectionHandle<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Publish at QoS 0 without retain
    pub async fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<(), MqttError> {
        self.client
            .publish(topic, payload.into(), QoS::AtMostOnce, false)
            .await
    }

    pub async fn publish_with(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.client.publish(topic, payload.into(), qos, retain).await
    }

    /// Subscribe at QoS 0
    pub async fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.client.subscribe(topic, QoS::AtMostOnce).await
    }

    pub async fn subscribe_with(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.client.subscribe(topic, qos).await
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.client.unsubscribe(topic).await
    }

    pub async fn disconnect(&self) -> Result<(), MqttError> {
        self.client.disconnect().await
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

/// Operational session that has been set up but not yet driven
pub struct Connection<C, E, H> {
    handle: ConnectionHandle<C>,
    events: E,
    dispatcher: Dispatcher<C, H>,
    reconnect_delay: Duration,
}

impl<C, E, H> Connection<C, E, H>
where
    C: SessionClient,
    E: SessionEvents,
    H: SessionHandler<C>,
{
    pub(crate) fn new(
        handle: ConnectionHandle<C>,
        events: E,
        handler: H,
        ctx: SessionContext<C>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            handle,
            events,
            dispatcher: Dispatcher { handler, ctx },
            reconnect_delay,
        }
    }

    pub fn handle(&self) -> ConnectionHandle<C> {
        self.handle.clone()
    }

    pub fn client_id(&self) -> &str {
        &self.dispatcher.ctx.client_id
    }

    /// Drive events in the background while `workload` runs on this task.
    ///
    /// Background processing is stopped exactly once when the workload
    /// finishes, whatever it returns. If the workload panics, the drop guard
    /// aborts the event task while unwinding.
    pub async fn run_loop<F, Fut, T>(self, workload: F) -> T
    where
        F: FnOnce(ConnectionHandle<C>) -> Fut,
        Fut: Future<Output = T>,
    {
        let Connection {
            handle,
            events,
            dispatcher,
            reconnect_delay,
        } = self;

        let client_id = dispatcher.ctx.client_id.clone();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(
            drive_events(events, dispatcher, stop_rx, reconnect_delay)
                .instrument(crate::session_span!(client_id = %client_id)),
        );

        let mut guard = LoopGuard {
            stop_tx,
            client: handle.client().clone(),
            task: Some(task),
        };

        let output = workload(handle).await;

        info!(
            client_id = %client_id,
            "Message loop is terminated gracefully - disconnecting from the broker"
        );
        guard.stop().await;
        output
    }
}

/// Stops the event task once, either explicitly or on drop
struct LoopGuard<C> {
    stop_tx: watch::Sender<bool>,
    client: C,
    task: Option<JoinHandle<()>>,
}

impl<C: SessionClient> LoopGuard<C> {
    async fn stop(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };

        self.stop_tx.send_replace(true);

        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "Disconnect request failed, aborting event loop");
            task.abort();
            return;
        }

        if tokio::time::timeout(STOP_GRACE_PERIOD, &mut task).await.is_err() {
            warn!(
                grace_secs = STOP_GRACE_PERIOD.as_secs(),
                "Event loop did not stop in time, aborting"
            );
            task.abort();
        }
    }
}

impl<C> Drop for LoopGuard<C> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.stop_tx.send_replace(true);
            task.abort();
        }
    }
}

async fn drive_events<C, E, H>(
    mut events: E,
    dispatcher: Dispatcher<C, H>,
    mut stop_rx: watch::Receiver<bool>,
    reconnect_delay: Duration,
) where
    C: SessionClient,
    E: SessionEvents,
    H: SessionHandler<C>,
{
    loop {
        match events.next_event().await {
            Ok(SessionEvent::Disconnected { reason }) => {
                if *stop_rx.borrow() {
                    debug!(reason = %reason, "Session disconnected, event loop finished");
                    break;
                }
                dispatcher.disconnected(&reason).await;
            }
            Ok(event) => dispatcher.dispatch(event).await,
            Err(MqttError::SessionClosed) => {
                debug!("Session closed, event loop finished");
                break;
            }
            Err(e) => {
                if *stop_rx.borrow() {
                    debug!(error = %e, "Transport stopped while shutting down");
                    break;
                }
                dispatcher.transport_error(e).await;

                // Pace the transport's reconnect attempts
                tokio::select! {
                    _ = tokio::time::sleep(reconnect_delay) => {}
                    _ = stop_rx.changed() => {}
                }
            }
        }
    }
}

/// Routes session events to handler callbacks
struct Dispatcher<C, H> {
    handler: H,
    ctx: SessionContext<C>,
}

impl<C, H> Dispatcher<C, H>
where
    C: SessionClient,
    H: SessionHandler<C>,
{
    async fn dispatch(&self, event: SessionEvent) {
        match event {
            SessionEvent::Connected { session_present } => {
                info!(
                    client_id = %self.ctx.client_id,
                    session_present,
                    "{}",
                    connack_description(ConnectReturnCode::Success)
                );
                self.handler.on_connected(&self.ctx).await;
            }
            SessionEvent::Subscribed { packet_id, granted } => {
                debug!(packet_id, granted = ?granted, "Subscription acknowledged");
                self.handler
                    .on_subscribed(&self.ctx, packet_id, &granted)
                    .await;
            }
            SessionEvent::Published { packet_id } => {
                self.handler.on_published(&self.ctx, packet_id).await;
            }
            SessionEvent::Message { topic, payload } => {
                self.handle_message(&topic, &payload).await;
            }
            SessionEvent::Disconnected { reason } => self.disconnected(&reason).await,
            SessionEvent::Other(packet) => trace!(packet = %packet, "Ignoring packet"),
        }
    }

    async fn handle_message(&self, topic: &str, payload: &Bytes) {
        let data = match MessageHandler::decode_payload(payload) {
            Ok(data) => data,
            Err(reason) => {
                let error = SessionError::MalformedPayload {
                    topic: topic.to_string(),
                    reason,
                };
                self.handler.on_error(&self.ctx, &error).await;
                return;
            }
        };

        let route = MessageHandler::route_message(
            topic,
            self.ctx.config_property.as_deref(),
            self.handler.accepts_config_updates(),
        );

        match route {
            MessageRoute::ConfigUpdate => match ConfigSnapshot::try_from(data) {
                Ok(snapshot) => {
                    let snapshot = self.ctx.config.replace(snapshot);
                    info!(
                        frequency_secs = snapshot.frequency().as_secs_f64(),
                        forever = snapshot.forever(),
                        "Configuration updated"
                    );
                    self.handler.on_config_updated(&self.ctx, &snapshot).await;
                }
                Err(reason) => {
                    self.handler
                        .on_error(&self.ctx, &SessionError::InvalidConfig(reason))
                        .await;
                }
            },
            MessageRoute::Message => {
                self.handler.on_message(&self.ctx, topic, data).await;
            }
        }
    }

    async fn disconnected(&self, reason: &str) {
        self.handler.on_disconnected(&self.ctx, reason).await;
    }

    async fn transport_error(&self, error: MqttError) {
        self.handler
            .on_error(&self.ctx, &SessionError::Transport(error))
            .await;
    }
}

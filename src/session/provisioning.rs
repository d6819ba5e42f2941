//! Provisioning coordinator
//!
//! A device that only knows its installation-time provisioning key trades a
//! claim (for example its serial number) for operational credentials:
//!
//! 1. connect with the provisioning key and subscribe to `<ns>/provisions/<clientId>`
//! 2. once the subscription is acknowledged, publish the claim to `<ns>/provisions`
//! 3. the first message on the response topic carries the issued identity
//!
//! The exchange is an explicit state machine ([`ProvisionState::transition`])
//! driven on the caller's task, racing a one-shot [`ProvisionTimer`] against
//! transport events.

use super::config_store::ConfigSnapshot;
use super::error::ProvisionError;
use super::identity::{ClaimDescriptor, IssuedIdentity};
use crate::protocol::{validate_topic_level, ClaimRequest, ClaimResponse, TopicBuilder};
use crate::transport::mqtt::MessageHandler;
use crate::transport::{MqttError, QoS, SessionClient, SessionEvent, SessionEvents};
use bytes::Bytes;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upper bound on waiting for the provisioning session to report its disconnect
pub const DRAIN_GRACE_PERIOD: Duration = Duration::from_secs(2);

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// One-shot timer whose expiry handler runs at most once
///
/// Firing and cancelling race through a single compare-and-swap on the timer
/// state, so exactly one of them wins.
#[derive(Debug)]
pub struct ProvisionTimer {
    state: Arc<AtomicU8>,
    fired_rx: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl ProvisionTimer {
    /// Start the timer. Must be called from within a tokio runtime.
    pub fn arm<F>(timeout: Duration, on_expiry: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(ARMED));
        let (fired_tx, fired_rx) = watch::channel(false);

        let timer_state = state.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if timer_state
                .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                on_expiry();
                fired_tx.send_replace(true);
            }
        });

        Self {
            state,
            fired_rx,
            task,
        }
    }

    /// Cancel the timer. Returns `false` when it already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            self.task.abort();
        }
        cancelled
    }

    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    pub fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) == ARMED
    }

    /// Resolves once the expiry handler has run; pends forever once cancelled
    pub async fn expired(&mut self) {
        loop {
            if *self.fired_rx.borrow_and_update() {
                return;
            }
            if self.fired_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Drop for ProvisionTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Why a provisioning exchange failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    SubscriptionRejected,
    SessionClosed,
    Transport,
}

/// Provisioning exchange state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    AwaitingSubscribe,
    AwaitingResponse,
    Complete,
    TimedOut,
    Failed(FailureReason),
}

/// Inputs to the provisioning state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionEvent {
    Connected,
    Subscribed { granted: bool },
    Response,
    TimerFired,
    SessionClosed,
}

/// Side effect requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionAction {
    Subscribe,
    PublishClaim,
    AcceptResponse,
    Abort,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: ProvisionState,
    pub action: ProvisionAction,
}

impl Transition {
    fn to(next: ProvisionState, action: ProvisionAction) -> Self {
        Self { next, action }
    }
}

impl ProvisionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisionState::Complete | ProvisionState::TimedOut | ProvisionState::Failed(_)
        )
    }

    /// Pure transition function
    pub fn transition(&self, event: ProvisionEvent) -> Transition {
        use ProvisionAction as A;
        use ProvisionEvent as E;
        use ProvisionState as S;

        if self.is_terminal() {
            return Transition::to(*self, A::Ignore);
        }

        match (self, event) {
            (_, E::TimerFired) => Transition::to(S::TimedOut, A::Abort),
            (_, E::SessionClosed) => {
                Transition::to(S::Failed(FailureReason::SessionClosed), A::Abort)
            }
            // Clean sessions drop subscriptions on reconnect
            (_, E::Connected) => Transition::to(S::AwaitingSubscribe, A::Subscribe),
            (S::AwaitingSubscribe, E::Subscribed { granted: true }) => {
                Transition::to(S::AwaitingResponse, A::PublishClaim)
            }
            (S::AwaitingSubscribe, E::Subscribed { granted: false }) => Transition::to(
                S::Failed(FailureReason::SubscriptionRejected),
                A::Abort,
            ),
            (S::AwaitingResponse, E::Response) => Transition::to(S::Complete, A::AcceptResponse),
            (state, _) => Transition::to(*state, A::Ignore),
        }
    }
}

/// Result of a completed exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionOutcome {
    pub identity: IssuedIdentity,
    /// Configuration sent along with the identity, if any
    pub config: Option<ConfigSnapshot>,
}

/// Parse a claim response into an identity and optional configuration (pure function)
///
/// A config value that is not a JSON object is ignored.
pub fn parse_claim_response(
    payload: &[u8],
    config_property: Option<&str>,
) -> Result<ProvisionOutcome, ProvisionError> {
    let response = ClaimResponse::from_payload(payload)
        .map_err(|e| ProvisionError::MalformedResponse(e.to_string()))?;

    let identity = IssuedIdentity::from_response(&response)
        .map_err(|missing| ProvisionError::IncompleteIdentity(missing.join(", ")))?;

    let config = config_property
        .and_then(|name| response.property(name))
        .and_then(|value| match ConfigSnapshot::try_from(value.clone()) {
            Ok(snapshot) => Some(snapshot),
            Err(reason) => {
                warn!(reason = %reason, "Ignoring provisioned configuration");
                None
            }
        });

    Ok(ProvisionOutcome { identity, config })
}

/// What a transport event means for the exchange
enum Step {
    Event(ProvisionEvent),
    Skip,
    Retry(MqttError),
}

/// One provisioning attempt
#[derive(Debug)]
pub struct ProvisionSession {
    state: ProvisionState,
    client_id: String,
    request_topic: String,
    response_topic: String,
    claim_payload: Vec<u8>,
    config_property: Option<String>,
}

impl ProvisionSession {
    pub fn new(
        topics: &TopicBuilder,
        client_id: &str,
        claim: &ClaimDescriptor,
        config_property: Option<&str>,
    ) -> Result<Self, ProvisionError> {
        // The response topic is matched literally, wildcards would never match
        validate_topic_level(client_id).map_err(|source| ProvisionError::InvalidClientId {
            client_id: client_id.to_string(),
            source,
        })?;

        let request = ClaimRequest::new(
            claim.identifier_type.as_str(),
            claim.identifier_value.clone(),
            config_property.map(str::to_string),
        );

        Ok(Self {
            state: ProvisionState::AwaitingSubscribe,
            client_id: client_id.to_string(),
            request_topic: topics.provisions(),
            response_topic: topics.provision_response(client_id),
            claim_payload: request.to_payload()?,
            config_property: config_property.map(str::to_string),
        })
    }

    pub fn state(&self) -> ProvisionState {
        self.state
    }

    pub fn response_topic(&self) -> &str {
        &self.response_topic
    }

    /// Drive the exchange to a terminal state on the calling task, then
    /// disconnect and wait (bounded) for the session to report it.
    pub async fn run<C, E>(
        mut self,
        client: &C,
        events: &mut E,
        timeout: Duration,
        reconnect_delay: Duration,
    ) -> Result<ProvisionOutcome, ProvisionError>
    where
        C: SessionClient,
        E: SessionEvents,
    {
        let client_id = self.client_id.clone();
        let mut timer = ProvisionTimer::arm(timeout, move || {
            warn!(
                client_id = %client_id,
                timeout_secs = timeout.as_secs_f64(),
                "Provisioning timeout"
            );
        });

        let mut response = Bytes::new();

        let result = loop {
            let step = tokio::select! {
                biased;
                _ = timer.expired() => Step::Event(ProvisionEvent::TimerFired),
                event = events.next_event() => self.reduce(event, &mut response),
            };

            let event = match step {
                Step::Event(event) => event,
                Step::Skip => continue,
                Step::Retry(error) => {
                    warn!(error = %error, "Provisioning connection error, retrying");
                    let fired = tokio::select! {
                        biased;
                        _ = timer.expired() => true,
                        _ = tokio::time::sleep(reconnect_delay) => false,
                    };
                    if !fired {
                        continue;
                    }
                    ProvisionEvent::TimerFired
                }
            };

            let transition = self.state.transition(event);
            debug!(
                from = ?self.state,
                to = ?transition.next,
                event = ?event,
                action = ?transition.action,
                "Provisioning transition"
            );
            self.state = transition.next;

            match transition.action {
                ProvisionAction::Subscribe => {
                    if let Err(e) = client.subscribe(&self.response_topic, QoS::AtMostOnce).await {
                        self.state = ProvisionState::Failed(FailureReason::Transport);
                        break Err(ProvisionError::Transport(e));
                    }
                }
                ProvisionAction::PublishClaim => {
                    info!(topic = %self.request_topic, "Publishing provisioning claim");
                    if let Err(e) = client
                        .publish(
                            &self.request_topic,
                            self.claim_payload.clone(),
                            QoS::AtMostOnce,
                            false,
                        )
                        .await
                    {
                        self.state = ProvisionState::Failed(FailureReason::Transport);
                        break Err(ProvisionError::Transport(e));
                    }
                }
                ProvisionAction::AcceptResponse => {
                    break self.accept_response(&timer, &response, timeout);
                }
                ProvisionAction::Abort => {
                    timer.cancel();
                    break Err(match self.state {
                        ProvisionState::TimedOut => ProvisionError::Timeout(timeout),
                        ProvisionState::Failed(FailureReason::SubscriptionRejected) => {
                            ProvisionError::SubscriptionRejected
                        }
                        _ => ProvisionError::SessionClosed,
                    });
                }
                ProvisionAction::Ignore => {}
            }
        };

        timer.cancel();
        self.finish(client, events).await;
        result
    }

    /// Settle an accepted response against the timer. When the timer already
    /// fired, expiry wins and the response is dropped.
    fn accept_response(
        &mut self,
        timer: &ProvisionTimer,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        if !timer.cancel() {
            self.state = ProvisionState::TimedOut;
            return Err(ProvisionError::Timeout(timeout));
        }
        parse_claim_response(payload, self.config_property.as_deref())
    }

    fn reduce(&self, event: Result<SessionEvent, MqttError>, response: &mut Bytes) -> Step {
        match event {
            Ok(SessionEvent::Connected { .. }) => Step::Event(ProvisionEvent::Connected),
            Ok(SessionEvent::Subscribed { granted, .. }) => Step::Event(ProvisionEvent::Subscribed {
                granted: MessageHandler::validate_subscription_success(&granted).is_ok(),
            }),
            Ok(SessionEvent::Message { topic, payload }) if topic == self.response_topic => {
                *response = payload;
                Step::Event(ProvisionEvent::Response)
            }
            Ok(SessionEvent::Message { topic, .. }) => {
                debug!(topic = %topic, "Ignoring message outside the provisioning response topic");
                Step::Skip
            }
            Ok(SessionEvent::Disconnected { reason }) => {
                warn!(reason = %reason, "Provisioning session disconnected");
                Step::Skip
            }
            Ok(_) => Step::Skip,
            Err(MqttError::SessionClosed) => Step::Event(ProvisionEvent::SessionClosed),
            Err(error) => Step::Retry(error),
        }
    }

    async fn finish<C, E>(&self, client: &C, events: &mut E)
    where
        C: SessionClient,
        E: SessionEvents,
    {
        if self.state == ProvisionState::Failed(FailureReason::SessionClosed) {
            return;
        }

        if let Err(e) = client.disconnect().await {
            warn!(error = %e, "Failed to disconnect provisioning session");
            return;
        }

        let response_topic = self.response_topic.as_str();
        let drained = tokio::time::timeout(DRAIN_GRACE_PERIOD, async {
            loop {
                match events.next_event().await {
                    Ok(SessionEvent::Disconnected { .. }) | Err(_) => break,
                    Ok(SessionEvent::Message { topic, .. }) if topic == response_topic => {
                        debug!("Ignoring provisioning response after the exchange finished");
                    }
                    Ok(_) => {}
                }
            }
        })
        .await;

        if drained.is_err() {
            debug!("Provisioning session did not report its disconnect in time");
        }
    }
}

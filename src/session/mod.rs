//! Device session manager
//!
//! [`DeviceSession`] owns everything that outlives a single MQTT session:
//! the topic layout, the shared configuration store and the configuration
//! property name learned during provisioning. It opens two kinds of sessions:
//!
//! - a short-lived provisioning session ([`DeviceSession::provision`])
//! - the long-lived operational session ([`DeviceSession::connect`])
//!
//! The two never share a client id.

pub mod config_store;
pub mod connection;
pub mod error;
pub mod handler;
pub mod identity;
pub mod provisioning;

pub use config_store::{ConfigSnapshot, ConfigStore};
pub use connection::{Connection, ConnectionHandle};
pub use error::{ProvisionError, SessionError};
pub use handler::{SessionContext, SessionHandler};
pub use identity::{ClaimDescriptor, ClaimType, IssuedIdentity};
pub use provisioning::{ProvisionOutcome, ProvisionSession, ProvisionState, ProvisionTimer};

use crate::protocol::{validate_topic_level, TopicBuilder};
use crate::transport::{ConnectionParameters, Connector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Instrument};

/// Default pause between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Bootstrap and operational session manager for one device
pub struct DeviceSession<K: Connector> {
    connector: K,
    topics: TopicBuilder,
    config: Arc<ConfigStore>,
    config_property: Option<String>,
    provisioning_client_id: Option<String>,
    reconnect_delay: Duration,
}

impl<K: Connector> DeviceSession<K> {
    pub fn new(connector: K, topics: TopicBuilder) -> Self {
        Self {
            connector,
            topics,
            config: Arc::new(ConfigStore::default()),
            config_property: None,
            provisioning_client_id: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Start from `snapshot` instead of the default configuration
    pub fn with_initial_config(mut self, snapshot: ConfigSnapshot) -> Self {
        self.config = Arc::new(ConfigStore::new(snapshot));
        self
    }

    /// Route pushes on `name` to the configuration store without provisioning first
    pub fn with_config_property(mut self, name: impl Into<String>) -> Self {
        self.config_property = Some(name.into());
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn config(&self) -> Arc<ConfigStore> {
        self.config.clone()
    }

    pub fn config_property(&self) -> Option<&str> {
        self.config_property.as_deref()
    }

    pub fn topics(&self) -> &TopicBuilder {
        &self.topics
    }

    /// Trade `claim` for operational credentials.
    ///
    /// Blocks the calling task until the platform answers, the exchange
    /// fails, or `timeout` elapses. When the answer carries a configuration
    /// object under `config_property`, it replaces the current snapshot.
    pub async fn provision(
        &mut self,
        params: ConnectionParameters,
        claim: &ClaimDescriptor,
        config_property: Option<&str>,
        timeout: Duration,
        keep_alive: Duration,
    ) -> Result<IssuedIdentity, ProvisionError> {
        self.config_property = config_property.map(str::to_string);
        self.provisioning_client_id = Some(params.client_id.clone());

        let span = crate::provision_span!(client_id = %params.client_id);
        let session =
            ProvisionSession::new(&self.topics, &params.client_id, claim, config_property)?;

        let outcome = async {
            info!(
                claim_type = %claim.identifier_type,
                host = %params.host,
                port = params.port,
                "Starting device provisioning"
            );
            let (client, mut events) = self.connector.open(&params, keep_alive)?;
            session
                .run(&client, &mut events, timeout, self.reconnect_delay)
                .await
        }
        .instrument(span)
        .await?;

        if let Some(snapshot) = outcome.config {
            self.config.replace(snapshot);
        }

        info!(device_id = %outcome.identity.device_id, "Device provisioned");
        Ok(outcome.identity)
    }

    /// Set up the operational session. Nothing happens on the wire until
    /// [`Connection::run_loop`] drives it.
    pub fn connect<H>(
        &self,
        params: ConnectionParameters,
        handler: H,
        keep_alive: Duration,
    ) -> Result<Connection<K::Client, K::Events, H>, SessionError>
    where
        H: SessionHandler<K::Client>,
    {
        if self.provisioning_client_id.as_deref() == Some(params.client_id.as_str()) {
            return Err(SessionError::ClientIdReused(params.client_id));
        }
        validate_topic_level(&params.client_id).map_err(|source| SessionError::InvalidClientId {
            client_id: params.client_id.clone(),
            source,
        })?;

        let (client, events) = self.connector.open(&params, keep_alive)?;
        let handle = ConnectionHandle::new(client);
        let ctx = SessionContext {
            connection: handle.clone(),
            config: self.config.clone(),
            config_property: self.config_property.clone(),
            client_id: params.client_id.clone(),
        };

        info!(client_id = %params.client_id, "Operational session ready");
        Ok(Connection::new(
            handle,
            events,
            handler,
            ctx,
            self.reconnect_delay,
        ))
    }
}

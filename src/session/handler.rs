//! Callback seam for operational sessions
//!
//! Handlers receive every callback with an explicit [`SessionContext`]
//! instead of capturing state from the code that created the session.

use super::config_store::{ConfigSnapshot, ConfigStore};
use super::connection::ConnectionHandle;
use super::error::SessionError;
use crate::transport::SessionClient;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// State handed to every handler callback
#[derive(Debug, Clone)]
pub struct SessionContext<C> {
    pub connection: ConnectionHandle<C>,
    pub config: Arc<ConfigStore>,
    /// Trailing topic segment that carries configuration pushes
    pub config_property: Option<String>,
    pub client_id: String,
}

/// Operational session callbacks
///
/// Callbacks run on the session's event task, one at a time, in broker order.
#[async_trait]
pub trait SessionHandler<C: SessionClient>: Send + Sync + 'static {
    /// Connection (re)established. Sessions are clean, so subscriptions belong here.
    async fn on_connected(&self, ctx: &SessionContext<C>);

    /// Inbound message that is not a configuration push
    async fn on_message(&self, ctx: &SessionContext<C>, topic: &str, data: Value);

    /// Whether configuration pushes are split off from [`on_message`](Self::on_message)
    fn accepts_config_updates(&self) -> bool {
        false
    }

    /// Configuration snapshot swapped in by a push
    async fn on_config_updated(&self, _ctx: &SessionContext<C>, _snapshot: &ConfigSnapshot) {}

    async fn on_disconnected(&self, ctx: &SessionContext<C>, reason: &str) {
        warn!(client_id = %ctx.client_id, reason, "Connection with the broker is lost");
    }

    async fn on_published(&self, _ctx: &SessionContext<C>, _packet_id: u16) {}

    async fn on_subscribed(&self, _ctx: &SessionContext<C>, _packet_id: u16, _granted: &[Option<u8>]) {}

    async fn on_error(&self, ctx: &SessionContext<C>, error: &SessionError) {
        warn!(client_id = %ctx.client_id, error = %error, "Session error");
    }
}

//! Pure connection parameter handling for the MQTT transport
//!
//! This module contains connection parameters, transport errors and the
//! pure functions that turn parameters into rumqttc options.

use rumqttc::{ConnectReturnCode, MqttOptions, Transport as RumqttcTransport};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Default plain MQTT port
pub const DEFAULT_PORT: u16 = 1883;
/// Default MQTT-over-TLS port
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Parameters for opening one broker session
///
/// Built once and passed by value into session-open calls. The client id is
/// randomized unless set explicitly.
#[derive(Clone, PartialEq)]
pub struct ConnectionParameters {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub tls: bool,
}

impl ConnectionParameters {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: random_client_id(),
            username: username.into(),
            password: password.into(),
            tls: false,
        }
    }

    /// Parse `mqtt://host:port` or `mqtts://host:port` into parameters.
    ///
    /// `mqtts` enables TLS and defaults to port 8883.
    pub fn from_broker_url(
        broker_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, MqttError> {
        let url =
            Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(MqttError::InvalidBrokerUrl(broker_url.to_string())),
        };

        let host = url
            .host_str()
            .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
        let port = url
            .port()
            .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

        Ok(Self::new(host, port, username, password).with_tls(tls))
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"***")
            .field("tls", &self.tls)
            .finish()
    }
}

/// Random client id for sessions that have no identity of their own yet
pub fn random_client_id() -> String {
    format!("device-{}", Uuid::new_v4().simple())
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("{0}")]
    ConnectionRefused(&'static str),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Unsubscribe failed")]
    UnsubscribeFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid client id: {0:?}")]
    InvalidClientId(String),
    #[error("Session closed")]
    SessionClosed,
}

/// Pure function to build rumqttc options from connection parameters
///
/// Sessions are always clean: subscriptions do not survive a reconnect and
/// must be re-established from the connect callback.
pub fn configure_mqtt_options(
    params: &ConnectionParameters,
    keep_alive: Duration,
) -> Result<MqttOptions, MqttError> {
    // rumqttc panics on these ids, reject them up front
    if params.client_id.is_empty() || params.client_id.starts_with(' ') {
        return Err(MqttError::InvalidClientId(params.client_id.clone()));
    }

    let mut mqtt_options = MqttOptions::new(&params.client_id, &params.host, params.port);

    if params.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if !params.username.is_empty() {
        mqtt_options.set_credentials(&params.username, &params.password);
    }

    mqtt_options.set_keep_alive(keep_alive);
    mqtt_options.set_clean_session(true);

    Ok(mqtt_options)
}

/// Human readable CONNACK result, in the wording brokers document
pub fn connack_description(code: ConnectReturnCode) -> &'static str {
    #[allow(unreachable_patterns)]
    match code {
        ConnectReturnCode::Success => "Connection Accepted.",
        ConnectReturnCode::RefusedProtocolVersion => {
            "Connection Refused: unacceptable protocol version."
        }
        ConnectReturnCode::BadClientId => "Connection Refused: identifier rejected.",
        ConnectReturnCode::ServiceUnavailable => "Connection Refused: broker unavailable.",
        ConnectReturnCode::BadUserNamePassword => "Connection Refused: bad user name or password.",
        ConnectReturnCode::NotAuthorized => "Connection Refused: not authorised.",
        _ => "Connection Refused: unknown reason.",
    }
}

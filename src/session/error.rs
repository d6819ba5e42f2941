//! Error types for provisioning and operational sessions

use crate::protocol::ValidationError;
use crate::transport::MqttError;
use std::time::Duration;
use thiserror::Error;

/// Provisioning failures
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Provisioning transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("Provisioning timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed provisioning response: {0}")]
    MalformedResponse(String),

    #[error("Provisioning response is missing identity fields: {0}")]
    IncompleteIdentity(String),

    #[error("Broker rejected the provisioning response subscription")]
    SubscriptionRejected,

    #[error("Provisioning session closed before a response arrived")]
    SessionClosed,

    #[error("Failed to encode claim request: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Client id {client_id:?} cannot be used as a topic level: {source}")]
    InvalidClientId {
        client_id: String,
        source: ValidationError,
    },
}

/// Operational session failures
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Malformed payload on {topic}: {reason}")]
    MalformedPayload { topic: String, reason: String },

    #[error("Invalid configuration payload: {0}")]
    InvalidConfig(String),

    #[error("Client id {0:?} was already used by the provisioning session")]
    ClientIdReused(String),

    #[error("Client id {client_id:?} cannot be used as a topic level: {source}")]
    InvalidClientId {
        client_id: String,
        source: ValidationError,
    },

    #[error("Session transport error: {0}")]
    Transport(#[from] MqttError),
}

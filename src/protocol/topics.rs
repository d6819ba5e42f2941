//! Topic construction and identifier validation for the Connio MQTT API
//!
//! All topics live under a platform namespace (`connio` on the public cloud).
//! Provisioning uses `<ns>/provisions` and `<ns>/provisions/<clientId>`;
//! operational traffic uses `<ns>/data/in|out/devices/<deviceId>/...`.

use thiserror::Error;

/// Default platform namespace
pub const DEFAULT_NAMESPACE: &str = "connio";

/// Builds topics under one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBuilder {
    namespace: String,
}

impl TopicBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace: String = namespace.into();
        Self {
            namespace: namespace.trim_matches('/').to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Claim request topic: `<ns>/provisions`
    pub fn provisions(&self) -> String {
        format!("{}/provisions", self.namespace)
    }

    /// Claim response topic for one provisioning session: `<ns>/provisions/<clientId>`
    pub fn provision_response(&self, client_id: &str) -> String {
        format!("{}/provisions/{client_id}", self.namespace)
    }

    /// Every inbound device topic: `<ns>/data/in/devices/<deviceId>/#`
    pub fn data_in(&self, device_id: &str) -> String {
        format!("{}/data/in/devices/{device_id}/#", self.namespace)
    }

    /// Data point feed: `<ns>/data/out/devices/<deviceId>/json`
    pub fn data_out_json(&self, device_id: &str) -> String {
        format!("{}/data/out/devices/{device_id}/json", self.namespace)
    }

    /// Single property value: `<ns>/data/out/devices/<deviceId>/properties/<property>`
    pub fn data_out_property(&self, device_id: &str, property: &str) -> String {
        format!(
            "{}/data/out/devices/{device_id}/properties/{property}",
            self.namespace
        )
    }

    /// Method invocations: `<ns>/data/out/devices/<deviceId>/methods/json`
    pub fn data_out_methods(&self, device_id: &str) -> String {
        format!("{}/data/out/devices/{device_id}/methods/json", self.namespace)
    }
}

impl Default for TopicBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

/// Trailing segment of a topic, the property an inbound message addresses
pub fn property_of(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

/// Validate an identifier used as a topic level (device id, client id)
pub fn validate_topic_level(level: &str) -> Result<(), ValidationError> {
    if level.is_empty() {
        return Err(ValidationError::EmptyLevel);
    }

    for ch in level.chars() {
        if matches!(ch, '/' | '+' | '#') || ch.is_control() {
            return Err(ValidationError::InvalidLevelChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for topic levels
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Topic level cannot be empty")]
    EmptyLevel,
    #[error("Topic level contains invalid character: {0:?}")]
    InvalidLevelChar(char),
}

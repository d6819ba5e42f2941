//! Configuration for the device client
//!
//! Configuration is a TOML file. Secrets never appear in the file: each
//! credential is referenced by the name of the environment variable that
//! holds it, and resolved when the device bootstraps.
//!
//! Exactly one of `[device]` (pre-provisioned credentials) or
//! `[provisioning]` (runtime provisioning) must be present.

use crate::session::{ClaimDescriptor, ClaimType, ConfigSnapshot};
use crate::transport::ConnectionParameters;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Smallest keep alive interval the transport accepts reliably
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Main device configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    /// Pre-provisioned credentials
    pub device: Option<DeviceSection>,
    /// Runtime provisioning
    pub provisioning: Option<ProvisioningSection>,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, `mqtt://` for plain TCP or `mqtts://` for TLS
    #[serde(default = "default_broker_url")]
    pub url: String,
    /// Platform topic namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Operational session keep alive in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Pause between reconnect attempts in milliseconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            namespace: default_namespace(),
            keep_alive_secs: default_keep_alive(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

/// Pre-provisioned device credentials, by environment variable name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    #[serde(default = "default_device_id_env")]
    pub id_env: String,
    #[serde(default = "default_device_key_id_env")]
    pub key_id_env: String,
    #[serde(default = "default_device_key_secret_env")]
    pub key_secret_env: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            id_env: default_device_id_env(),
            key_id_env: default_device_key_id_env(),
            key_secret_env: default_device_key_secret_env(),
        }
    }
}

/// Runtime provisioning settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisioningSection {
    #[serde(default = "default_provision_key_id_env")]
    pub key_id_env: String,
    #[serde(default = "default_provision_key_secret_env")]
    pub key_secret_env: String,
    /// Claim identifier type, `sn` for serial numbers
    #[serde(default = "default_claim_type")]
    pub claim_type: String,
    #[serde(default = "default_claim_value_env")]
    pub claim_value_env: String,
    /// Property whose value the platform returns as device configuration
    #[serde(default = "default_config_property")]
    pub config_property: Option<String>,
    #[serde(default = "default_provision_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_provision_keep_alive")]
    pub keep_alive_secs: u64,
}

impl Default for ProvisioningSection {
    fn default() -> Self {
        Self {
            key_id_env: default_provision_key_id_env(),
            key_secret_env: default_provision_key_secret_env(),
            claim_type: default_claim_type(),
            claim_value_env: default_claim_value_env(),
            config_property: default_config_property(),
            timeout_secs: default_provision_timeout(),
            keep_alive_secs: default_provision_keep_alive(),
        }
    }
}

/// Initial telemetry configuration, until the platform pushes one
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySection {
    #[serde(default = "default_frequency")]
    pub frequency_secs: u64,
    #[serde(default = "default_forever")]
    pub forever: bool,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            frequency_secs: default_frequency(),
            forever: default_forever(),
        }
    }
}

impl TelemetrySection {
    pub fn initial_snapshot(&self) -> ConfigSnapshot {
        let mut values = Map::new();
        values.insert("frequency".to_string(), Value::from(self.frequency_secs));
        values.insert("forever".to_string(), Value::from(self.forever));
        ConfigSnapshot::new(values)
    }
}

fn default_broker_url() -> String {
    "mqtt://mqtt.connio.cloud:1883".to_string()
}

fn default_namespace() -> String {
    crate::protocol::DEFAULT_NAMESPACE.to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    1000
}

fn default_device_id_env() -> String {
    "CONNIO_DEVICE_ID".to_string()
}

fn default_device_key_id_env() -> String {
    "CONNIO_DEVICE_KEY_ID".to_string()
}

fn default_device_key_secret_env() -> String {
    "CONNIO_DEVICE_KEY_SECRET".to_string()
}

fn default_provision_key_id_env() -> String {
    "CONNIO_PROVISION_KEY_ID".to_string()
}

fn default_provision_key_secret_env() -> String {
    "CONNIO_PROVISION_KEY_SECRET".to_string()
}

fn default_claim_type() -> String {
    "sn".to_string()
}

fn default_claim_value_env() -> String {
    "CONNIO_DEVICE_SN".to_string()
}

fn default_config_property() -> Option<String> {
    Some("config".to_string())
}

fn default_provision_timeout() -> u64 {
    10
}

fn default_provision_keep_alive() -> u64 {
    60
}

fn default_frequency() -> u64 {
    5
}

fn default_forever() -> bool {
    true
}

/// How the device obtains its operational credentials
#[derive(Debug, Clone)]
pub enum Bootstrap {
    /// Credentials are known up front
    Credentials { params: ConnectionParameters },
    /// Credentials are obtained by trading a claim
    Provisioning {
        params: ConnectionParameters,
        claim: ClaimDescriptor,
        config_property: Option<String>,
        timeout: Duration,
        keep_alive: Duration,
    },
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            broker: BrokerSection::default(),
            device: Some(DeviceSection::default()),
            provisioning: None,
            telemetry: TelemetrySection::default(),
        }
    }
}

impl DeviceConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: DeviceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Replace the broker URL, for command line and environment overrides
    pub fn with_broker_url(mut self, url: impl Into<String>) -> Result<Self, ConfigError> {
        self.broker.url = url.into();
        self.validate()?;
        Ok(self)
    }

    /// Check section consistency and value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.device, &self.provisioning) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidConfig(
                    "[device] and [provisioning] are mutually exclusive".to_string(),
                ))
            }
            (None, None) => {
                return Err(ConfigError::InvalidConfig(
                    "Either [device] or [provisioning] must be configured".to_string(),
                ))
            }
            _ => {}
        }

        ConnectionParameters::from_broker_url(&self.broker.url, "", "")
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if self.broker.namespace.trim_matches('/').is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.namespace cannot be empty".to_string(),
            ));
        }

        validate_keep_alive("broker.keep_alive_secs", self.broker.keep_alive_secs)?;

        if let Some(provisioning) = &self.provisioning {
            validate_keep_alive(
                "provisioning.keep_alive_secs",
                provisioning.keep_alive_secs,
            )?;
            if provisioning.timeout_secs == 0 {
                return Err(ConfigError::InvalidConfig(
                    "provisioning.timeout_secs must be positive".to_string(),
                ));
            }
            provisioning
                .claim_type
                .parse::<ClaimType>()
                .map_err(ConfigError::InvalidConfig)?;
        }

        Ok(())
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.broker.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.broker.reconnect_delay_ms)
    }

    /// Resolve credentials from the environment into a bootstrap plan
    pub fn bootstrap(&self) -> Result<Bootstrap, ConfigError> {
        match (&self.device, &self.provisioning) {
            (Some(device), None) => {
                let device_id = get_env_var_required(&device.id_env)?;
                let key_id = get_env_var_required(&device.key_id_env)?;
                let key_secret = get_env_var_required(&device.key_secret_env)?;

                let params = self.broker_params(key_id, key_secret)?.with_client_id(device_id);
                Ok(Bootstrap::Credentials { params })
            }
            (None, Some(provisioning)) => {
                let key_id = get_env_var_required(&provisioning.key_id_env)?;
                let key_secret = get_env_var_required(&provisioning.key_secret_env)?;
                let claim_value = get_env_var_required(&provisioning.claim_value_env)?;
                let claim_type = provisioning
                    .claim_type
                    .parse::<ClaimType>()
                    .map_err(ConfigError::InvalidConfig)?;

                Ok(Bootstrap::Provisioning {
                    params: self.broker_params(key_id, key_secret)?,
                    claim: ClaimDescriptor::new(claim_type, claim_value),
                    config_property: provisioning.config_property.clone(),
                    timeout: Duration::from_secs(provisioning.timeout_secs),
                    keep_alive: Duration::from_secs(provisioning.keep_alive_secs),
                })
            }
            _ => {
                self.validate()?;
                Err(ConfigError::InvalidConfig(
                    "No bootstrap method configured".to_string(),
                ))
            }
        }
    }

    fn broker_params(
        &self,
        username: String,
        password: String,
    ) -> Result<ConnectionParameters, ConfigError> {
        ConnectionParameters::from_broker_url(&self.broker.url, username, password)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }
}

fn validate_keep_alive(field: &str, secs: u64) -> Result<(), ConfigError> {
    if secs < MIN_KEEP_ALIVE_SECS {
        return Err(ConfigError::InvalidConfig(format!(
            "{field} must be at least {MIN_KEEP_ALIVE_SECS} seconds, got {secs}"
        )));
    }
    Ok(())
}

/// Read an environment variable that must be set and non-empty
fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_var_name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}

//! Device identities: the claim presented during provisioning and the
//! credentials the platform issues in exchange.

use crate::protocol::ClaimResponse;
use crate::transport::ConnectionParameters;
use std::fmt;
use std::str::FromStr;

/// Kind of identifier a device claims itself with
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClaimType {
    /// Hardware serial number, `"sn"` on the wire
    SerialNumber,
    /// Any other identifier kind the platform accepts (`"mac"`, `"imei"`, ...)
    Custom(String),
}

impl ClaimType {
    pub fn as_str(&self) -> &str {
        match self {
            ClaimType::SerialNumber => "sn",
            ClaimType::Custom(tag) => tag,
        }
    }
}

impl FromStr for ClaimType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err("Claim type cannot be empty".to_string()),
            "sn" => Ok(ClaimType::SerialNumber),
            other => Ok(ClaimType::Custom(other.to_string())),
        }
    }
}

impl fmt::Display for ClaimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim presented during provisioning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimDescriptor {
    pub identifier_type: ClaimType,
    pub identifier_value: String,
}

impl ClaimDescriptor {
    pub fn new(identifier_type: ClaimType, identifier_value: impl Into<String>) -> Self {
        Self {
            identifier_type,
            identifier_value: identifier_value.into(),
        }
    }

    pub fn serial_number(value: impl Into<String>) -> Self {
        Self::new(ClaimType::SerialNumber, value)
    }
}

/// Operational credentials issued by the platform
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedIdentity {
    pub device_id: String,
    pub api_key_id: String,
    pub api_key_secret: String,
}

impl IssuedIdentity {
    /// Build an identity from a claim response, or name the fields it lacks
    pub fn from_response(response: &ClaimResponse) -> Result<Self, Vec<&'static str>> {
        let missing = response.missing_fields();
        if !missing.is_empty() {
            return Err(missing);
        }

        Ok(Self {
            device_id: response.device_id.clone().unwrap_or_default(),
            api_key_id: response.api_key_id.clone().unwrap_or_default(),
            api_key_secret: response.api_secret.clone().unwrap_or_default(),
        })
    }

    /// Operational parameters for this identity, reusing host, port and TLS from `base`
    pub fn connection_parameters(&self, base: &ConnectionParameters) -> ConnectionParameters {
        ConnectionParameters::new(
            base.host.clone(),
            base.port,
            self.api_key_id.clone(),
            self.api_key_secret.clone(),
        )
        .with_client_id(self.device_id.clone())
        .with_tls(base.tls)
    }
}

impl fmt::Debug for IssuedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedIdentity")
            .field("device_id", &self.device_id)
            .field("api_key_id", &self.api_key_id)
            .field("api_key_secret", &"***")
            .finish()
    }
}

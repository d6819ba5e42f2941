//! Payload types for the Connio MQTT API
//!
//! This module defines the provisioning claim exchange and the outbound data
//! feeds a device publishes once it is operational.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Claim request published to `<ns>/provisions`
///
/// Serializes with the identifier type as the key:
///
/// ```
/// use connio_device::protocol::ClaimRequest;
///
/// let request = ClaimRequest::new("sn", "SN-0001", Some("config".to_string()));
/// let payload: serde_json::Value = serde_json::from_slice(&request.to_payload().unwrap()).unwrap();
/// assert_eq!(payload["sn"], "SN-0001");
/// assert_eq!(payload["configProperty"], "config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    pub identifier_type: String,
    pub identifier_value: String,
    pub config_property: Option<String>,
}

impl ClaimRequest {
    pub fn new(
        identifier_type: impl Into<String>,
        identifier_value: impl Into<String>,
        config_property: Option<String>,
    ) -> Self {
        Self {
            identifier_type: identifier_type.into(),
            identifier_value: identifier_value.into(),
            config_property,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Serialize for ClaimRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(&self.identifier_type, &self.identifier_value)?;
        map.serialize_entry("configProperty", &self.config_property)?;
        map.end()
    }
}

/// Claim response received on `<ns>/provisions/<clientId>`
///
/// Identity fields are optional here so that an incomplete response can be
/// told apart from a malformed one. Everything else, including the config
/// object, lands in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClaimResponse {
    #[serde(rename = "deviceId", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(rename = "apiKeyId", default, skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<String>,
    #[serde(rename = "apiSecret", default, skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClaimResponse {
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Value stored under `key` outside the identity fields
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Names of identity fields that are missing or empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("deviceId", &self.device_id),
            ("apiKeyId", &self.api_key_id),
            ("apiSecret", &self.api_secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().map_or(true, str::is_empty))
        .map(|(name, _)| name)
        .collect()
    }
}

/// Timestamp in the format the platform expects for data points
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One measured value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataPoint {
    /// RFC 3339 timestamp
    pub t: String,
    pub v: Value,
    /// Property name, omitted inside a single-property feed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop: Option<String>,
}

impl DataPoint {
    pub fn new(property: impl Into<String>, value: impl Into<Value>, time: DateTime<Utc>) -> Self {
        Self {
            t: format_timestamp(time),
            v: value.into(),
            prop: Some(property.into()),
        }
    }

    /// Data point for a feed that names its property once at the top level
    pub fn unnamed(value: impl Into<Value>, time: DateTime<Utc>) -> Self {
        Self {
            t: format_timestamp(time),
            v: value.into(),
            prop: None,
        }
    }
}

/// Data point feed published to `<ns>/data/out/devices/<deviceId>/json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DataFeed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop: Option<String>,
    pub dps: Vec<DataPoint>,
}

impl DataFeed {
    /// Feed with mixed properties, each point naming its own
    pub fn new(dps: Vec<DataPoint>) -> Self {
        Self { prop: None, dps }
    }

    /// Feed for a single property
    pub fn for_property(property: impl Into<String>, dps: Vec<DataPoint>) -> Self {
        Self {
            prop: Some(property.into()),
            dps,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// One device method invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub value: Value,
}

/// Method feed published to `<ns>/data/out/devices/<deviceId>/methods/json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MethodFeed {
    pub dps: Vec<MethodCall>,
}

impl MethodFeed {
    pub fn single(method: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            dps: vec![MethodCall {
                method: method.into(),
                value: value.into(),
            }],
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

//! Device configuration snapshot and its shared store
//!
//! The snapshot is an open JSON object. The store swaps whole snapshots
//! atomically through a `tokio::sync::watch` channel, so readers never see a
//! half-applied update and the workload can wait for changes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Default publish interval in seconds
pub const DEFAULT_FREQUENCY_SECS: u64 = 5;

/// Immutable configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSnapshot(Map<String, Value>);

impl ConfigSnapshot {
    pub fn new(values: Map<String, Value>) -> Self {
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Publish interval; falls back to the default for missing, non-numeric
    /// or unrepresentable values
    pub fn frequency(&self) -> Duration {
        self.0
            .get("frequency")
            .and_then(Value::as_f64)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(Duration::from_secs(DEFAULT_FREQUENCY_SECS))
    }

    /// Whether the workload keeps running
    pub fn forever(&self) -> bool {
        self.0
            .get("forever")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        match json!({"frequency": DEFAULT_FREQUENCY_SECS, "forever": true}) {
            Value::Object(values) => Self(values),
            _ => Self(Map::new()),
        }
    }
}

impl TryFrom<Value> for ConfigSnapshot {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(values) => Ok(Self(values)),
            other => Err(format!("Configuration must be a JSON object, got {other}")),
        }
    }
}

/// Shared, atomically swapped configuration
#[derive(Debug)]
pub struct ConfigStore {
    tx: watch::Sender<Arc<ConfigSnapshot>>,
}

impl ConfigStore {
    pub fn new(initial: ConfigSnapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    /// Current snapshot
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.tx.borrow().clone()
    }

    /// Swap in a new snapshot and notify subscribers
    pub fn replace(&self, snapshot: ConfigSnapshot) -> Arc<ConfigSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.tx.send_replace(snapshot.clone());
        snapshot
    }

    /// Receiver that observes every future swap
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigSnapshot>> {
        self.tx.subscribe()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(ConfigSnapshot::default())
    }
}

//! Device workload: outbound data publishing and the periodic telemetry loop
//!
//! [`DataPublisher`] knows the outbound topics and payload shapes of one
//! device. [`TelemetryLoop`] samples readings, publishes them as a data point
//! feed every `frequency` seconds, and stops as soon as the configuration
//! says `forever = false` or a shutdown is requested.

use crate::error::DeviceResult;
use crate::protocol::{DataFeed, DataPoint, MethodFeed, TopicBuilder};
use crate::session::{ConfigSnapshot, ConfigStore, ConnectionHandle};
use crate::transport::SessionClient;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// One sampled property value
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub property: String,
    pub value: Value,
}

impl Reading {
    pub fn new(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
        }
    }
}

/// Publishes a device's outbound data
#[derive(Debug, Clone)]
pub struct DataPublisher<C> {
    connection: ConnectionHandle<C>,
    topics: TopicBuilder,
    device_id: String,
}

impl<C: SessionClient> DataPublisher<C> {
    pub fn new(
        connection: ConnectionHandle<C>,
        topics: TopicBuilder,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            topics,
            device_id: device_id.into(),
        }
    }

    /// Publish readings as one feed, each point naming its property
    pub async fn publish_readings(&self, readings: Vec<Reading>) -> DeviceResult<()> {
        let now = Utc::now();
        let feed = DataFeed::new(
            readings
                .into_iter()
                .map(|reading| DataPoint::new(reading.property, reading.value, now))
                .collect(),
        );
        self.publish_feed(&feed).await
    }

    pub async fn publish_feed(&self, feed: &DataFeed) -> DeviceResult<()> {
        let topic = self.topics.data_out_json(&self.device_id);
        self.connection.publish(&topic, feed.to_payload()?).await?;
        debug!(topic = %topic, points = feed.dps.len(), "Published data feed");
        Ok(())
    }

    /// Publish a single property value on its own topic
    pub async fn publish_property(&self, property: &str, value: &Value) -> DeviceResult<()> {
        let topic = self.topics.data_out_property(&self.device_id, property);
        self.connection
            .publish(&topic, serde_json::to_vec(value)?)
            .await?;
        Ok(())
    }

    /// Publish several timestamped values of one property
    pub async fn publish_property_feed(
        &self,
        property: &str,
        values: Vec<Value>,
    ) -> DeviceResult<()> {
        let now = Utc::now();
        let feed = DataFeed::for_property(
            property,
            values
                .into_iter()
                .map(|value| DataPoint::unnamed(value, now))
                .collect(),
        );
        self.publish_feed(&feed).await
    }

    /// Report a device method invocation
    pub async fn publish_method(&self, method: &str, value: Value) -> DeviceResult<()> {
        let topic = self.topics.data_out_methods(&self.device_id);
        let feed = MethodFeed::single(method, value);
        self.connection.publish(&topic, feed.to_payload()?).await?;
        Ok(())
    }
}

type Sampler = Box<dyn FnMut() -> Vec<Reading> + Send>;

/// Readings of the reference device
pub fn default_readings() -> Vec<Reading> {
    vec![
        Reading::new("temperature", 15.45),
        Reading::new("humidity", 45.2),
    ]
}

/// Periodic telemetry publisher
pub struct TelemetryLoop {
    config: watch::Receiver<Arc<ConfigSnapshot>>,
    shutdown: Option<watch::Receiver<bool>>,
    sampler: Sampler,
}

impl TelemetryLoop {
    pub fn new(config: &ConfigStore) -> Self {
        Self {
            config: config.subscribe(),
            shutdown: None,
            sampler: Box::new(default_readings),
        }
    }

    /// Stop once `shutdown` turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_sampler<F>(mut self, sampler: F) -> Self
    where
        F: FnMut() -> Vec<Reading> + Send + 'static,
    {
        self.sampler = Box::new(sampler);
        self
    }

    /// Publish until stopped. Returns the number of feeds published.
    pub async fn run<C: SessionClient>(mut self, publisher: DataPublisher<C>) -> DeviceResult<u64> {
        let mut published = 0u64;

        'publish: loop {
            if !self.config.borrow_and_update().forever() || shutdown_requested(&self.shutdown) {
                break;
            }

            publisher.publish_readings((self.sampler)()).await?;
            published += 1;
            let published_at = Instant::now();

            // Wait out the interval; a configuration change re-evaluates it
            loop {
                let snapshot = self.config.borrow_and_update().clone();
                if !snapshot.forever() {
                    break 'publish;
                }

                let deadline = published_at + snapshot.frequency();
                tokio::select! {
                    _ = sleep_until(deadline) => break,
                    changed = self.config.changed() => {
                        if changed.is_err() {
                            sleep_until(deadline).await;
                            break;
                        }
                        debug!("Configuration changed during telemetry interval");
                    }
                    _ = wait_for_shutdown(&mut self.shutdown) => break 'publish,
                }
            }
        }

        info!(published, "Telemetry loop finished");
        Ok(published)
    }
}

fn shutdown_requested(shutdown: &Option<watch::Receiver<bool>>) -> bool {
    shutdown.as_ref().is_some_and(|rx| *rx.borrow())
}

async fn wait_for_shutdown(shutdown: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = shutdown {
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
    std::future::pending::<()>().await
}

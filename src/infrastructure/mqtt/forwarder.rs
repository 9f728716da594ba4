//! Reading forwarder
//!
//! Drains the reading queue and republishes every reading as a small JSON
//! document on `<prefix>/<device_address>`.

use crate::domain::models::Reading;
use async_trait::async_trait;
use chrono::SecondsFormat;
use serde_json::{Map, Number, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Fire-and-forget sink for serialized readings
#[async_trait]
pub trait ReadingPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()>;
}

pub fn reading_topic(prefix: &str, device_address: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), device_address)
}

/// `{"time": "<RFC 3339 UTC>", "<key lowercased>": value | null}`
pub fn reading_payload(reading: &Reading) -> Value {
    let mut state = Map::new();
    state.insert(
        "time".to_string(),
        Value::String(
            reading
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Micros, false),
        ),
    );
    let value = reading
        .value
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null);
    state.insert(reading.measurement_key.to_lowercase(), value);
    Value::Object(state)
}

pub struct Forwarder<P> {
    publisher: P,
    topic_prefix: String,
}

impl<P: ReadingPublisher> Forwarder<P> {
    pub fn new(publisher: P, topic_prefix: impl Into<String>) -> Self {
        Self {
            publisher,
            topic_prefix: topic_prefix.into(),
        }
    }

    /// Forward readings until every sender is gone.
    pub async fn run(&self, mut readings: mpsc::UnboundedReceiver<Reading>) {
        info!("Forwarding readings to {}/<address>", self.topic_prefix);
        while let Some(reading) = readings.recv().await {
            self.forward(&reading).await;
        }
        info!("Reading queue closed, forwarder stopping");
    }

    /// Publish one reading. Failures are logged and the reading dropped.
    pub async fn forward(&self, reading: &Reading) {
        let topic = reading_topic(&self.topic_prefix, &reading.device_address);
        let payload = reading_payload(reading).to_string();
        debug!("{} <- {}", topic, payload);
        if let Err(e) = self.publisher.publish(&topic, payload.into_bytes()).await {
            warn!("Failed to publish {}: {}", reading.measurement_key, e);
        }
    }
}

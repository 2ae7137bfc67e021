//! Durable, at-least-once topic publication (spec §4.7: "publish(topic,
//! record) delivers at least once; JSON payloads use stable keys with no
//! precision downcast").
//!
//! There is no external broker in this deployment, so `InMemoryDurableLog`
//! is the at-least-once store: once `publish` returns `Ok`, the record is
//! appended and never silently dropped. Payloads go through
//! `serde_json::Value`, whose object map is key-sorted, so the same record
//! always serializes to the same key order regardless of struct field
//! declaration order.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// The four topics SENTINEL publishes to (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    NormalizedTraffic,
    ExtractedFeatures,
    Anomalies,
    PolicyEvents,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::NormalizedTraffic => "normalized_traffic",
            Topic::ExtractedFeatures => "extracted_features",
            Topic::Anomalies => "anomalies",
            Topic::PolicyEvents => "policy_events",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("failed to serialize record for topic {0}: {1}")]
    SerializationFailed(String, String),
}

pub trait DurableLog: Send + Sync {
    /// Appends `payload` to `topic`. Must never silently drop a payload it
    /// accepts; an `Err` means nothing was written.
    fn publish(&self, topic: Topic, payload: serde_json::Value) -> Result<(), PublishError>;

    /// Returns everything published to `topic` so far, oldest first.
    /// Intended for tests and the (future) downstream-consumer surface,
    /// not a high-throughput read path.
    fn read_all(&self, topic: Topic) -> Vec<serde_json::Value>;

    fn len(&self, topic: Topic) -> usize;
}

/// Serializes `record` and publishes it, translating serialization failure
/// into `PublishError` rather than panicking.
pub fn publish_record<T: Serialize>(log: &dyn DurableLog, topic: Topic, record: &T) -> Result<(), PublishError> {
    let payload =
        serde_json::to_value(record).map_err(|e| PublishError::SerializationFailed(topic.as_str().to_string(), e.to_string()))?;
    log.publish(topic, payload)
}

#[derive(Default)]
pub struct InMemoryDurableLog {
    topics: Mutex<HashMap<&'static str, Vec<serde_json::Value>>>,
}

impl InMemoryDurableLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableLog for InMemoryDurableLog {
    fn publish(&self, topic: Topic, payload: serde_json::Value) -> Result<(), PublishError> {
        let mut topics = self.topics.lock();
        topics.entry(topic.as_str()).or_default().push(payload);
        metrics::counter!("sentinel_published_total", "topic" => topic.as_str()).increment(1);
        Ok(())
    }

    fn read_all(&self, topic: Topic) -> Vec<serde_json::Value> {
        self.topics.lock().get(topic.as_str()).cloned().unwrap_or_default()
    }

    fn len(&self, topic: Topic) -> usize {
        self.topics.lock().get(topic.as_str()).map(|v| v.len()).unwrap_or(0)
    }
}

//! Messages carried by the bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{BusError, BusResult};

/// Delivery priority. Higher priorities are drained first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl MessagePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePriority::Low => "low",
            MessagePriority::Normal => "normal",
            MessagePriority::High => "high",
            MessagePriority::Critical => "critical",
        }
    }
}

impl fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier for a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a new unique message ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message published on a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub topic: String,
    pub sender: String,
    pub payload: Value,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a normal-priority message
    pub fn new(topic: impl Into<String>, sender: impl Into<String>, payload: Value) -> Self {
        Self {
            id: MessageId::new(),
            topic: topic.into(),
            sender: sender.into(),
            payload,
            priority: MessagePriority::Normal,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> BusResult<String> {
        serde_json::to_string(self).map_err(|e| BusError::SerializationFailed(e.to_string()))
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> BusResult<Self> {
        serde_json::from_str(json).map_err(|e| BusError::DeserializationFailed(e.to_string()))
    }
}

//! Error types for bus operations

use thiserror::Error;

use crate::topic::TopicError;

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Errors that can occur during bus operations
#[derive(Error, Debug)]
pub enum BusError {
    /// Published topic failed validation
    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: TopicError },

    /// Subscription pattern failed validation
    #[error("Invalid topic pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: TopicError },

    /// Handler id is empty or otherwise unusable
    #[error("Invalid handler id: {0}")]
    InvalidHandlerId(String),

    /// Message serialization failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Message deserialization failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),
}

impl BusError {
    /// Get the error code suitable for logging or reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            BusError::InvalidTopic { .. } => "INVALID_TOPIC",
            BusError::InvalidPattern { .. } => "INVALID_TOPIC_PATTERN",
            BusError::InvalidHandlerId(_) => "INVALID_HANDLER_ID",
            BusError::SerializationFailed(_) => "SERIALIZATION_FAILED",
            BusError::DeserializationFailed(_) => "DESERIALIZATION_FAILED",
        }
    }
}

/// Failure reported by a message handler or an event sink.
///
/// Delivery failures never propagate to the publisher; the bus records them
/// in handler stats and the dead-letter queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Result type returned by handlers and sinks
pub type HandlerResult = Result<(), HandlerError>;

//! Error types for agents, the registry and configuration.

use thiserror::Error;

use crate::types::IdValidationError;

/// Errors raised by an invoked agent.
///
/// Orchestrators never propagate these raw; they wrap them into the failure
/// record of the handoff, task or node that made the call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    /// The agent ran and reported a failure.
    #[error("Agent execution failed: {0}")]
    ExecutionFailed(String),

    /// The agent did not answer in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The agent rejected its input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The agent is temporarily unable to serve requests.
    #[error("Agent unavailable: {0}")]
    Unavailable(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Shorthand for [`AgentError::ExecutionFailed`].
    pub fn failed(message: impl Into<String>) -> Self {
        AgentError::ExecutionFailed(message.into())
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Timeout(_) | AgentError::Unavailable(_))
    }

    /// Get the error code suitable for logging or reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            AgentError::ExecutionFailed(_) => "AGENT_EXECUTION_FAILED",
            AgentError::Timeout(_) => "AGENT_TIMEOUT",
            AgentError::InvalidInput(_) => "AGENT_INVALID_INPUT",
            AgentError::Unavailable(_) => "AGENT_UNAVAILABLE",
            AgentError::Internal(_) => "AGENT_INTERNAL_ERROR",
        }
    }
}

/// Result type for agent invocations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors raised by [`crate::AgentRegistry`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No agent is registered under the id.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// An agent is already registered under the id.
    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    /// The id failed validation.
    #[error("Invalid agent id '{id}': {reason}")]
    InvalidId {
        id: String,
        reason: IdValidationError,
    },
}

impl RegistryError {
    /// Get the error code suitable for logging or reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::AgentNotFound(_) => "AGENT_NOT_FOUND",
            RegistryError::DuplicateAgent(_) => "DUPLICATE_AGENT",
            RegistryError::InvalidId { .. } => "INVALID_AGENT_ID",
        }
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::failed("boom");
        assert_eq!(err.to_string(), "Agent execution failed: boom");

        let err = RegistryError::DuplicateAgent("writer".to_string());
        assert_eq!(err.to_string(), "Agent already registered: writer");
    }

    #[test]
    fn test_is_retryable() {
        assert!(AgentError::Timeout("slow".to_string()).is_retryable());
        assert!(AgentError::Unavailable("down".to_string()).is_retryable());
        assert!(!AgentError::InvalidInput("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_error_code() {
        assert_eq!(
            AgentError::failed("x").error_code(),
            "AGENT_EXECUTION_FAILED"
        );
        assert_eq!(
            RegistryError::AgentNotFound("a".to_string()).error_code(),
            "AGENT_NOT_FOUND"
        );
    }
}

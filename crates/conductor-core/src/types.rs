//! Validated identifiers shared across the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error type for ID validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdValidationError {
    /// The ID string is empty
    Empty,
    /// The ID contains only whitespace
    WhitespaceOnly,
    /// The ID has leading or trailing whitespace
    LeadingTrailingWhitespace,
    /// The ID contains invalid characters
    InvalidCharacters,
}

impl fmt::Display for IdValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "ID cannot be empty"),
            Self::WhitespaceOnly => write!(f, "ID cannot be whitespace-only"),
            Self::LeadingTrailingWhitespace => {
                write!(f, "ID cannot have leading or trailing whitespace")
            }
            Self::InvalidCharacters => write!(
                f,
                "ID can only contain alphanumeric characters, hyphens, underscores, and dots"
            ),
        }
    }
}

impl std::error::Error for IdValidationError {}

/// Validate an identifier string.
///
/// Valid IDs are non-empty, carry no leading/trailing whitespace and only use
/// alphanumeric characters, hyphens, underscores and dots.
pub fn validate_id(s: &str) -> Result<(), IdValidationError> {
    if s.is_empty() {
        return Err(IdValidationError::Empty);
    }

    if s.trim().is_empty() {
        return Err(IdValidationError::WhitespaceOnly);
    }

    if s != s.trim() {
        return Err(IdValidationError::LeadingTrailingWhitespace);
    }

    if !s
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(IdValidationError::InvalidCharacters);
    }

    Ok(())
}

/// Unique identifier for a registered agent
///
/// # Examples
///
/// ```
/// use conductor_core::AgentId;
///
/// assert!(AgentId::parse("researcher").is_ok());
/// assert!(AgentId::parse("writer.v2").is_ok());
/// assert!(AgentId::parse("").is_err());
/// assert!(AgentId::parse("agent/path").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    /// Parse and validate an agent ID from a string
    pub fn parse(id: impl AsRef<str>) -> Result<Self, IdValidationError> {
        let s = id.as_ref();
        validate_id(s)?;
        Ok(Self(s.to_string()))
    }

    /// Get the agent ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AgentId {
    type Err = IdValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AgentId {
    type Error = IdValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate_id(&s)?;
        Ok(Self(s))
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Availability of a registered agent, as last reported to the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Registered and free to take work
    #[default]
    Idle,
    /// Currently working on a request
    Busy,
    /// Temporarily not accepting work
    Offline,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_validation() {
        assert!(AgentId::parse("agent-1").is_ok());
        assert!(AgentId::parse("my_agent").is_ok());
        assert!(AgentId::parse("agent.123").is_ok());

        assert_eq!(AgentId::parse(""), Err(IdValidationError::Empty));
        assert_eq!(AgentId::parse("   "), Err(IdValidationError::WhitespaceOnly));
        assert_eq!(
            AgentId::parse(" agent"),
            Err(IdValidationError::LeadingTrailingWhitespace)
        );
        assert_eq!(
            AgentId::parse("agent/path"),
            Err(IdValidationError::InvalidCharacters)
        );
    }

    #[test]
    fn test_agent_id_serde() {
        let id = AgentId::parse("writer").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"writer\"");

        let back: AgentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<AgentId>("\"bad id\"").is_err());
    }
}

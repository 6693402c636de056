//! Topics and subscription patterns.
//!
//! Topics are dot-separated segments (`tasks.crew1.completed`). Patterns use
//! the same syntax plus two wildcards:
//!
//! - `*` matches exactly one segment (`tasks.*` matches `tasks.created`, not
//!   `tasks.a.b`)
//! - `#` as the final segment matches zero or more trailing segments
//!   (`workflow.#` matches `workflow`, `workflow.started` and
//!   `workflow.node.completed`)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason a topic or pattern was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// The string is empty
    Empty,
    /// A segment between dots is empty
    EmptySegment,
    /// A segment contains characters outside `[A-Za-z0-9_-]`
    InvalidCharacters(String),
    /// A wildcard appears in a published topic
    WildcardInTopic,
    /// `#` appears anywhere but the last segment
    MisplacedMultiWildcard,
}

impl fmt::Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "topic cannot be empty"),
            Self::EmptySegment => write!(f, "topic segments cannot be empty"),
            Self::InvalidCharacters(segment) => write!(
                f,
                "segment '{}' may only contain alphanumeric characters, hyphens and underscores",
                segment
            ),
            Self::WildcardInTopic => write!(f, "wildcards are only allowed in subscriptions"),
            Self::MisplacedMultiWildcard => write!(f, "'#' must be the last segment"),
        }
    }
}

impl std::error::Error for TopicError {}

fn validate_segment(segment: &str) -> Result<(), TopicError> {
    if segment.is_empty() {
        return Err(TopicError::EmptySegment);
    }
    if !segment
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(TopicError::InvalidCharacters(segment.to_string()));
    }
    Ok(())
}

/// Validate a concrete topic a message is published to.
pub fn validate_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    for segment in topic.split('.') {
        if segment == "*" || segment == "#" {
            return Err(TopicError::WildcardInTopic);
        }
        validate_segment(segment)?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    Single,
    Rest,
}

/// A parsed subscription pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    /// Parse and validate a pattern
    ///
    /// # Examples
    ///
    /// ```
    /// use conductor_bus::TopicPattern;
    ///
    /// let pattern = TopicPattern::parse("crew.task.*").unwrap();
    /// assert!(pattern.matches("crew.task.completed"));
    /// assert!(!pattern.matches("crew.task"));
    ///
    /// assert!(TopicPattern::parse("a.#.b").is_err());
    /// ```
    pub fn parse(pattern: impl AsRef<str>) -> Result<Self, TopicError> {
        let raw = pattern.as_ref();
        if raw.is_empty() {
            return Err(TopicError::Empty);
        }

        let parts: Vec<&str> = raw.split('.').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (i, part) in parts.into_iter().enumerate() {
            let segment = match part {
                "*" => Segment::Single,
                "#" if i == last => Segment::Rest,
                "#" => return Err(TopicError::MisplacedMultiWildcard),
                literal => {
                    validate_segment(literal)?;
                    Segment::Literal(literal.to_string())
                }
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The pattern as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains a wildcard
    pub fn is_wildcard(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Single | Segment::Rest))
    }

    /// Check whether a concrete topic matches this pattern
    pub fn matches(&self, topic: &str) -> bool {
        let mut parts = topic.split('.');

        for segment in &self.segments {
            match segment {
                Segment::Rest => return true,
                Segment::Single => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(expected) => match parts.next() {
                    Some(part) if part == expected => {}
                    _ => return false,
                },
            }
        }

        parts.next().is_none()
    }
}

impl TryFrom<String> for TopicPattern {
    type Error = TopicError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<TopicPattern> for String {
    fn from(pattern: TopicPattern) -> Self {
        pattern.raw
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("handoff.completed").is_ok());
        assert!(validate_topic("crew_1.task-2").is_ok());

        assert_eq!(validate_topic(""), Err(TopicError::Empty));
        assert_eq!(validate_topic("a..b"), Err(TopicError::EmptySegment));
        assert_eq!(validate_topic("tasks.*"), Err(TopicError::WildcardInTopic));
        assert!(matches!(
            validate_topic("a b"),
            Err(TopicError::InvalidCharacters(_))
        ));
    }

    #[test]
    fn test_exact_match() {
        let pattern = TopicPattern::parse("handoff.completed").unwrap();
        assert!(pattern.matches("handoff.completed"));
        assert!(!pattern.matches("handoff.failed"));
        assert!(!pattern.matches("handoff.completed.extra"));
        assert!(!pattern.is_wildcard());
    }

    #[test]
    fn test_single_wildcard() {
        let pattern = TopicPattern::parse("tasks.*").unwrap();
        assert!(pattern.matches("tasks.created"));
        assert!(!pattern.matches("tasks"));
        assert!(!pattern.matches("tasks.a.b"));

        let middle = TopicPattern::parse("crew.*.completed").unwrap();
        assert!(middle.matches("crew.task.completed"));
        assert!(!middle.matches("crew.task.failed"));
    }

    #[test]
    fn test_multi_wildcard() {
        let pattern = TopicPattern::parse("workflow.#").unwrap();
        assert!(pattern.matches("workflow"));
        assert!(pattern.matches("workflow.started"));
        assert!(pattern.matches("workflow.node.completed"));
        assert!(!pattern.matches("crew.task"));

        let all = TopicPattern::parse("#").unwrap();
        assert!(all.matches("anything.at.all"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert_eq!(
            TopicPattern::parse("a.#.b"),
            Err(TopicError::MisplacedMultiWildcard)
        );
        assert_eq!(TopicPattern::parse("a."), Err(TopicError::EmptySegment));
        assert_eq!(TopicPattern::parse(""), Err(TopicError::Empty));
    }

    #[test]
    fn test_pattern_serde() {
        let pattern = TopicPattern::parse("tasks.*").unwrap();
        let json = serde_json::to_string(&pattern).unwrap();
        assert_eq!(json, "\"tasks.*\"");

        let back: TopicPattern = serde_json::from_str(&json).unwrap();
        assert!(back.matches("tasks.done"));
    }
}

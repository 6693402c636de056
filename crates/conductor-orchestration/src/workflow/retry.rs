//! Per-node retry policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Maps a 1-based retry number to the delay before that retry.
#[derive(Clone)]
pub struct CustomBackoff(Arc<dyn Fn(u32) -> Duration + Send + Sync>);

impl fmt::Debug for CustomBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomBackoff")
    }
}

impl PartialEq for CustomBackoff {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// How the delay grows between attempts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Constant,
    /// `delay * retry`
    Linear,
    /// `delay * 2^(retry - 1)`, capped at `max_delay_ms`
    Exponential { max_delay_ms: u64 },
    #[serde(skip)]
    Custom(CustomBackoff),
}

/// Retry behaviour of an AGENT node.
///
/// ```rust
/// use conductor_orchestration::workflow::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential(4, Duration::from_millis(100), Duration::from_millis(500));
/// let base = Duration::from_secs(1);
/// assert_eq!(policy.delay_for(1, base), Duration::from_millis(100));
/// assert_eq!(policy.delay_for(3, base), Duration::from_millis(400));
/// assert_eq!(policy.delay_for(4, base), Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay; the engine's default applies when unset.
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Fixed delay between attempts.
    pub fn constant(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay_ms: Some(delay.as_millis() as u64),
            backoff: Backoff::Constant,
        }
    }

    pub fn linear(max_retries: u32, delay: Duration) -> Self {
        Self {
            backoff: Backoff::Linear,
            ..Self::constant(max_retries, delay)
        }
    }

    pub fn exponential(max_retries: u32, delay: Duration, max_delay: Duration) -> Self {
        Self {
            backoff: Backoff::Exponential {
                max_delay_ms: max_delay.as_millis() as u64,
            },
            ..Self::constant(max_retries, delay)
        }
    }

    /// Delay computed by `f` from the 1-based retry number.
    pub fn custom<F>(max_retries: u32, f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self {
            max_retries,
            delay_ms: None,
            backoff: Backoff::Custom(CustomBackoff(Arc::new(f))),
        }
    }

    /// Retries only, using the engine's default delay.
    pub fn retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32, default_delay: Duration) -> Duration {
        let base = self
            .delay_ms
            .map(Duration::from_millis)
            .unwrap_or(default_delay);
        let retry = retry.max(1);

        match &self.backoff {
            Backoff::Constant => base,
            Backoff::Linear => base.saturating_mul(retry),
            Backoff::Exponential { max_delay_ms } => {
                let factor = 2u32.saturating_pow(retry - 1);
                base.saturating_mul(factor)
                    .min(Duration::from_millis(*max_delay_ms))
            }
            Backoff::Custom(CustomBackoff(f)) => f(retry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_uses_default_when_unset() {
        let policy = RetryPolicy::retries(2);
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(
            policy.delay_for(2, Duration::from_millis(30)),
            Duration::from_millis(30)
        );
    }

    #[test]
    fn test_linear_growth() {
        let policy = RetryPolicy::linear(3, Duration::from_millis(10));
        assert_eq!(policy.delay_for(1, Duration::ZERO), Duration::from_millis(10));
        assert_eq!(policy.delay_for(3, Duration::ZERO), Duration::from_millis(30));
    }

    #[test]
    fn test_custom_backoff() {
        let policy = RetryPolicy::custom(5, |n| Duration::from_millis(u64::from(n) * 7));
        assert_eq!(policy.delay_for(2, Duration::ZERO), Duration::from_millis(14));
    }

    #[test]
    fn test_serde_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_retries": 2}"#).unwrap();
        assert_eq!(policy, RetryPolicy::retries(2));

        let exp: RetryPolicy = serde_json::from_str(
            r#"{"max_retries": 1, "delay_ms": 5, "backoff": {"kind": "exponential", "max_delay_ms": 50}}"#,
        )
        .unwrap();
        assert_eq!(
            exp,
            RetryPolicy::exponential(1, Duration::from_millis(5), Duration::from_millis(50))
        );
    }
}

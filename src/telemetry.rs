//! Tracing subscriber setup.

use conductor_core::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber configured from `config`.
///
/// `RUST_LOG` overrides `config.level`. Returns `false` when a global
/// subscriber was already installed, in which case nothing changes.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(&config.level));

    let installed = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::debug!(level = %config.level, json = config.json, "Initialized tracing");
    }
    installed
}

fn default_filter(level: &str) -> EnvFilter {
    match EnvFilter::try_new(level) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info"), // fallback for an unparsable directive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}

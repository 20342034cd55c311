//! Tracing subscriber setup.

use meshtrace_core::{ConfigError, MeshtraceResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "meshtrace=info,info";

/// Logging configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Filter directives applied when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json: false,
            default_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read `MESHTRACE_LOG_JSON` (`true`/`1`) and `MESHTRACE_LOG_FILTER`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            json: std::env::var("MESHTRACE_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(defaults.json),
            default_filter: std::env::var("MESHTRACE_LOG_FILTER")
                .unwrap_or(defaults.default_filter),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. Fails if the filter does not parse or a global
/// subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> MeshtraceResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.default_filter).map_err(|e| {
            ConfigError::InvalidValue {
                field: "default_filter".to_string(),
                value: config.default_filter.clone(),
                reason: e.to_string(),
            }
        })?,
    };

    let json_layer = config.json.then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| ConfigError::InvalidValue {
            field: "subscriber".to_string(),
            value: "global".to_string(),
            reason: e.to_string(),
        })?;

    tracing::info!(json = config.json, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert!(!config.json);
        assert_eq!(config.default_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig::default();
        // Another test may already have installed a subscriber; either way
        // the second call must fail rather than panic.
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}

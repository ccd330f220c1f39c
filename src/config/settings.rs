// Configuration structs

use super::constants::{DEFAULT_LOG_FILTER, DEFAULT_SCHEDULER_NAME, MAX_EARLY_TOLERANCE_MS};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};

/// Scheduler behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Label attached to every log event from this scheduler
    pub name: String,

    /// A popped task whose deadline is at most this far in the future is
    /// run anyway instead of being requeued (absorbs timer coarseness)
    pub early_tolerance_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SCHEDULER_NAME.to_string(),
            early_tolerance_ms: 0, // Strict: never run before the deadline
        }
    }
}

impl SchedulerConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The tolerance as a duration, clamped to [`MAX_EARLY_TOLERANCE_MS`].
    pub fn early_tolerance(&self) -> chrono::Duration {
        let ms = self.early_tolerance_ms.min(MAX_EARLY_TOLERANCE_MS);
        chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "scheduler.name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.early_tolerance_ms > MAX_EARLY_TOLERANCE_MS {
            return Err(ConfigError::Invalid {
                field: "scheduler.early_tolerance_ms",
                reason: format!(
                    "{} exceeds the maximum of {}",
                    self.early_tolerance_ms, MAX_EARLY_TOLERANCE_MS
                ),
            });
        }
        Ok(())
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive (e.g. "info", "greedy_sched=debug").
    /// `RUST_LOG` takes precedence when set.
    pub filter: String,

    /// Colourise output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            ansi: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse and validate a TOML document. Missing sections and fields
    /// fall back to their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scheduler.name, DEFAULT_SCHEDULER_NAME);
        assert_eq!(config.scheduler.early_tolerance_ms, 0);
        assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_document() {
        let config = Config::from_toml_str(
            r#"
            [scheduler]
            name = "billing"

            [logging]
            filter = "greedy_sched=debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.name, "billing");
        assert_eq!(config.scheduler.early_tolerance_ms, 0);
        assert_eq!(config.logging.filter, "greedy_sched=debug");
        assert!(config.logging.ansi);
    }

    #[test]
    fn test_rejects_empty_name() {
        let err = Config::from_toml_str("[scheduler]\nname = \"  \"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "scheduler.name", .. }));
    }

    #[test]
    fn test_rejects_large_tolerance() {
        let err = Config::from_toml_str("[scheduler]\nearly_tolerance_ms = 600000\n").unwrap_err();
        assert!(err.to_string().contains("early_tolerance_ms"));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = Config::from_toml_str("[scheduler\nname = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_early_tolerance_duration() {
        let config = SchedulerConfig {
            early_tolerance_ms: 5,
            ..SchedulerConfig::named("t")
        };
        assert_eq!(config.early_tolerance(), chrono::Duration::milliseconds(5));
    }

    #[test]
    fn test_early_tolerance_is_clamped() {
        let max = chrono::Duration::milliseconds(MAX_EARLY_TOLERANCE_MS as i64);
        for early_tolerance_ms in [MAX_EARLY_TOLERANCE_MS + 1, 1 << 62, u64::MAX] {
            let config = SchedulerConfig {
                early_tolerance_ms,
                ..SchedulerConfig::named("t")
            };
            assert_eq!(config.early_tolerance(), max);
        }
    }
}

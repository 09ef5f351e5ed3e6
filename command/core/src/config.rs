//! Arbiter configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for one robot's arbiter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Furthest a command end time may lie beyond robot time, in milliseconds.
    pub max_command_horizon_ms: u64,
    /// Number of retired command instances kept resolvable for feedback.
    pub history_depth: usize,
    /// Number of evicted instances whose terminal status stays reportable.
    pub retired_status_depth: usize,
    /// Period of the background expiry check, in milliseconds.
    pub expire_tick_interval_ms: u64,
    /// Resource name managed by the in-process lease authority.
    pub lease_resource: String,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            max_command_horizon_ms: 30_000,
            history_depth: 8,
            retired_status_depth: 4_096,
            expire_tick_interval_ms: 20,
            lease_resource: "body".into(),
        }
    }
}

/// Configuration load failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading arbiter config {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`ArbiterConfig`].
    #[error("parsing arbiter config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid arbiter config: {0}")]
    Invalid(String),
}

impl ArbiterConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ArbiterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Reject values the arbiter cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_depth == 0 {
            return Err(ConfigError::Invalid("history_depth must be at least 1".into()));
        }
        if self.expire_tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "expire_tick_interval_ms must be at least 1".into(),
            ));
        }
        if self.max_command_horizon_ms == 0 {
            return Err(ConfigError::Invalid(
                "max_command_horizon_ms must be at least 1".into(),
            ));
        }
        if self.lease_resource.is_empty() {
            return Err(ConfigError::Invalid("lease_resource must not be empty".into()));
        }
        Ok(())
    }

    /// Expiry tick period.
    pub fn expire_tick_interval(&self) -> Duration {
        Duration::from_millis(self.expire_tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = ArbiterConfig::from_toml("history_depth = 2\n").unwrap();
        assert_eq!(config.history_depth, 2);
        assert_eq!(config.max_command_horizon_ms, 30_000);
        assert_eq!(config.lease_resource, "body");
        assert_eq!(config.retired_status_depth, 4_096);
    }

    #[test]
    fn zero_history_rejected() {
        let err = ArbiterConfig::from_toml("history_depth = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_command_horizon_ms = 5000").unwrap();
        writeln!(file, "expire_tick_interval_ms = 5").unwrap();
        let config = ArbiterConfig::load(file.path()).unwrap();
        assert_eq!(config.max_command_horizon_ms, 5_000);
        assert_eq!(config.expire_tick_interval(), Duration::from_millis(5));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ArbiterConfig::load("/nonexistent/arbiter.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/arbiter.toml"));
    }
}

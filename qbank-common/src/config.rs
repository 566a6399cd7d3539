//! Service configuration loading
//!
//! Priority order, highest first:
//! 1. Command-line arguments (applied by the binary)
//! 2. `QBANK_*` environment variables
//! 3. TOML config file
//! 4. Compiled defaults

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default HTTP port for the staging service
pub const DEFAULT_PORT: u16 = 5731;

/// Default similarity threshold for duplicate detection.
/// Calibrated empirically against human-judged similarity; pairs scoring
/// at or above this are surfaced for review.
pub const DEFAULT_THRESHOLD: f64 = 0.65;

/// Duplicate detection policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Similarity threshold in [0, 1]
    pub threshold: f64,
    /// Restrict comparison to same-topic pairs (lower cost, lower recall).
    /// Operator policy, not a hardcoded default.
    pub same_topic_only: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            same_topic_only: false,
        }
    }
}

/// Staging service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP listen port
    pub port: u16,
    /// SQLite database path
    pub database: PathBuf,
    /// Duplicate detection policy
    pub detection: DetectionConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database: default_database_path(),
            detection: DetectionConfig::default(),
        }
    }
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("qbank")
        .join("qbank.db")
}

impl ServiceConfig {
    /// Load configuration from an optional TOML file, then apply
    /// `QBANK_*` environment overrides.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content).map_err(|e| {
                    Error::Config(format!("Failed to parse {}: {}", path.display(), e))
                })?
            }
            None => Self::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `QBANK_PORT`, `QBANK_DATABASE`, `QBANK_THRESHOLD` and
    /// `QBANK_SAME_TOPIC_ONLY` overrides.
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("QBANK_PORT") {
            self.port = port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid QBANK_PORT: {}", port)))?;
        }
        if let Ok(database) = std::env::var("QBANK_DATABASE") {
            self.database = PathBuf::from(database);
        }
        if let Ok(threshold) = std::env::var("QBANK_THRESHOLD") {
            self.detection.threshold = threshold
                .parse()
                .map_err(|_| Error::Config(format!("Invalid QBANK_THRESHOLD: {}", threshold)))?;
        }
        if let Ok(flag) = std::env::var("QBANK_SAME_TOPIC_ONLY") {
            self.detection.same_topic_only = match flag.as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(Error::Config(format!(
                        "Invalid QBANK_SAME_TOPIC_ONLY: {}",
                        other
                    )))
                }
            };
        }
        Ok(())
    }

    /// Validate configured values
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detection.threshold) {
            return Err(Error::Config(format!(
                "Similarity threshold must be in [0, 1], got {}",
                self.detection.threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        std::env::remove_var("QBANK_PORT");
        std::env::remove_var("QBANK_DATABASE");
        std::env::remove_var("QBANK_THRESHOLD");
        std::env::remove_var("QBANK_SAME_TOPIC_ONLY");
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = ServiceConfig::load(None).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.detection.threshold, DEFAULT_THRESHOLD);
        assert!(!config.detection.same_topic_only);
    }

    #[test]
    #[serial]
    fn test_toml_file() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
port = 6000
database = "/tmp/test-qbank.db"

[detection]
threshold = 0.8
same_topic_only = true
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = ServiceConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.database, PathBuf::from("/tmp/test-qbank.db"));
        assert_eq!(config.detection.threshold, 0.8);
        assert!(config.detection.same_topic_only);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("QBANK_PORT", "7000");
        std::env::set_var("QBANK_THRESHOLD", "0.9");
        std::env::set_var("QBANK_SAME_TOPIC_ONLY", "true");

        let config = ServiceConfig::load(None).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.detection.threshold, 0.9);
        assert!(config.detection.same_topic_only);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_threshold_out_of_range_rejected() {
        clear_env();
        std::env::set_var("QBANK_THRESHOLD", "1.5");
        let result = ServiceConfig::load(None);
        assert!(matches!(result, Err(Error::Config(_))));
        clear_env();
    }
}

//! Configuration for the posture pipeline.
//!
//! A single [`PipelineConfig`] value is built once (defaults, config file, CLI
//! overrides) and then handed to every component. Nothing reads ambient globals.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Signal columns written by the device, in the order features are emitted.
pub const DEFAULT_CHANNELS: [&str; 9] = [
    "pitch1",
    "roll1",
    "pitch2",
    "roll2",
    "delta_pitch",
    "fsr1_scaled",
    "fsr2_scaled",
    "fsr_total",
    "fsr_balance",
];

#[cfg(target_os = "windows")]
const DEFAULT_PORT: &str = "COM5";
#[cfg(not(target_os = "windows"))]
const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Main configuration shared by capture, windowing and export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Serial port the device is attached to
    pub port: String,

    /// Serial baud rate
    pub baud: u32,

    /// Length of a complete recording session
    #[serde(with = "duration_secs")]
    pub session_duration: Duration,

    /// Wait between attempts to open the serial port
    #[serde(with = "duration_millis")]
    pub retry_backoff: Duration,

    /// Upper bound on a single blocking serial read
    #[serde(with = "duration_millis")]
    pub read_timeout: Duration,

    /// Samples per window (50 = 1 s at 50 Hz)
    pub window_size: usize,

    /// Samples between consecutive window starts
    pub step_size: usize,

    /// Fixed, ordered channel list; feature order derives from it
    pub channels: Vec<String>,

    /// File-name prefixes searched when loading sessions, in discovery order
    pub label_groups: Vec<String>,

    /// Directory where sessions are written and discovered
    pub data_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud: 115_200,
            session_duration: Duration::from_secs(120),
            retry_backoff: Duration::from_secs(2),
            read_timeout: Duration::from_secs(1),
            window_size: 50,
            step_size: 25,
            channels: DEFAULT_CHANNELS.iter().map(|c| c.to_string()).collect(),
            label_groups: vec!["good".to_string(), "bad".to_string()],
            data_dir: PathBuf::from("."),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the default location, or defaults if absent.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to an explicit file.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("posture-pipeline")
            .join("config.json")
    }

    /// Reject configurations that would make windowing or capture meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::Invalid("window_size must be at least 1".into()));
        }
        if self.step_size == 0 {
            return Err(ConfigError::Invalid("step_size must be at least 1".into()));
        }
        if self.session_duration.is_zero() {
            return Err(ConfigError::Invalid(
                "session_duration must be positive".into(),
            ));
        }
        if self.channels.is_empty() {
            return Err(ConfigError::Invalid("channel list is empty".into()));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "channel '{channel}' listed twice"
                )));
            }
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration stored as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for Duration stored as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.baud, 115_200);
        assert_eq!(config.session_duration, Duration::from_secs(120));
        assert_eq!(config.window_size, 50);
        assert_eq!(config.step_size, 25);
        assert_eq!(config.channels.len(), 9);
        assert_eq!(config.channels[0], "pitch1");
        assert_eq!(config.channels[8], "fsr_balance");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_step() {
        let config = PipelineConfig {
            step_size: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_channel() {
        let config = PipelineConfig {
            channels: vec!["a".into(), "b".into(), "a".into()],
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"window_size": 10, "session_duration": 30}"#).unwrap();
        assert_eq!(config.window_size, 10);
        assert_eq!(config.session_duration, Duration::from_secs(30));
        assert_eq!(config.step_size, 25);
        assert_eq!(config.retry_backoff, Duration::from_secs(2));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = PipelineConfig {
            port: "/dev/ttyACM0".into(),
            step_size: 10,
            ..PipelineConfig::default()
        };
        config.save_to(&path).unwrap();

        let loaded = PipelineConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }
}

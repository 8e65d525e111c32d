//! Configuration for Setu
//!
//! Loads configuration from an optional TOML file. Every section and field
//! has a default matching the download firmware, so an empty file (or no
//! file at all) gives a working setup.

use crate::error::Result;
use crate::protocol::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS, DEFAULT_RESPONSE_TIMEOUT_MS,
    DEFAULT_SETTLE_DELAY_MS,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level uploader configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    pub serial: SerialConfig,
    pub timing: TimingConfig,
    pub input: InputConfig,
    pub logging: LoggingConfig,
}

/// Serial link configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial port path; the command line argument takes precedence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Upper bound a single port read may block
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// How the host decides the device finished a slow phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// Sleep for the settle delay, then read responses (existing firmware)
    #[default]
    FixedDelay,
    /// Continue as soon as the device answers, waiting at most
    /// settle delay + response timeout
    Acknowledged,
}

/// Handshake pacing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait for one response line
    pub response_timeout_ms: u64,
    /// Settle delay after erase confirmation and prepare commands
    pub settle_delay_ms: u64,
    pub readiness: Readiness,
    /// Fail the session when a response never arrives
    pub strict_responses: bool,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            readiness: Readiness::FixedDelay,
            strict_responses: false,
        }
    }
}

impl TimingConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Timing suitable for simulated devices: no settle delay, short timeouts
    pub fn immediate() -> Self {
        Self {
            response_timeout_ms: 50,
            settle_delay_ms: 0,
            readiness: Readiness::FixedDelay,
            strict_responses: false,
        }
    }
}

/// Input file discovery
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InputConfig {
    /// Directory holding the partitioner output
    pub data_dir: PathBuf,
    pub coordinator_file: String,
    /// Worker file name; `{id}` is replaced by the MCU index
    pub worker_file_pattern: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("../pc_code/Simulation/Simu_q"),
            coordinator_file: "Coordinator.json".to_string(),
            worker_file_pattern: "worker_{id}.json".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl UploadConfig {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use setu::config::UploadConfig;
    ///
    /// let config = UploadConfig::from_file("setu.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: UploadConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UploadConfig::default();
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.timing.response_timeout(), Duration::from_secs(5));
        assert_eq!(config.timing.settle_delay(), Duration::from_secs(10));
        assert_eq!(config.timing.readiness, Readiness::FixedDelay);
        assert!(!config.timing.strict_responses);
        assert_eq!(config.input.coordinator_file, "Coordinator.json");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: UploadConfig = toml::from_str("").unwrap();
        assert_eq!(config.serial.port, None);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[serial]
port = "/dev/ttyACM0"
baud_rate = 57600

[timing]
settle_delay_ms = 2500
readiness = "acknowledged"
strict_responses = true

[input]
data_dir = "/data/partition"
"#;

        let config: UploadConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.serial.baud_rate, 57600);
        assert_eq!(config.serial.read_timeout_ms, 10);
        assert_eq!(config.timing.settle_delay(), Duration::from_millis(2500));
        assert_eq!(config.timing.response_timeout_ms, 5000);
        assert_eq!(config.timing.readiness, Readiness::Acknowledged);
        assert!(config.timing.strict_responses);
        assert_eq!(config.input.data_dir, PathBuf::from("/data/partition"));
        assert_eq!(config.input.worker_file_pattern, "worker_{id}.json");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setu.toml");

        let mut config = UploadConfig::default();
        config.timing.readiness = Readiness::Acknowledged;
        config.to_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[timing]"));
        assert!(text.contains("readiness = \"acknowledged\""));

        let loaded = UploadConfig::from_file(&path).unwrap();
        assert_eq!(loaded.timing.readiness, Readiness::Acknowledged);
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::{
    core::{
        history::{RECORD_INTERVAL_SECS, STARTUP_GRACE_SECS},
        poller::AcquisitionSettings,
    },
    protocol::{LineEnding, SerialConfig, SessionSettings, DEFAULT_PROMPTS, LEGACY_TIMEOUT},
};

/// Monitor configuration, usually read from a JSON file.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Serial device of the controller console
    pub port_name: Option<String>,
    pub baud_rate: u32,
    pub line_ending: LineEnding,
    /// Prompt suffixes that end a reply
    pub prompts: Vec<String>,
    pub command_timeout_ms: u64,
    pub resync_timeout_ms: u64,
    /// Timeout for the `pwrsys` current fallback
    pub fallback_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Balance history file; history stays in memory when unset
    pub history_file: Option<PathBuf>,
    pub history_interval_secs: u32,
    pub startup_grace_secs: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            port_name: None,
            baud_rate: 115_200,
            line_ending: LineEnding::Cr,
            prompts: DEFAULT_PROMPTS.iter().map(|p| p.to_string()).collect(),
            command_timeout_ms: 4000,
            resync_timeout_ms: 700,
            fallback_timeout_ms: 3000,
            poll_interval_ms: 10_000,
            history_file: None,
            history_interval_secs: RECORD_INTERVAL_SECS,
            startup_grace_secs: STARTUP_GRACE_SECS,
        }
    }
}

impl MonitorConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Read configuration from a file
    pub fn from_file(file_path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read config file {file_path}"))?;
        Self::from_json(&content).with_context(|| format!("Invalid config file {file_path}"))
    }

    /// Convert to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), crate::core::MonitorError> {
        use crate::core::MonitorError;

        if self.prompts.iter().all(|p| p.is_empty()) {
            return Err(MonitorError::Config(
                "at least one non-empty prompt is required".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(MonitorError::Config("baud rate must be positive".to_string()));
        }
        if self.history_interval_secs == 0 {
            return Err(MonitorError::Config(
                "history interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn serial(&self) -> SerialConfig {
        SerialConfig::with_baud(self.baud_rate)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            line_ending: self.line_ending,
            prompts: self
                .prompts
                .iter()
                .filter(|p| !p.is_empty())
                .cloned()
                .collect(),
            resync_timeout: Duration::from_millis(self.resync_timeout_ms),
            ..Default::default()
        }
    }

    pub fn acquisition_settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            module_timeout: Duration::from_millis(self.fallback_timeout_ms),
            fallback_timeout: Duration::from_millis(self.fallback_timeout_ms),
            legacy_timeout: LEGACY_TIMEOUT,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = MonitorConfig::from_json("{}").unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.prompts, vec!["pylon>", "pylon_debug>"]);
        assert_eq!(config.history_interval_secs, 900);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = MonitorConfig {
            port_name: Some("/dev/ttyUSB0".to_string()),
            line_ending: LineEnding::Crlf,
            history_file: Some(PathBuf::from("/var/lib/pylonmon/balance_history.dat")),
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        assert!(json.contains("\"line_ending\": \"crlf\""));

        let parsed = MonitorConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_config_and_settings() {
        let config = MonitorConfig::from_json(
            r#"{"baud_rate": 9600, "resync_timeout_ms": 250, "prompts": ["", "bms>"]}"#,
        )
        .unwrap();
        assert_eq!(config.serial().baud, 9600);
        let session = config.session_settings();
        assert_eq!(session.prompts, vec!["bms>"]);
        assert_eq!(session.resync_timeout, Duration::from_millis(250));
        assert_eq!(
            config.acquisition_settings().command_timeout,
            Duration::from_millis(4000)
        );
    }

    #[test]
    fn test_validate_rejects_empty_prompts() {
        let config = MonitorConfig {
            prompts: vec![String::new()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pylonmon.json");
        std::fs::write(&path, r#"{"port_name": "COM3"}"#).unwrap();
        let config = MonitorConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.port_name.as_deref(), Some("COM3"));
        assert!(MonitorConfig::from_file("/nonexistent/pylonmon.json").is_err());
    }
}

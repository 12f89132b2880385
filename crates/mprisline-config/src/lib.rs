#![deny(unsafe_code)]

//! Configuration loading and validation for mprisline.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] is the
//! central configuration structure; every section falls back to defaults so
//! an empty file (or no file at all) yields a usable daemon.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon behaviour.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Where the dialogue and control lines are read and written.
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the daemon process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Application name; the bus name becomes `org.mpris.MediaPlayer2.<app_name>`.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// How often queued client signals are polled, in milliseconds.
    #[serde(default = "default_signal_poll_interval_ms")]
    pub signal_poll_interval_ms: u64,

    /// Pause between retries of an interrupted line read, in milliseconds.
    #[serde(default = "default_read_retry_delay_ms")]
    pub read_retry_delay_ms: u64,

    /// Register on the session bus at startup instead of waiting for `mpris:on`.
    #[serde(default)]
    pub start_service: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            signal_poll_interval_ms: default_signal_poll_interval_ms(),
            read_retry_delay_ms: default_read_retry_delay_ms(),
            start_service: false,
        }
    }
}

fn default_app_name() -> String {
    "mprisline".to_string()
}

fn default_signal_poll_interval_ms() -> u64 {
    500
}

fn default_read_retry_delay_ms() -> u64 {
    1000
}

/// Paths of the client pipes.
///
/// The dialogue pair carries the request/response protocol; the control pair
/// carries unsolicited `mpris:` commands from the client. Descriptors
/// inherited from the parent are reachable through `/dev/fd/<n>`.
///
/// ## TOML Example
///
/// ```toml
/// [channels]
/// dialogue_input = "/dev/stdin"
/// dialogue_output = "/dev/stdout"
/// control_input = "/dev/fd/3"
/// control_output = "/dev/fd/4"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default = "default_dialogue_input")]
    pub dialogue_input: String,

    #[serde(default = "default_dialogue_output")]
    pub dialogue_output: String,

    #[serde(default = "default_control_input")]
    pub control_input: String,

    /// Where `FAIL:blocked` notices go; without it they are only logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_output: Option<String>,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            dialogue_input: default_dialogue_input(),
            dialogue_output: default_dialogue_output(),
            control_input: default_control_input(),
            control_output: None,
        }
    }
}

fn default_dialogue_input() -> String {
    "/dev/stdin".to_string()
}

fn default_dialogue_output() -> String {
    "/dev/stdout".to_string()
}

fn default_control_input() -> String {
    "/dev/fd/3".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Append log output to this file instead of stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Bus name elements may hold `[A-Za-z0-9_-]` and must not start with a digit.
fn is_bus_name_element(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '-' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_bus_name_element(&self.daemon.app_name) {
            return Err(ConfigError::Validation(format!(
                "daemon.app_name must be a valid bus name element, got {:?}",
                self.daemon.app_name
            )));
        }
        if self.daemon.signal_poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "daemon.signal_poll_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.daemon.read_retry_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "daemon.read_retry_delay_ms must be non-zero".to_string(),
            ));
        }

        let channels = [
            ("channels.dialogue_input", &self.channels.dialogue_input),
            ("channels.dialogue_output", &self.channels.dialogue_output),
            ("channels.control_input", &self.channels.control_input),
        ];
        for (key, path) in channels {
            if path.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{key} must not be empty"
                )));
            }
        }
        if self.channels.control_output.as_deref() == Some("") {
            return Err(ConfigError::Validation(
                "channels.control_output must not be empty when set".to_string(),
            ));
        }
        // Two readers on one pipe would steal each other's lines.
        if self.channels.control_input == self.channels.dialogue_input {
            return Err(ConfigError::Validation(
                "channels.control_input must differ from channels.dialogue_input".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }

    /// The bus name requested first when the service starts.
    pub fn bus_name(&self) -> String {
        format!("org.mpris.MediaPlayer2.{}", self.daemon.app_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.daemon.app_name, "mprisline");
        assert_eq!(config.daemon.signal_poll_interval_ms, 500);
        assert_eq!(config.daemon.read_retry_delay_ms, 1000);
        assert!(!config.daemon.start_service);
        assert_eq!(config.channels.dialogue_input, "/dev/stdin");
        assert_eq!(config.channels.control_output, None);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.daemon.signal_poll_interval_ms, 500);
        assert_eq!(config.bus_name(), "org.mpris.MediaPlayer2.mprisline");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [daemon]
            app_name = "wxmav"
            signal_poll_interval_ms = 250
            read_retry_delay_ms = 100
            start_service = true

            [channels]
            dialogue_input = "/dev/fd/5"
            dialogue_output = "/dev/fd/6"
            control_input = "/dev/fd/7"
            control_output = "/dev/fd/8"

            [logging]
            level = "debug"
            file = "/tmp/mprisline.log"
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(config.daemon.app_name, "wxmav");
        assert_eq!(config.daemon.signal_poll_interval_ms, 250);
        assert!(config.daemon.start_service);
        assert_eq!(config.channels.control_output.as_deref(), Some("/dev/fd/8"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file.as_deref(), Some("/tmp/mprisline.log"));
        assert_eq!(config.bus_name(), "org.mpris.MediaPlayer2.wxmav");
    }

    // ── Validation ──────────────────────────────────────────────────

    #[test]
    fn test_validation_rejects_bad_app_name() {
        for name in ["", "9lives", "has.dot", "sp ace"] {
            let toml = format!("[daemon]\napp_name = {name:?}\n");
            let result = AppConfig::parse(&toml);
            assert!(
                matches!(result, Err(ConfigError::Validation(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let toml = r#"
            [daemon]
            signal_poll_interval_ms = 0
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_retry_delay() {
        let toml = r#"
            [daemon]
            read_retry_delay_ms = 0
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_shared_input() {
        let toml = r#"
            [channels]
            dialogue_input = "/dev/fd/3"
            control_input = "/dev/fd/3"
        "#;
        let err = AppConfig::parse(toml).unwrap_err();
        assert!(err.to_string().contains("control_input"));
    }

    #[test]
    fn test_validation_rejects_empty_paths() {
        let toml = r#"
            [channels]
            dialogue_output = ""
        "#;
        assert!(AppConfig::parse(toml).is_err());

        let toml = r#"
            [channels]
            control_output = ""
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_level() {
        let toml = r#"
            [logging]
            level = "loud"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_parse_rejects_bad_toml() {
        let result = AppConfig::parse("[daemon\napp_name = 1");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    // ── Loading ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mprisline.toml");
        tokio::fs::write(&path, "[daemon]\napp_name = \"player_one\"\n")
            .await
            .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.daemon.app_name, "player_one");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = AppConfig::load(&dir.path().join("absent.toml")).await;
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = AppConfig::default();
        config.channels.control_output = Some("/dev/fd/4".to_string());
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = AppConfig::parse(&text).unwrap();
        assert_eq!(parsed.channels.control_output, config.channels.control_output);
        assert_eq!(parsed.daemon.app_name, config.daemon.app_name);
    }
}

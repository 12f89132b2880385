//! Temporary config files.
//!
//! Helpers for loading [`AppConfig`] from a real TOML file on disk, the way
//! the binary does.

use std::path::PathBuf;

use mprisline_config::{AppConfig, ConfigError};
use tempfile::TempDir;

/// A config file inside an owned temp directory.
///
/// The temp directory is deleted automatically when this value is dropped,
/// guaranteeing cleanup even on panic.
pub struct TempConfig {
    pub path: PathBuf,
    _temp_dir: TempDir,
}

impl TempConfig {
    /// Write `toml_content` to a fresh `mprisline.toml`.
    pub async fn with_toml(toml_content: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("mprisline.toml");
        tokio::fs::write(&path, toml_content)
            .await
            .expect("failed to write test config");

        Self {
            path,
            _temp_dir: temp_dir,
        }
    }

    /// A path inside the temp directory that does not exist yet.
    pub fn sibling(&self, name: &str) -> PathBuf {
        self.path.with_file_name(name)
    }

    pub async fn load(&self) -> Result<AppConfig, ConfigError> {
        AppConfig::load(&self.path).await
    }

    /// Overwrite the file with new content.
    pub async fn write(&self, toml_content: &str) {
        tokio::fs::write(&self.path, toml_content)
            .await
            .expect("failed to write updated config");
    }
}

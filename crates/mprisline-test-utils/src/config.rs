//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use mprisline_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// Defaults to a fast poll interval so reactor tests do not wait long.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .app_name("vlc")
///     .start_service(true)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.daemon.signal_poll_interval_ms = 10;
        config.daemon.read_retry_delay_ms = 10;
        Self { config }
    }

    pub fn app_name(mut self, name: &str) -> Self {
        self.config.daemon.app_name = name.to_string();
        self
    }

    pub fn signal_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.daemon.signal_poll_interval_ms = ms;
        self
    }

    pub fn start_service(mut self, start: bool) -> Self {
        self.config.daemon.start_service = start;
        self
    }

    pub fn control_output(mut self, path: &str) -> Self {
        self.config.channels.control_output = Some(path.to_string());
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

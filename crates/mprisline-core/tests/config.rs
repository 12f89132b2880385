//! Configuration as the daemon and logging setup see it.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use mprisline_core::daemon::Daemon;
use mprisline_core::engine::ProtocolEngine;
use mprisline_core::logging::filter_directive;
use mprisline_test_utils::{
    init_test_tracing, RecordingBus, ScriptedClient, TempConfig, TestConfigBuilder,
};

#[tokio::test]
async fn test_file_settings_reach_the_daemon() {
    init_test_tracing();
    let file = TempConfig::with_toml(
        r#"
        [daemon]
        app_name = "radio"
        signal_poll_interval_ms = 250

        [logging]
        level = "warn"
        "#,
    )
    .await;
    let config = file.load().await.unwrap();
    assert_eq!(filter_directive(&config.logging, 0), "warn");

    let (channel, _client) = ScriptedClient::channel();
    let (bus, _log) = RecordingBus::new();
    let daemon = Daemon::new(config, Arc::new(ProtocolEngine::new(channel)), bus);
    assert_eq!(daemon.config().daemon.app_name, "radio");
    assert_eq!(daemon.config().daemon.signal_poll_interval_ms, 250);
    assert_eq!(daemon.config().bus_name(), "org.mpris.MediaPlayer2.radio");
}

#[tokio::test]
async fn test_rewritten_file_is_revalidated() {
    init_test_tracing();
    let file = TempConfig::with_toml("[daemon]\napp_name = \"radio\"\n").await;
    assert!(file.load().await.is_ok());

    file.write("[daemon]\nsignal_poll_interval_ms = 0\n").await;
    assert!(file.load().await.is_err());
}

#[test]
fn test_builder_matches_file_form() {
    init_test_tracing();
    let built = TestConfigBuilder::new()
        .app_name("radio")
        .signal_poll_interval_ms(250)
        .control_output("/dev/fd/4")
        .log_level("debug")
        .build();
    built.validate().unwrap();

    let rendered = toml::to_string(&built).unwrap();
    let parsed = mprisline_config::AppConfig::parse(&rendered).unwrap();
    assert_eq!(parsed.daemon.app_name, "radio");
    assert_eq!(parsed.channels.control_output.as_deref(), Some("/dev/fd/4"));
    assert_eq!(filter_directive(&parsed.logging, 0), "debug");
}

#[tokio::test]
async fn test_log_file_lands_beside_config() {
    let file = TempConfig::with_toml("").await;
    let log_path = file.sibling("mprisline.log");
    file.write(&format!("[logging]\nfile = {:?}\n", log_path.display().to_string()))
        .await;
    let config = file.load().await.unwrap();
    assert_eq!(
        config.logging.file.as_deref(),
        Some(log_path.display().to_string().as_str())
    );
}

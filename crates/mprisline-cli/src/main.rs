#![deny(unsafe_code)]

//! mprisline CLI: runs the bridge daemon and inspects its configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use mprisline_config::AppConfig;
use mprisline_core::channel::{LineChannel, LineReader, LineWriter};
use mprisline_core::{interfaces, logging, Daemon, ProtocolEngine};
use mprisline_dbus::MprisBus;

/// mprisline: expose a line-protocol media player on the MPRIS D-Bus interface.
#[derive(Debug, Parser)]
#[command(name = "mprisline", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "mprisline.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the daemon on the configured pipes.
    Run {
        /// Override `daemon.app_name`.
        #[arg(long)]
        app_name: Option<String>,

        /// Register on the bus immediately instead of waiting for `mpris:on`.
        #[arg(long)]
        start_service: bool,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },

    /// Print the introspection document served on the bus.
    Introspect,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            app_name,
            start_service,
        } => {
            let mut config = load_config(&cli.config).await?;
            apply_overrides(&mut config, app_name, start_service)?;
            logging::init(&config.logging, cli.verbose)?;
            cmd_run(config).await?
        }
        Commands::Config { show } => cmd_config(&cli.config, show).await?,
        Commands::Introspect => print!("{}", interfaces::introspection_xml()),
    }

    Ok(())
}

async fn cmd_run(config: AppConfig) -> Result<()> {
    let retry_delay = Duration::from_millis(config.daemon.read_retry_delay_ms);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let channels = &config.channels;

    let dialogue_in = LineReader::open(&channels.dialogue_input)
        .await
        .with_context(|| format!("opening dialogue input {}", channels.dialogue_input))?
        .with_retry_delay(retry_delay)
        .with_shutdown(shutdown_rx.clone());
    let dialogue_out = LineWriter::open(&channels.dialogue_output)
        .await
        .with_context(|| format!("opening dialogue output {}", channels.dialogue_output))?;
    let control = LineReader::open(&channels.control_input)
        .await
        .with_context(|| format!("opening control input {}", channels.control_input))?
        .with_retry_delay(retry_delay)
        .with_shutdown(shutdown_rx);
    let reply = match &channels.control_output {
        Some(path) => Some(
            LineWriter::open(path)
                .await
                .with_context(|| format!("opening control output {path}"))?,
        ),
        None => None,
    };

    let engine = Arc::new(ProtocolEngine::new(LineChannel::new(
        dialogue_in,
        dialogue_out,
    )));
    let bus = MprisBus::from_config(&config);

    let mut daemon = Daemon::new(config, engine, bus).with_shutdown(shutdown_tx);
    daemon.run(control, reply).await?;
    Ok(())
}

async fn cmd_config(config_path: &Path, show: bool) -> Result<()> {
    let config = load_config(config_path).await?;
    if show {
        let toml_str = toml::to_string_pretty(&config).context("rendering configuration")?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

fn apply_overrides(
    config: &mut AppConfig,
    app_name: Option<String>,
    start_service: bool,
) -> Result<()> {
    if let Some(name) = app_name {
        config.daemon.app_name = name;
    }
    config.daemon.start_service |= start_service;
    config.validate()?;
    Ok(())
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
        Ok(AppConfig::default())
    }
}

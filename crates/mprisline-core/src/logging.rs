//! Process-wide `tracing` subscriber setup.
//!
//! Standard output usually carries the dialogue protocol, so events go to
//! stderr, or to the configured log file.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use mprisline_config::LoggingConfig;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter {directive:?}: {reason}")]
    Filter { directive: String, reason: String },

    #[error("cannot open log file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("a global subscriber is already installed: {0}")]
    Init(String),
}

/// The filter directive used when `RUST_LOG` is unset.
///
/// Each `-v` raises the configured level one step: debug, then trace.
pub fn filter_directive(config: &LoggingConfig, verbosity: u8) -> String {
    match verbosity {
        0 => config.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Install the global subscriber. `RUST_LOG` overrides everything else.
pub fn init(config: &LoggingConfig, verbosity: u8) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directive = filter_directive(config, verbosity);
            EnvFilter::try_new(&directive).map_err(|e| LoggingError::Filter {
                reason: e.to_string(),
                directive,
            })?
        }
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::File {
                    path: path.clone(),
                    source,
                })?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|e| LoggingError::Init(e.to_string()))
}

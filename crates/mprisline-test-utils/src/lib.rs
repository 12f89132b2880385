#![deny(unsafe_code)]

//! Shared test utilities for the mprisline workspace.
//!
//! Provides a scripted stand-in for the line client, a recording bus
//! backend, config builders, and tracing helpers so that individual crate
//! tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! mprisline-test-utils = { workspace = true }
//! ```

pub mod bus;
pub mod client;
pub mod config;
pub mod config_file;
pub mod tracing_setup;

pub use bus::{BusEvent, BusLog, RecordingBus};
pub use client::ScriptedClient;
pub use config::TestConfigBuilder;
pub use config_file::TempConfig;
pub use tracing_setup::init_test_tracing;

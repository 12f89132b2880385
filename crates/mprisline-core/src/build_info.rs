//! Build metadata embedded by `build.rs`, logged when the daemon starts.

pub const GIT_HASH: &str = env!("MPRISLINE_GIT_HASH");

/// Unix epoch seconds at build time.
pub const BUILD_TIMESTAMP: &str = env!("MPRISLINE_BUILD_TIMESTAMP");

pub const BUILD_PROFILE: &str = env!("MPRISLINE_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `"0.1.0 (abc1234, debug)"`
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}

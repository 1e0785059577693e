//! Horizon Log
//!
//! Thin `tracing-subscriber` setup shared by the `horizond` binary and the
//! test suites.
//!
//! ```rust,no_run
//! use horizon_log::{Config, LoggerBuilder};
//!
//! let _guard = LoggerBuilder::from_config(Config::from_env()).init()?;
//! tracing::info!("ready");
//! # Ok::<(), horizon_log::LogError>(())
//! ```
#![forbid(unsafe_code)]

mod builder;
mod config;

pub use builder::{LoggerBuilder, LoggerGuard};
pub use config::{Config, Format};

/// Logging setup errors
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The level / directive string could not be parsed
    #[error("invalid log filter '{filter}': {reason}")]
    InvalidFilter {
        /// The rejected filter
        filter: String,
        /// Parser message
        reason: String,
    },

    /// A global subscriber is already installed
    #[error("global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Result type for logging setup
pub type LogResult<T> = Result<T, LogError>;

/// Install a compact test subscriber once; later calls are no-ops.
pub fn init_test() {
    let _ = LoggerBuilder::from_config(Config::test()).init();
}

//! Logging and tracing initialization.
//!
//! The router only emits `tracing` events; nothing is printed unless the
//! application installs a subscriber. These helpers install one.
//!
//! ```rust,no_run
//! use etude_core::{Config, logging};
//!
//! let config = Config::from_env()?;
//! logging::init_from_config(&config)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The filter comes from `RUST_LOG` when set:
//!
//! ```bash
//! RUST_LOG=etude_core=trace cargo run
//! ```

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, Mode};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Human-readable output at `info` unless `RUST_LOG` says otherwise.
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging() -> Result<(), TryInitError> {
    init_logging_with_level("info")
}

/// Human-readable output with `level` as the fallback filter.
pub fn init_logging_with_level(level: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(filter(level))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
}

/// JSON lines, for log aggregation in production.
pub fn init_logging_json(level: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(filter(level))
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
}

/// JSON in release mode, plain text otherwise.
pub fn init_from_config(config: &Config) -> Result<(), TryInitError> {
    match config.mode {
        Mode::Release => init_logging_json(&config.log_level),
        Mode::Debug | Mode::Test => init_logging_with_level(&config.log_level),
    }
}

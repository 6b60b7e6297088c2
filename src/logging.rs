//! Tracing subscriber setup for the command-line front end.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{DbError, Result};

/// Default filter when neither `--log-level` nor `RUST_LOG` is set.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Installs a global `fmt` subscriber writing to stderr.
///
/// `level` takes precedence; otherwise `RUST_LOG` is honoured, then
/// [`DEFAULT_LOG_LEVEL`].
pub fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .map_err(|e| DbError::invalid(format!("invalid log level: {e}")))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| DbError::invalid("logging already initialized"))
}

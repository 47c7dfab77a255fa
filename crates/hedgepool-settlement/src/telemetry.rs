//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events; the embedding service calls
//! [`init_tracing`] once at startup to decide where they go.

use hedgepool_types::{PoolError, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, for local runs.
    #[default]
    Pretty,
    /// Single-line.
    Compact,
    /// One JSON object per event, for log shipping.
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives, e.g. `"hedgepool_ledger=debug,info"`.
    /// `RUST_LOG` takes precedence when set.
    pub filter: String,
    pub include_source: bool,
    pub include_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info".to_string(),
            include_source: true,
            include_thread_ids: false,
        }
    }
}

impl LogConfig {
    /// JSON output at info level with thread ids.
    #[must_use]
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            filter: "info".to_string(),
            include_source: false,
            include_thread_ids: true,
        }
    }

    /// Pretty output with every hedgepool crate at debug.
    #[must_use]
    pub fn development() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info,hedgepool_ledger=debug,hedgepool_allocation=debug,hedgepool_settlement=debug"
                .to_string(),
            include_source: true,
            include_thread_ids: false,
        }
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.filter).map_err(|e| {
                PoolError::Configuration(format!("invalid log filter {:?}: {e}", self.filter))
            }),
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
/// `Configuration` if the filter does not parse or a global subscriber is
/// already installed.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter = config.env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_thread_ids(config.include_thread_ids)
                    .with_file(config.include_source)
                    .with_line_number(config.include_source),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_thread_ids(config.include_thread_ids)
                    .with_file(config.include_source)
                    .with_line_number(config.include_source),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_thread_ids(config.include_thread_ids)
                    .with_file(config.include_source)
                    .with_line_number(config.include_source),
            )
            .try_init(),
    };
    installed.map_err(|e| PoolError::Configuration(format!("tracing already initialized: {e}")))
}

//! Process-wide logging setup.
//!
//! Two output shapes are supported: the operator-facing line format
//! (`[YYYY-MM-DD HH:MM:SS] message key=value`) and structured JSON for log
//! shippers. `RUST_LOG` always wins over the default filter.

pub mod format;

use crate::{Error, Result};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use format::LineFormat;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Line,
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "line" | "text" => Ok(Self::Line),
            "json" => Ok(Self::Json),
            other => Err(Error::InvalidInput(format!(
                "unknown log format '{other}' (expected line|json)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Suppress per-stage info summaries; warnings and errors still print.
    pub quiet: bool,
}

impl LogConfig {
    pub fn default_directive(&self) -> &'static str {
        if self.quiet { "warn" } else { "info" }
    }
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn init_global(cfg: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.default_directive()));

    let (line, json) = match cfg.format {
        LogFormat::Line => (
            Some(tracing_subscriber::fmt::layer().event_format(LineFormat::default())),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(tracing_subscriber::fmt::layer().json().with_target(true)),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(line)
        .with(json)
        .try_init()
        .map_err(|e| Error::BackendMessage(format!("tracing already initialized: {e}")))?;
    Ok(())
}

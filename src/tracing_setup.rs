//! Logging setup for the `lasesnap` binary.
//!
//! The level comes from `application.log_level` (or `-v`), `RUST_LOG`
//! overrides it, and `--log-format` picks one of three fmt layers. The
//! sequencer and the aggregator open their own spans, so the compact and JSON
//! outputs carry the session id and wavelength of every event.

use crate::config::Settings;
use crate::error::{AppResult, SnapError};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Multi-line, colored
    Pretty,
    /// One line per event, no colors
    Compact,
    /// One JSON object per event
    Json,
}

/// What [`init`] installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Line layout
    pub format: OutputFormat,
}

impl TracingConfig {
    /// Level from `application.log_level`, compact output.
    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        let level = Level::from_str(&settings.application.log_level).map_err(|_| {
            SnapError::Configuration(format!(
                "invalid log level '{}'",
                settings.application.log_level
            ))
        })?;
        Ok(Self {
            level,
            format: OutputFormat::Compact,
        })
    }

    /// Use `format` for every line.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Lower the level to `DEBUG` when `verbose` is set.
    pub fn verbose(mut self, verbose: bool) -> Self {
        if verbose {
            self.level = Level::DEBUG;
        }
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level).into())
            .from_env_lossy()
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(config: TracingConfig) -> AppResult<()> {
    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer().pretty().boxed(),
        OutputFormat::Compact => fmt::layer().compact().with_ansi(false).boxed(),
        OutputFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
    };

    match tracing_subscriber::registry()
        .with(layer)
        .with(config.filter())
        .try_init()
    {
        Ok(()) => Ok(()),
        Err(_) if tracing::dispatcher::has_been_set() => Ok(()),
        Err(e) => Err(SnapError::Configuration(format!(
            "failed to initialize tracing: {e}"
        ))),
    }
}

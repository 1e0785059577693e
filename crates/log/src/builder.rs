//! Logger builder implementation

use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::{Config, Format};
use crate::{LogError, LogResult};

/// Logger builder
#[derive(Debug, Default)]
pub struct LoggerBuilder {
    config: Config,
}

/// Guard returned by [`LoggerBuilder::init`]
///
/// Holds the effective configuration; the subscriber itself is global.
#[derive(Debug)]
pub struct LoggerGuard {
    config: Config,
}

impl LoggerGuard {
    /// Configuration the subscriber was installed with
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl LoggerBuilder {
    /// Start from an explicit configuration
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Override the filter directives
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// Override the output format
    pub fn with_format(mut self, format: Format) -> Self {
        self.config.format = format;
        self
    }

    /// Build the filter without installing anything
    pub fn filter(&self) -> LogResult<EnvFilter> {
        EnvFilter::try_new(&self.config.level).map_err(|e| LogError::InvalidFilter {
            filter: self.config.level.clone(),
            reason: e.to_string(),
        })
    }

    /// Install the global subscriber
    pub fn init(self) -> LogResult<LoggerGuard> {
        let filter = self.filter()?;
        let config = self.config;

        Registry::default()
            .with(filter)
            .with(fmt_layer(&config, std::io::stdout))
            .try_init()
            .map_err(|e| LogError::AlreadyInitialized(e.to_string()))?;
        Ok(LoggerGuard { config })
    }
}

/// Formatting layer for `config`, writing to `writer`
fn fmt_layer<S, W>(config: &Config, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(config.target);

    match (config.format, config.time) {
        (Format::Pretty, true) => layer.pretty().with_ansi(config.ansi).boxed(),
        (Format::Pretty, false) => layer.pretty().without_time().with_ansi(config.ansi).boxed(),
        (Format::Compact, true) => layer.compact().with_ansi(config.ansi).boxed(),
        (Format::Compact, false) => layer.compact().without_time().with_ansi(config.ansi).boxed(),
        (Format::Json, true) => layer.json().with_current_span(true).boxed(),
        (Format::Json, false) => layer.json().with_current_span(true).without_time().boxed(),
    }
}

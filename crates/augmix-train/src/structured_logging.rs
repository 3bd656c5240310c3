//! Structured logging support using the `tracing` crate.
//!
//! The trainer and the augmentation pipeline emit `tracing` events
//! (`info!` per epoch, `debug!` every `log_frequency` steps, `warn!` on
//! cancellation, `error!` on failure). Nothing is printed unless a
//! subscriber is installed; this module installs one.
//!
//! Only available with the `structured-logging` feature:
//!
//! ```toml
//! [dependencies]
//! augmix-train = { version = "0.1", features = ["structured-logging"] }
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use augmix_train::structured_logging::{LogFormat, LogLevel, TracingLogger};
//!
//! let _logger = TracingLogger::builder()
//!     .with_format(LogFormat::Json)
//!     .with_level(LogLevel::Debug)
//!     .build()?;
//! # Ok::<(), augmix_train::TrainError>(())
//! ```

use crate::{TrainError, TrainResult};
use std::str::FromStr;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Crates whose events the level filter applies to by default.
const CRATE_TARGETS: [&str; 2] = ["augmix_train", "augmix_augment"];

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable multi-line format with colors.
    #[default]
    Pretty,
    /// Single-line format without colors.
    Compact,
    /// JSON lines for log aggregation.
    Json,
}

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Everything, including per-operation traces.
    Trace,
    /// Per-step progress.
    Debug,
    /// Per-epoch summaries.
    #[default]
    Info,
    /// Cancellations and other warnings.
    Warn,
    /// Failures only.
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(TrainError::ConfigError(format!("unknown log level '{}'", other))),
        }
    }
}

/// Configuration builder for structured logging.
#[derive(Debug, Clone)]
pub struct TracingLoggerBuilder {
    format: LogFormat,
    level: LogLevel,
    env_filter: Option<String>,
    with_targets: bool,
    with_file_location: bool,
    with_thread_names: bool,
    with_span_events: bool,
}

impl Default for TracingLoggerBuilder {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: LogLevel::Info,
            env_filter: None,
            with_targets: true,
            with_file_location: false,
            with_thread_names: false,
            with_span_events: false,
        }
    }
}

impl TracingLoggerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the level applied to this workspace's crates.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set a custom filter directive (overrides the level setting).
    ///
    /// ```
    /// # use augmix_train::structured_logging::TracingLoggerBuilder;
    /// let builder = TracingLoggerBuilder::new()
    ///     .with_env_filter("augmix_train=debug,augmix_augment=warn");
    /// ```
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Include target names (module paths).
    pub fn with_targets(mut self, enabled: bool) -> Self {
        self.with_targets = enabled;
        self
    }

    /// Include `file:line` locations.
    pub fn with_file_location(mut self, enabled: bool) -> Self {
        self.with_file_location = enabled;
        self
    }

    /// Include thread names; prefetch workers are named `augmix-prefetch-<k>`.
    pub fn with_thread_names(mut self, enabled: bool) -> Self {
        self.with_thread_names = enabled;
        self
    }

    /// Emit span open/close events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Filter directive built from the configured level.
    fn directive(&self) -> String {
        match &self.env_filter {
            Some(custom) => custom.clone(),
            None => CRATE_TARGETS
                .iter()
                .map(|target| format!("{}={}", target, self.level.as_str()))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Build and install the global subscriber.
    ///
    /// Only one global subscriber can exist; a second call fails.
    /// `RUST_LOG` is honored when no custom filter was set.
    pub fn build(self) -> TrainResult<TracingLogger> {
        let env_filter = if self.env_filter.is_some() {
            EnvFilter::try_new(self.directive())
                .map_err(|e| TrainError::ConfigError(format!("Invalid env filter: {}", e)))?
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
        };

        let span_events = if self.with_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let base = fmt::layer()
            .with_target(self.with_targets)
            .with_file(self.with_file_location)
            .with_line_number(self.with_file_location)
            .with_thread_names(self.with_thread_names)
            .with_span_events(span_events);

        let layer: Box<dyn Layer<Registry> + Send + Sync> = match self.format {
            LogFormat::Pretty => base.pretty().boxed(),
            LogFormat::Compact => base.with_ansi(false).compact().boxed(),
            LogFormat::Json => base.json().boxed(),
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(env_filter)
            .try_init()
            .map_err(|e| TrainError::Other(format!("Failed to initialize tracing: {}", e)))?;

        Ok(TracingLogger {
            format: self.format,
        })
    }
}

/// Handle for the installed structured logger.
#[derive(Debug)]
pub struct TracingLogger {
    format: LogFormat,
}

impl TracingLogger {
    /// Create a new logger builder.
    pub fn builder() -> TracingLoggerBuilder {
        TracingLoggerBuilder::new()
    }

    /// Pretty format at info level.
    pub fn init() -> TrainResult<Self> {
        Self::builder().build()
    }

    /// JSON format at info level, without targets.
    pub fn init_production() -> TrainResult<Self> {
        Self::builder()
            .with_format(LogFormat::Json)
            .with_level(LogLevel::Info)
            .with_targets(false)
            .build()
    }

    /// Pretty format at debug level, with file locations and thread names.
    pub fn init_development() -> TrainResult<Self> {
        Self::builder()
            .with_format(LogFormat::Pretty)
            .with_level(LogLevel::Debug)
            .with_file_location(true)
            .with_thread_names(true)
            .build()
    }

    /// Output format of the installed subscriber.
    pub fn format(&self) -> LogFormat {
        self.format
    }
}

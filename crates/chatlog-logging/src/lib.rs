//! Logging setup for chatlog
//!
//! Installs a global `tracing` subscriber with console output (pretty or
//! JSON lines, written to stderr) and optional JSONL file output with
//! daily or hourly rotation.
//!
//! # Quick Start
//!
//! ```ignore
//! use chatlog_logging::{ChatlogSubscriberBuilder, LogConfig};
//!
//! // Pretty console output at info level
//! let _guard = ChatlogSubscriberBuilder::new().init()?;
//!
//! // Development mode with debug output
//! let _guard = ChatlogSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init()?;
//! ```
//!
//! The returned guard flushes the file writer when dropped and must be
//! kept alive for as long as logs should be written.

pub mod config;
pub mod error;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use error::LoggingError;

use std::fs::{self, File};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builder for configuring and initializing the chatlog logging subscriber
pub struct ChatlogSubscriberBuilder {
    config: LogConfig,
}

impl ChatlogSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Build the filter; `RUST_LOG` takes precedence over the configuration
    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(self.config.filter_directives())
            .map_err(|e| LoggingError::Filter(e.to_string()))
    }

    /// Build the output layers, returning the file writer guard if any
    fn layers(&self) -> Result<(Vec<BoxedLayer>, Option<WorkerGuard>), LoggingError> {
        let mut layers = Vec::new();
        let mut guard = None;

        if self.config.console.enabled {
            layers.push(console_layer(&self.config));
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            layers.push(json_layer(&self.config.jsonl, writer));
            guard = Some(file_guard);
        }

        Ok((layers, guard))
    }

    /// Install the subscriber globally
    ///
    /// Returns the file writer guard when file output is configured.
    ///
    /// # Errors
    ///
    /// Fails if the filter is invalid, the log directory cannot be
    /// created, or a global subscriber has already been set.
    pub fn init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = self.env_filter()?;
        let (layers, guard) = self.layers()?;

        Registry::default()
            .with(layers)
            .with(env_filter)
            .try_init()
            .map_err(|e| LoggingError::Init(e.to_string()))?;

        Ok(guard)
    }
}

impl Default for ChatlogSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn console_layer(config: &LogConfig) -> BoxedLayer {
    if config.console.pretty {
        tracing_subscriber::fmt::layer()
            .with_ansi(config.console.ansi)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        json_layer(&config.jsonl, std::io::stderr)
    }
}

/// JSON lines layer writing to `writer`
fn json_layer<W>(jsonl: &JsonlConfig, writer: W) -> BoxedLayer
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(jsonl.include_spans)
        .with_span_list(jsonl.include_spans)
        .flatten_event(jsonl.flatten_events)
        .with_file(jsonl.include_location)
        .with_line_number(jsonl.include_location)
        .with_writer(writer)
        .boxed()
}

/// Open the log file writer; a non-rotating file is truncated
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory)?;

    let rotation = match config.rotation {
        RotationStrategy::Never => {
            let path = config.directory.join(format!("{}.log", config.prefix));
            let file = File::create(&path)?;
            return Ok(tracing_appender::non_blocking(file));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&config.prefix)
        .filename_suffix("log");
    if let Some(max_files) = config.max_files {
        builder = builder.max_log_files(max_files);
    }
    let appender = builder
        .build(&config.directory)
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Result<Option<WorkerGuard>, LoggingError> {
    ChatlogSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize logging for testing (minimal output)
///
/// Does nothing if a subscriber is already installed.
pub fn init_testing() {
    let _ = ChatlogSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}

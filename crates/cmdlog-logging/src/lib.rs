//! JSONL logging with per-node context for cmdlog
//!
//! Every server replaying and tailing the command log runs the same code, so
//! log lines are only useful when they say which node wrote them. This crate
//! sets up the tracing subscriber and carries node identity through spans.
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines for log aggregation (default)
//! - **Node Context Injection**: Attribute spans to the node that created them
//! - **File Rotation**: Daily/hourly log rotation via tracing-appender
//! - **Capture**: Collect output in memory for assertions
//!
//! # Quick Start
//!
//! ```ignore
//! use cmdlog_logging::{CmdlogSubscriberBuilder, LogConfig};
//!
//! // JSONL to console
//! let _guard = CmdlogSubscriberBuilder::new().init();
//!
//! // Pretty human-readable output
//! let _guard = CmdlogSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```

pub mod capture;
pub mod config;
pub mod context;
pub mod layers;

pub use capture::CaptureWriter;
pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{NodeContextData, NodeContextGuard};
pub use layers::{NodeContextLayer, jsonl_layer};

use std::fs::{self, File};

use thiserror::Error;
use tracing::Dispatch;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt};

/// Errors from subscriber construction
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to open log output: {0}")]
    FileOutput(String),

    #[error("A global subscriber is already set")]
    AlreadyInitialized,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builder for configuring and initializing the cmdlog logging subscriber
///
/// By default, console output uses JSONL format. Use
/// `LogConfig::development()` for human-readable output.
pub struct CmdlogSubscriberBuilder {
    config: LogConfig,
    capture: Option<CaptureWriter>,
}

impl CmdlogSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
            capture: None,
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

    /// Send console output to `capture` instead of stdout
    pub fn with_capture(mut self, capture: CaptureWriter) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Build the subscriber without installing it
    ///
    /// The returned guard flushes file output when dropped and must be kept
    /// alive as long as the dispatch is in use.
    pub fn build(self) -> Result<(Dispatch, Option<WorkerGuard>), LoggingError> {
        let mut filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&self.config.default_level)
                .map_err(|e| LoggingError::InvalidFilter(e.to_string()))?,
        };
        for directive in &self.config.directives {
            let directive = directive
                .parse()
                .map_err(|e| LoggingError::InvalidFilter(format!("{directive}: {e}")))?;
            filter = filter.add_directive(directive);
        }

        let mut layers: Vec<BoxedLayer> = Vec::new();
        if self.config.console.enabled {
            let console = match self.capture {
                Some(capture) => console_layer(&self.config, capture)?,
                None => console_layer(&self.config, std::io::stdout)?,
            };
            layers.push(console);
        }

        let mut guard = None;
        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            layers.push(jsonl_layer(&self.config.jsonl, writer).boxed());
            guard = Some(file_guard);
        }

        let subscriber = Registry::default()
            .with(layers)
            .with(NodeContextLayer::new())
            .with(filter);
        Ok((Dispatch::new(subscriber), guard))
    }

    /// Try to initialize the subscriber globally
    ///
    /// Fails if the configuration is invalid or a global subscriber is
    /// already set.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let (dispatch, guard) = self.build()?;
        tracing::dispatcher::set_global_default(dispatch)
            .map_err(|_| LoggingError::AlreadyInitialized)?;
        Ok(guard)
    }

    /// Initialize the subscriber globally
    ///
    /// Failures are reported on stderr and leave logging disabled.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: Failed to initialize logging: {e}");
                None
            }
        }
    }
}

impl Default for CmdlogSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn console_layer<W>(config: &LogConfig, writer: W) -> Result<BoxedLayer, LoggingError>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let level = match &config.console.level {
        Some(level) => level
            .parse::<LevelFilter>()
            .map_err(|e| LoggingError::InvalidFilter(format!("{level}: {e}")))?,
        None => LevelFilter::TRACE,
    };

    let layer: BoxedLayer = if config.console.pretty {
        tracing_subscriber::fmt::layer()
            .with_ansi(config.console.ansi)
            .with_target(true)
            .with_writer(writer)
            .with_filter(level)
            .boxed()
    } else {
        jsonl_layer(&config.jsonl, writer).with_filter(level).boxed()
    };
    Ok(layer)
}

/// Open the file sink; `Never` rotation truncates a single file
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory).map_err(|e| {
        LoggingError::FileOutput(format!("{}: {e}", config.directory.display()))
    })?;

    let rotation = match config.rotation {
        RotationStrategy::Never => {
            let path = config.directory.join(format!("{}.log", config.prefix));
            let file = File::create(&path)
                .map_err(|e| LoggingError::FileOutput(format!("{}: {e}", path.display())))?;
            return Ok(tracing_appender::non_blocking(file));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(config.prefix.as_str())
        .filename_suffix("log");
    if let Some(max) = config.max_files {
        builder = builder.max_log_files(max);
    }
    let appender = builder
        .build(&config.directory)
        .map_err(|e| LoggingError::FileOutput(e.to_string()))?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging with default settings (JSONL to console)
pub fn init_default() -> Option<WorkerGuard> {
    CmdlogSubscriberBuilder::new().init()
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Option<WorkerGuard> {
    CmdlogSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize logging for testing (minimal output)
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_testing() {
    let _ = CmdlogSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

//! Logging setup using `tracing` and `tracing-subscriber`.
//!
//! Library code only emits events; the binary calls [`init_logging`] once at
//! startup. Log output goes to stderr so that it never mixes with report
//! output on stdout.
//!
//! - `warn`: skipped files and summaries
//! - `info`: files found and read, tables prepared
//! - `debug`: individual column renames

use std::io;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-field format.
    #[default]
    Pretty,
    /// Single-line format.
    Compact,
    /// JSON, one object per line.
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub with_ansi: bool,
    /// Let `RUST_LOG` override `level`.
    pub use_env_filter: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::default(),
            with_ansi: true,
            use_env_filter: true,
        }
    }
}

impl LogConfig {
    /// Creates a `LogConfig` from a `-v` count.
    ///
    /// - 0: warn
    /// - 1 (`-v`): info
    /// - 2 (`-vv`): debug
    /// - 3+: trace
    #[must_use]
    pub fn from_verbosity(verbosity: u8) -> Self {
        let level = match verbosity {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self {
            level,
            use_env_filter: verbosity == 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_ansi(mut self, enable: bool) -> Self {
        self.with_ansi = enable;
        self
    }
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let default = EnvFilter::new(config.level.as_str().to_lowercase());
    if config.use_env_filter {
        EnvFilter::try_from_default_env().unwrap_or(default)
    } else {
        default
    }
}

/// Installs the global tracing subscriber, writing to stderr.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) {
    init_logging_with_writer(config, io::stderr);
}

/// Installs the global tracing subscriber with a custom writer.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_logging_with_writer<W>(config: &LogConfig, writer: W)
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = build_filter(config);
    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer).with_target(false))
            .init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(writer)
                    .with_ansi(config.with_ansi)
                    .with_target(false)
                    .without_time(),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(config.with_ansi)
                    .with_target(false)
                    .without_time(),
            )
            .init(),
    }
}

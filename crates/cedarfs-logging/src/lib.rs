//! Logging setup for the cedarfs master.
//!
//! The master always logs to the console; operators may additionally point
//! it at a directory of daily-rotated files. Library crates only emit
//! through the `tracing` macros and never install a subscriber themselves.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error).
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for daily-rotated log files. If None, console only.
    pub log_dir: Option<PathBuf>,

    /// Prefix for log file names.
    #[serde(default = "default_prefix")]
    pub file_prefix: String,
}

fn default_level() -> String {
    "info".into()
}

fn default_prefix() -> String {
    "cedarfs-master".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_level(),
            log_dir: None,
            file_prefix: default_prefix(),
        }
    }
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Initialize logging for the master process. Call once at startup.
///
/// Returns the guard for the non-blocking file writer when file logging is
/// configured; it must be held for the lifetime of the process or buffered
/// lines are lost on exit.
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    let registry = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(fmt::layer());
    match &config.log_dir {
        Some(log_dir) => {
            let appender = rolling::daily(log_dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

/// Best-effort console logging for tests.
///
/// Unlike [`init_logging`] this tolerates repeated calls (each test binary
/// races to install the subscriber first) and honours `RUST_LOG`.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

//! Tracing subscriber setup.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use crate::domain::models::config::LoggingConfig;

/// Guard keeping a file appender's background thread alive.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize the global subscriber from config. `RUST_LOG` overrides
/// the configured level when set.
pub fn init(config: &LoggingConfig) -> Result<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let mut file_guard = None;

    match (&config.directory, config.format.as_str()) {
        (Some(dir), "json") => {
            let appender = tracing_appender::rolling::daily(dir, "coterie.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);
            fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(writer)
                .init();
        }
        (Some(dir), _) => {
            let appender = tracing_appender::rolling::daily(dir, "coterie.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);
            fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
        }
        (None, "json") => {
            fmt().json().with_env_filter(filter).init();
        }
        (None, _) => {
            fmt().with_env_filter(filter).init();
        }
    }

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

//! Tracing setup for the wrapper.
//!
//! The wrapper sits between a build system and a compiler, so by default it
//! logs nothing. `CWRAP_LOG` takes an `EnvFilter` directive; `CWRAP_LOG_FILE`
//! sends events to a file instead of stderr; `CWRAP_LOG_JSON` switches to
//! JSON lines.

use crate::config::EnvParser;
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_LOG_FILTER: &str = "off";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("log file {0} has no file name")]
    InvalidFile(PathBuf),

    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub filter: String,
    pub file: Option<PathBuf>,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            file: None,
            json: false,
        }
    }
}

impl LogConfig {
    /// Read `CWRAP_LOG`, `CWRAP_LOG_FILE` and `CWRAP_LOG_JSON`.
    ///
    /// An unparseable `CWRAP_LOG_JSON` falls back to compact output.
    pub fn from_env() -> Self {
        let mut parser = EnvParser::new();
        let filter = parser.string("LOG", DEFAULT_LOG_FILTER);
        let file = parser.optional_path("LOG_FILE");
        let json = parser.boolean("LOG_JSON", false);
        Self {
            filter: filter.into_value(),
            file: file.into_value(),
            json: json.value,
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// The returned guard flushes the file writer when dropped; keep it alive for
/// the lifetime of the process.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, LogError> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|source| LogError::InvalidFilter {
        filter: config.filter.clone(),
        source,
    })?;

    let Some(path) = &config.file else {
        let layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
        if config.json {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .try_init()?;
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.compact())
                .try_init()?;
        }
        return Ok(None);
    };

    let file_name = path
        .file_name()
        .ok_or_else(|| LogError::InvalidFile(path.clone()))?;
    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_ids(true);
    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()?;
    }
    Ok(Some(guard))
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::env_test_lock;

    const VARS: &[&str] = &["CWRAP_LOG", "CWRAP_LOG_FILE", "CWRAP_LOG_JSON"];

    fn cleanup_env() {
        for var in VARS {
            // SAFETY: Tests are serialized via env_test_lock
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn test_defaults_log_nothing() {
        let _guard = env_test_lock();
        cleanup_env();

        assert_eq!(LogConfig::from_env(), LogConfig::default());
        assert_eq!(LogConfig::default().filter, "off");
    }

    #[test]
    fn test_from_env() {
        let _guard = env_test_lock();
        cleanup_env();

        // SAFETY: Tests are serialized via env_test_lock
        unsafe {
            std::env::set_var("CWRAP_LOG", "cwrap_core=debug");
            std::env::set_var("CWRAP_LOG_FILE", "/tmp/cwrap.log");
            std::env::set_var("CWRAP_LOG_JSON", "true");
        }
        let config = LogConfig::from_env();
        assert_eq!(config.filter, "cwrap_core=debug");
        assert_eq!(config.file, Some(PathBuf::from("/tmp/cwrap.log")));
        assert!(config.json);

        cleanup_env();
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let config = LogConfig {
            filter: "cwrap_core=notalevel".to_string(),
            ..LogConfig::default()
        };
        assert!(matches!(
            init_logging(&config),
            Err(LogError::InvalidFilter { .. })
        ));
    }
}

use crate::infrastructure::error::InfraError;
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

const LOG_PREFIX: &str = "worklog";
const BINARY_TARGET: &str = "worklog";
const MAX_LOG_FILES: usize = 7;

/// Installs the global subscriber: daily-rolling files under `logs_dir`, optionally
/// echoed to stderr. `RUST_LOG` is honoured when no level is given.
pub fn enable_logging(
    logs_dir: &Path,
    level: Option<LevelFilter>,
    show_stderr: bool,
) -> Result<(), InfraError> {
    let appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(LOG_PREFIX)
        .build(logs_dir)
        .map_err(|error| {
            InfraError::InvalidConfig(format!("cannot open log directory: {error}"))
        })?;

    let stderr = std::io::stderr.with_filter(move |_| show_stderr);

    let level = level
        .map(|value| value.to_string())
        .unwrap_or_else(|| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter_directives(&level)))
        .with_ansi(false)
        .with_writer(stderr.and(appender))
        .try_init()
        .map_err(|error| {
            InfraError::InvalidConfig(format!("logging already initialized: {error}"))
        })
}

/// Applies `level` to the library and to the `worklog` binary; other crates stay quiet.
fn filter_directives(level: &str) -> String {
    let library = env!("CARGO_PKG_NAME").replace('-', "_");
    format!("{library}={level},{BINARY_TARGET}={level}")
}

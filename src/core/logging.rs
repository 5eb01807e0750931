use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::core::config::{AppPaths, LoggingSettings};

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Dependencies that log every query or connection at `info`.
const QUIET_TARGETS: [&str; 3] = ["sqlx=warn", "hyper=warn", "reqwest=warn"];

/// Installs the global subscriber: stdout plus a daily file under the log
/// directory. A file appender that cannot be opened leaves stdout logging in
/// place rather than failing startup.
pub fn init(paths: &AppPaths, settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&settings.level)));

    let file_layer = match file_writer(&paths.log_dir, settings) {
        Ok(writer) => Some(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer),
        ),
        Err(err) => {
            eprintln!(
                "File logging disabled ({}): {}",
                paths.log_dir.display(),
                err
            );
            None
        }
    };

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init();

    if let Err(err) = result {
        eprintln!("Logging already initialized: {}", err);
    }
}

fn file_writer(log_dir: &Path, settings: &LoggingSettings) -> anyhow::Result<NonBlocking> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(settings.file_prefix.clone())
        .filename_suffix("log")
        .max_log_files(settings.max_files.max(1))
        .build(log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(appender);
    // Only the first guard is kept; later writers in the same process would
    // drop their buffered lines on exit.
    let _ = FILE_GUARD.set(guard);
    Ok(writer)
}

fn default_directives(level: &str) -> String {
    let level = match level.trim() {
        "" => "info",
        level => level,
    };
    std::iter::once(level)
        .chain(QUIET_TARGETS)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_leads_the_directives() {
        assert_eq!(
            default_directives("debug"),
            "debug,sqlx=warn,hyper=warn,reqwest=warn"
        );
        assert!(default_directives("  ").starts_with("info,"));
        assert!(EnvFilter::try_new(default_directives("papertrail_backend=trace")).is_ok());
    }

    #[test]
    fn file_writer_creates_missing_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested").join("logs");

        let writer = file_writer(&log_dir, &LoggingSettings::default());

        assert!(writer.is_ok());
        assert!(log_dir.is_dir());
    }
}

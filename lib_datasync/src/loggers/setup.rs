//! Process-wide `tracing` setup: console output plus a daily JSON log file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Daily files kept next to the active one.
pub const DEFAULT_KEEP_FILES: usize = 7;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("I/O error preparing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid log filter '{0}'")]
    Filter(String),

    #[error("A global subscriber is already installed: {0}")]
    Init(String),
}

/// Installs the global subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from `level`. The console
/// layer is human readable; the file layer writes JSON lines to
/// `<log_dir>/<app_name>.<date>`. Keep the returned guard alive until exit or
/// buffered file output is lost.
pub fn setup_logging(log_dir: &Path, level: &str, app_name: &str) -> Result<WorkerGuard, LoggingError> {
    fs::create_dir_all(log_dir).map_err(|source| LoggingError::Io {
        path: log_dir.to_path_buf(),
        source,
    })?;
    let pruned = prune_old_logs(log_dir, app_name, DEFAULT_KEEP_FILES).map_err(|source| {
        LoggingError::Io {
            path: log_dir.to_path_buf(),
            source,
        }
    })?;

    let file_appender = rolling::daily(log_dir, app_name);
    let (file_writer, guard) = non_blocking(file_appender);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|_| LoggingError::Filter(level.to_string()))?,
    };

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    info!(level, log_dir = %log_dir.display(), pruned, "Logging initialized");
    Ok(guard)
}

/// Deletes all but the `keep` newest `<app_name>.<date>` files in `log_dir`.
///
/// Daily file names sort chronologically, so name order is age order.
/// Returns how many files were removed.
pub fn prune_old_logs(log_dir: &Path, app_name: &str, keep: usize) -> io::Result<usize> {
    let prefix = format!("{app_name}.");
    let mut files: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix))
        })
        .collect();
    files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = 0;
    for old in files.iter().skip(keep) {
        match fs::remove_file(old) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Error deleting old log file {}: {e}", old.display()),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_keeps_newest_files_of_the_app() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=5 {
            fs::write(dir.path().join(format!("server_datasync.2026-10-0{day}")), "x").unwrap();
        }
        fs::write(dir.path().join("other_app.2026-10-01"), "x").unwrap();

        let removed = prune_old_logs(dir.path(), "server_datasync", 2).unwrap();
        assert_eq!(removed, 3);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                "other_app.2026-10-01",
                "server_datasync.2026-10-04",
                "server_datasync.2026-10-05"
            ]
        );
    }

    #[test]
    fn prune_on_empty_dir_removes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(prune_old_logs(dir.path(), "app", 0).unwrap(), 0);
    }
}

// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Logging initialization
//!
//! Console output for operators plus, with `file-logging`, one JSON log file
//! per crate and a combined file inside a timestamped run folder.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;

const RUN_PREFIX: &str = "run_";
const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Keeps the non-blocking file writers alive; logs are flushed on drop.
pub struct LoggingGuard {
    #[cfg(feature = "file-logging")]
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// Run folder of this process, `None` for console-only logging
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Initialize console-only logging
///
/// Safe to call more than once; later calls are ignored. Intended for tools
/// and tests.
pub fn init_console_logging(debug_flags: &CrateDebugFlags, log_level: &str) {
    let filter = EnvFilter::new(debug_flags.to_filter_string(log_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Initialize logging with console and file output
///
/// Creates a timestamped folder structure:
/// ```text
/// ./logs/
///   └── run_20250101_120000/
///       ├── sorter-hal.log
///       ├── sorter-transports.log
///       └── sorter.log (combined)
/// ```
///
/// # Arguments
/// * `debug_flags` - Per-crate debug flags
/// * `log_level` - Level for everything not explicitly enabled
/// * `log_dir` - Base directory for run folders
/// * `retention_days` - Remove runs older than N days
/// * `retention_runs` - Keep at most N most recent runs
#[cfg(feature = "file-logging")]
pub fn init_logging(
    debug_flags: &CrateDebugFlags,
    log_level: &str,
    log_dir: &Path,
    retention_days: u64,
    retention_runs: usize,
) -> Result<LoggingGuard> {
    use anyhow::Context;
    use tracing_appender::rolling;

    let timestamp = Utc::now().format(RUN_TIMESTAMP_FORMAT);
    let run_folder = log_dir.join(format!("{}{}", RUN_PREFIX, timestamp));
    std::fs::create_dir_all(&run_folder)
        .with_context(|| format!("Failed to create log directory: {}", run_folder.display()))?;

    cleanup_old_logs(log_dir, retention_days, retention_runs)?;

    let env_filter = EnvFilter::new(debug_flags.to_filter_string(log_level));
    let mut layers = Vec::new();
    let mut file_guards = Vec::new();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(env_filter.clone());
    layers.push(console_layer.boxed());

    for crate_name in crate::KNOWN_CRATES {
        let file_appender = rolling::never(&run_folder, format!("{}.log", crate_name));
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        file_guards.push(guard);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .json()
            .with_filter(EnvFilter::new(format!(
                "{}=debug",
                crate::crate_target(crate_name)
            )))
            .boxed();
        layers.push(file_layer);
    }

    let combined_appender = rolling::never(&run_folder, "sorter.log");
    let (combined_non_blocking, combined_guard) = tracing_appender::non_blocking(combined_appender);
    file_guards.push(combined_guard);

    let combined_layer = tracing_subscriber::fmt::layer()
        .with_writer(combined_non_blocking)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .json()
        .with_filter(env_filter)
        .boxed();
    layers.push(combined_layer);

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(LoggingGuard {
        _file_guards: file_guards,
        log_dir: Some(run_folder),
    })
}

/// Console-only logging that still hands back a guard
pub fn init_logging_console_only(
    debug_flags: &CrateDebugFlags,
    log_level: &str,
) -> Result<LoggingGuard> {
    let filter = EnvFilter::new(debug_flags.to_filter_string(log_level));
    Registry::default()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_filter(filter))
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(LoggingGuard {
        #[cfg(feature = "file-logging")]
        _file_guards: Vec::new(),
        log_dir: None,
    })
}

fn parse_run_timestamp(dir_name: &str) -> Option<DateTime<Utc>> {
    let timestamp_str = dir_name.strip_prefix(RUN_PREFIX)?;
    NaiveDateTime::parse_from_str(timestamp_str, RUN_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Remove run folders older than `retention_days`, then trim to the
/// `retention_runs` most recent ones. The newest run is always kept.
pub(crate) fn cleanup_old_logs(
    base_log_dir: &Path,
    retention_days: u64,
    retention_runs: usize,
) -> Result<()> {
    if !base_log_dir.exists() {
        return Ok(());
    }

    let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
    let mut runs: Vec<(PathBuf, DateTime<Utc>)> = Vec::new();

    for entry in std::fs::read_dir(base_log_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let parsed = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_run_timestamp);
        if let Some(dt) = parsed {
            runs.push((path, dt));
        }
    }

    runs.sort_by_key(|(_, dt)| *dt);
    // the newest folder is the one being logged into
    if runs.pop().is_none() {
        return Ok(());
    }
    let retention_runs = retention_runs.saturating_sub(1);
    let (expired, mut kept): (Vec<_>, Vec<_>) =
        runs.into_iter().partition(|(_, dt)| *dt < cutoff);

    for (path, _) in &expired {
        remove_run(path);
    }

    if kept.len() > retention_runs {
        let excess = kept.len() - retention_runs;
        for (path, _) in kept.drain(..excess) {
            remove_run(&path);
        }
    }

    Ok(())
}

fn remove_run(path: &Path) {
    // The subscriber may not exist yet, so report on stderr.
    if let Err(e) = std::fs::remove_dir_all(path) {
        eprintln!(
            "Warning: Failed to remove old log directory {}: {}",
            path.display(),
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_run(base: &Path, at: DateTime<Utc>) -> PathBuf {
        let path = base.join(format!("{}{}", RUN_PREFIX, at.format(RUN_TIMESTAMP_FORMAT)));
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn test_parse_run_timestamp() {
        let dt = parse_run_timestamp("run_20250102_030405").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-01-02 03:04:05");
        assert!(parse_run_timestamp("run_garbage").is_none());
        assert!(parse_run_timestamp("other_20250102_030405").is_none());
    }

    #[test]
    fn test_cleanup_removes_expired_runs() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let old = make_run(dir.path(), now - chrono::Duration::days(45));
        let recent = make_run(dir.path(), now - chrono::Duration::hours(1));

        cleanup_old_logs(dir.path(), 30, 10).unwrap();

        assert!(!old.exists());
        assert!(recent.exists());
    }

    #[test]
    fn test_cleanup_keeps_most_recent_runs() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let runs: Vec<PathBuf> = (0..5)
            .map(|i| make_run(dir.path(), now - chrono::Duration::minutes(i * 10)))
            .collect();
        let unrelated = dir.path().join("notes");
        std::fs::create_dir_all(&unrelated).unwrap();

        cleanup_old_logs(dir.path(), 30, 3).unwrap();

        // runs[0] is the newest
        assert!(runs[0].exists());
        assert!(runs[1].exists());
        assert!(runs[2].exists());
        assert!(!runs[3].exists());
        assert!(!runs[4].exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_cleanup_never_removes_the_current_run() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let current = make_run(dir.path(), now);
        let older = make_run(dir.path(), now - chrono::Duration::minutes(5));

        cleanup_old_logs(dir.path(), 0, 0).unwrap();

        assert!(current.exists());
        assert!(!older.exists());
    }

    #[test]
    fn test_cleanup_missing_dir_is_ok() {
        let dir = tempdir().unwrap();
        assert!(cleanup_old_logs(&dir.path().join("absent"), 30, 10).is_ok());
    }
}

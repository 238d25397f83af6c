//! Logging setup: console plus a daily rolling file, with old files pruned.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "dinetrack";
const MAX_LOG_FILES: usize = 7;
const DEFAULT_FILTER: &str = "info,dinetrack=debug";

/// `<data dir>/dinetrack/logs`, where the data dir is `LOCALAPPDATA`,
/// `XDG_DATA_HOME` or `~/.local/share`, in that order.
pub fn default_log_dir() -> PathBuf {
    ["LOCALAPPDATA", "XDG_DATA_HOME"]
        .into_iter()
        .find_map(std::env::var_os)
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("share"))
        })
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dinetrack")
        .join("logs")
}

/// Delete all but the `keep` most recently modified log files in `dir`.
/// Returns how many were removed.
fn prune_logs(dir: &Path, keep: usize) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let mut logs: Vec<(SystemTime, PathBuf)> = entries
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX))
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            meta.is_file()
                .then(|| (meta.modified().unwrap_or(UNIX_EPOCH), entry.path()))
        })
        .collect();
    logs.sort_unstable_by(|a, b| b.0.cmp(&a.0));

    logs.into_iter()
        .skip(keep)
        .filter(|(_, path)| match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "log prune failed");
                false
            }
        })
        .count()
}

/// Install structured logging (console + rolling file).
///
/// `RUST_LOG` overrides the default filter. The returned guard flushes the
/// file writer when dropped, so the caller keeps it alive until exit.
pub fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let console_layer = fmt::layer().with_target(true);

    let log_dir = log_dir.map(Path::to_path_buf).unwrap_or_else(default_log_dir);
    let pruned = prune_logs(&log_dir, MAX_LOG_FILES);

    if let Err(e) = fs::create_dir_all(&log_dir) {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        warn!("Cannot create log directory {}: {e}; logging to console only", log_dir.display());
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    info!(log_dir = %log_dir.display(), pruned, "logging initialised");

    Some(guard)
}

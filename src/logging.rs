use crate::paths;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const RETENTION_DAYS: u64 = 30;
const LOG_FILE_PREFIX: &str = "turnsync";
const ROTATION_DAILY: &str = "daily";

pub struct LoggingSettings<'a> {
    pub level: Option<&'a str>,
    pub directory: Option<&'a str>,
    pub rotation: Option<&'a str>,
    pub retention_days: Option<u64>,
}

/// Console output goes to stderr so stdout stays clean for JSON views.
pub fn setup_tracing_with_settings(settings: LoggingSettings<'_>) -> Option<PathBuf> {
    let log_dir = resolve_log_dir(settings.directory).ok()?;
    let retention_days = settings.retention_days.unwrap_or(RETENTION_DAYS);
    let _ = cleanup_old_logs(&log_dir, retention_days);

    let file_appender = file_appender(&log_dir, settings.rotation.unwrap_or(ROTATION_DAILY));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Dropping the guard would stop the writer thread.
    let _ = LOG_GUARD.set(guard);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();
    // Files keep source locations; the terminal stays short.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(env_filter(settings.level))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    Some(log_dir)
}

/// An explicit level wins over `RUST_LOG`. Chatty HTTP crates stay at warn.
fn env_filter(level: Option<&str>) -> EnvFilter {
    let quiet = |level: &str| {
        EnvFilter::new(format!(
            "turnsync={level},hyper=warn,hyper_util=warn,reqwest=warn"
        ))
    };
    match level {
        Some(level) => quiet(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| quiet("info")),
    }
}

fn file_appender(log_dir: &Path, rotation: &str) -> RollingFileAppender {
    match rotation {
        "hourly" => rolling::hourly(log_dir, LOG_FILE_PREFIX),
        "never" => rolling::never(log_dir, format!("{LOG_FILE_PREFIX}.log")),
        _ => rolling::daily(log_dir, LOG_FILE_PREFIX),
    }
}

fn resolve_log_dir(configured: Option<&str>) -> Result<PathBuf> {
    let dir = match configured {
        Some(path) => paths::expand_tilde(path),
        None => paths::logs_dir(),
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Remove rotated log files older than `retention_days`. Returns how many
/// were deleted.
fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> Result<usize> {
    let max_age = Duration::from_secs(60 * 60 * 24 * retention_days);
    let now = SystemTime::now();
    let stale = std::fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
        })
        .filter(|entry| {
            entry
                .metadata()
                .ok()
                .filter(|meta| meta.is_file())
                .and_then(|meta| meta.modified().ok())
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > max_age)
        });
    Ok(stale
        .filter(|entry| std::fs::remove_file(entry.path()).is_ok())
        .count())
}

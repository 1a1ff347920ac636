use std::path::PathBuf;
use std::sync::OnceLock;

static TURNSYNC_HOME: OnceLock<PathBuf> = OnceLock::new();

/// Returns the turnsync home directory (`~/.turnsync/`).
/// Supports `$TURNSYNC_HOME` env override. Cached via `OnceLock`.
pub fn turnsync_home() -> &'static PathBuf {
    TURNSYNC_HOME.get_or_init(|| {
        if let Ok(val) = std::env::var("TURNSYNC_HOME") {
            let p = PathBuf::from(val);
            if !p.as_os_str().is_empty() {
                return p;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".turnsync")
    })
}

/// `~/.turnsync/logs/`
pub fn logs_dir() -> PathBuf {
    turnsync_home().join("logs")
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

pub const DEFAULT_DEBUG_LOG: &str = "~/Upgrade-debug.log";
pub const DEFAULT_FAILED_NODES: &str = "~/Upgrade-Failed.session";

/// Expands a leading `~` to the current user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Some(raw) = path.to_str() else {
        return path.to_path_buf();
    };
    let rest = if raw == "~" {
        ""
    } else if let Some(rest) = raw.strip_prefix("~/") {
        rest
    } else {
        return path.to_path_buf();
    };
    match home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Session suffix used to name remote backups, derived from the run's start time.
pub fn backup_suffix(now: DateTime<Local>) -> String {
    now.format("%Y%m%d-%H%M%S").to_string()
}

pub fn default_rollback_path(suffix: &str) -> PathBuf {
    PathBuf::from(format!("~/Upgrade-Rollback-{suffix}.session"))
}

//! Per-user state and cache directory resolution.
//!
//! Follows the XDG base directory spec when the environment provides it,
//! falling back to `~/.local/state` / `~/.cache` and finally `/tmp`.

use std::path::PathBuf;

const APP_DIR: &str = "ghd";

pub fn state_dir() -> PathBuf {
    if let Some(state) = std::env::var_os("XDG_STATE_HOME") {
        PathBuf::from(state).join(APP_DIR)
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home)
            .join(".local")
            .join("state")
            .join(APP_DIR)
    } else {
        PathBuf::from("/tmp").join(APP_DIR)
    }
}

pub fn cache_dir() -> PathBuf {
    if let Some(cache) = std::env::var_os("XDG_CACHE_HOME") {
        PathBuf::from(cache).join(APP_DIR)
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".cache").join(APP_DIR)
    } else {
        PathBuf::from("/tmp").join(APP_DIR)
    }
}

/// Location of the frecency history store.
pub fn history_path() -> PathBuf {
    state_dir().join("history.json")
}

/// Directory holding cached run logs, one JSON record per (chain, run).
pub fn log_cache_dir() -> PathBuf {
    cache_dir().join("logs")
}

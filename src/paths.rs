//! Centralized filesystem paths for ulticlock.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | App data | `~/Library/Application Support/ulticlock/` | `~/.local/share/ulticlock/` |
//! | Config | `~/Library/Application Support/ulticlock/` | `~/.config/ulticlock/` |
//!
//! # Environment Overrides
//!
//! - `ULTICLOCK_DATA_DIR` overrides [`data_dir`]
//! - `ULTICLOCK_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Holds the event database, action plugins and logs.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("ULTICLOCK_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("ulticlock"))
        .unwrap_or_else(|| PathBuf::from("/tmp/ulticlock-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("ULTICLOCK_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("ulticlock"))
        .unwrap_or_else(|| PathBuf::from("/tmp/ulticlock-config"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default event database (`data_dir()/events.db`).
#[must_use]
pub fn db_file() -> PathBuf {
    data_dir().join("events.db")
}

/// Default action plugin directory (`data_dir()/plugins/`).
#[must_use]
pub fn plugins_dir() -> PathBuf {
    data_dir().join("plugins")
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

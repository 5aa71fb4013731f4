//! Centralized path resolution for SmartCache
//!
//! The base directory follows platform standards and can be overridden with
//! the `SMARTCACHE_HOME` environment variable:
//! - **macOS**: `~/Library/Application Support/SmartCache/`
//! - **Windows**: `%LOCALAPPDATA%\SmartCache\`
//! - **Linux**: `$XDG_DATA_HOME/SmartCache/` (fallback `~/.local/share/SmartCache/`)
//!
//! ```text
//! SmartCache/
//! ├── config.toml
//! ├── cache/
//! │   └── <cache_type>/<key>.json
//! └── logs/
//!     └── smartcache_<date>.log
//! ```

use once_cell::sync::Lazy;
use std::path::PathBuf;

/// Environment variable overriding the base directory
pub const HOME_ENV_VAR: &str = "SMARTCACHE_HOME";

static BASE_DIRECTORY: Lazy<PathBuf> = Lazy::new(resolve_base_directory);

fn resolve_base_directory() -> PathBuf {
    const APP_DIR: &str = "SmartCache";

    if let Ok(home) = std::env::var(HOME_ENV_VAR) {
        if !home.trim().is_empty() {
            return PathBuf::from(home);
        }
    }

    if let Some(dir) = dirs::data_local_dir() {
        return dir.join(APP_DIR);
    }

    if let Some(dir) = dirs::data_dir() {
        return dir.join(APP_DIR);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(APP_DIR);
    }

    PathBuf::from(APP_DIR)
}

/// Root directory for config, persisted cache and logs
pub fn get_base_directory() -> PathBuf {
    BASE_DIRECTORY.clone()
}

/// Root of the JSON persisted tier
///
/// Documents live below it at `cache/<cache_type>/<key>.json`, the
/// `cache` segment being part of the namespace path itself.
pub fn get_cache_directory() -> PathBuf {
    get_base_directory()
}

pub fn get_logs_directory() -> PathBuf {
    BASE_DIRECTORY.join("logs")
}

pub fn get_config_path() -> PathBuf {
    BASE_DIRECTORY.join("config.toml")
}

/// Ensures all required directories exist
pub fn ensure_all_directories() -> Result<(), String> {
    let dirs_to_create = [
        ("base", get_base_directory()),
        ("cache", get_base_directory().join("cache")),
        ("logs", get_logs_directory()),
    ];

    for (name, dir) in dirs_to_create {
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                format!("Failed to create {} directory at {}: {}", name, dir.display(), e)
            })?;
        }
    }

    Ok(())
}

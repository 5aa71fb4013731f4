/// Configuration utilities - loading, reloading, and access helpers
///
/// The global CONFIG is the single source of truth once loaded. Readers that
/// run before `load_config()` see the defaults.
use super::schemas::SmartCacheConfig;
use crate::logger::{self, LogTag};
use crate::paths;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::path::Path;

/// Global configuration instance
pub static CONFIG: OnceCell<RwLock<SmartCacheConfig>> = OnceCell::new();

/// Parse and validate a TOML document
///
/// Unknown keys are reported and ignored.
pub fn parse_config(contents: &str) -> Result<SmartCacheConfig, String> {
    let table: toml::Table = contents
        .parse()
        .map_err(|e| format!("Failed to parse config: {}", e))?;

    for key in table.keys() {
        if !SmartCacheConfig::FIELDS.contains(&key.as_str()) {
            logger::warning(LogTag::Config, &format!("Ignoring unknown config key '{}'", key));
        }
    }

    let config: SmartCacheConfig = toml::Value::Table(table)
        .try_into()
        .map_err(|e| format!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<SmartCacheConfig, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;
    parse_config(&contents).map_err(|e| format!("{} ({})", e, path.display()))
}

/// Load configuration from the default path and initialize the global CONFIG
pub fn load_config() -> Result<(), String> {
    load_config_from_path(&paths::get_config_path())
}

/// Load configuration from a specific file path
///
/// A missing file is not an error: defaults are used and a warning is logged.
pub fn load_config_from_path(path: &Path) -> Result<(), String> {
    let config = if path.exists() {
        read_config_file(path)?
    } else {
        logger::warning(
            LogTag::Config,
            &format!("Config file '{}' not found, using default values", path.display()),
        );
        SmartCacheConfig::default()
    };

    CONFIG
        .set(RwLock::new(config))
        .map_err(|_| "Config already initialized".to_string())?;

    logger::debug(LogTag::Config, &format!("Configuration loaded from {}", path.display()));
    Ok(())
}

/// Reload configuration from a specific file path
///
/// The configuration is replaced atomically; caches already built keep the
/// options they were constructed with.
pub fn reload_config_from_path(path: &Path) -> Result<(), String> {
    let new_config = read_config_file(path)?;

    match CONFIG.get() {
        Some(lock) => {
            *lock.write() = new_config;
            logger::info(LogTag::Config, &format!("Configuration reloaded from {}", path.display()));
            Ok(())
        }
        None => Err("Config not initialized. Call load_config() first.".to_string()),
    }
}

/// Execute a function with read access to the configuration
pub fn with_config<F, R>(f: F) -> R
where
    F: FnOnce(&SmartCacheConfig) -> R,
{
    match CONFIG.get() {
        Some(lock) => f(&lock.read()),
        None => f(&SmartCacheConfig::default()),
    }
}

/// Get a clone of the entire configuration
pub fn get_config_clone() -> SmartCacheConfig {
    with_config(|cfg| cfg.clone())
}

/// Save the current configuration to disk
pub fn save_config(path: Option<&Path>) -> Result<(), String> {
    let default_path = paths::get_config_path();
    let path = path.unwrap_or(&default_path);

    let config_str = with_config(|cfg| {
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))
    })?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
    }

    std::fs::write(path, config_str)
        .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

    Ok(())
}

pub fn is_config_initialized() -> bool {
    CONFIG.get().is_some()
}

//! Configuration for SmartCache
//!
//! Values are loaded from a TOML file (`<base>/config.toml` by default) into a
//! global instance; missing files and missing fields fall back to defaults.

pub mod macros;
pub mod schemas;
pub mod utils;

pub use schemas::SmartCacheConfig;
pub use utils::{
    get_config_clone, is_config_initialized, load_config, load_config_from_path, parse_config,
    reload_config_from_path, save_config, with_config,
};

/// Logger configuration derived from command-line flags
///
/// Debug output is opt-in per tag (`--debug-cache`, `--debug-queue`, ...),
/// verbose output needs `--verbose` or `--verbose-<tag>`. `--log-level <level>`
/// sets the threshold directly and `--log-tags cache,queue` restricts output to
/// the listed tags (errors always pass).
use super::levels::LogLevel;
use super::tags::LogTag;
use crate::arguments::{get_arg_value, get_cmd_args, is_quiet_enabled, is_verbose_enabled};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum level shown (messages above it are dropped)
    pub min_level: LogLevel,
    /// Tags allowed through; empty = all tags
    pub enabled_tags: HashSet<String>,
    /// Tags with debug output enabled
    pub debug_tags: HashSet<String>,
    /// Tags with verbose output enabled
    pub verbose_tags: HashSet<String>,
    /// Mirror console output into the log file
    pub file_logging: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            enabled_tags: HashSet::new(),
            debug_tags: HashSet::new(),
            verbose_tags: HashSet::new(),
            file_logging: true,
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> = Lazy::new(|| RwLock::new(LoggerConfig::default()));

impl LoggerConfig {
    pub fn is_tag_enabled(&self, tag: &LogTag) -> bool {
        self.enabled_tags.is_empty() || self.enabled_tags.contains(tag.to_debug_key())
    }

    pub fn is_debug_enabled(&self, tag: &LogTag) -> bool {
        self.min_level == LogLevel::Verbose || self.debug_tags.contains(tag.to_debug_key())
    }

    pub fn is_verbose_enabled(&self, tag: &LogTag) -> bool {
        self.min_level == LogLevel::Verbose || self.verbose_tags.contains(tag.to_debug_key())
    }
}

pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG.read().clone()
}

/// Run `f` against the active configuration under a single read lock
pub fn with_logger_config<R>(f: impl FnOnce(&LoggerConfig) -> R) -> R {
    f(&LOGGER_CONFIG.read())
}

pub fn set_logger_config(config: LoggerConfig) {
    *LOGGER_CONFIG.write() = config;
}

/// Build the logger configuration from the global command-line arguments
pub fn init_from_args() {
    let mut config = LoggerConfig::default();

    if is_verbose_enabled() {
        config.min_level = LogLevel::Verbose;
    } else if is_quiet_enabled() {
        config.min_level = LogLevel::Warning;
    } else if let Some(value) = get_arg_value("--log-level") {
        match value.parse() {
            Ok(level) => config.min_level = level,
            Err(e) => eprintln!("Ignoring --log-level: {}", e),
        }
    }

    if let Some(value) = get_arg_value("--log-tags") {
        config.enabled_tags = parse_tag_list(&value);
    }

    for arg in &get_cmd_args() {
        if let Some(tag) = arg.strip_prefix("--verbose-") {
            config.verbose_tags.insert(tag.to_string());
            config.debug_tags.insert(tag.to_string());
        } else if let Some(tag) = arg.strip_prefix("--debug-") {
            config.debug_tags.insert(tag.to_string());
        } else if arg == "--no-log-file" {
            config.file_logging = false;
        }
    }

    // Debug tags raise the threshold so their messages are not cut by min_level
    if !config.debug_tags.is_empty() && config.min_level < LogLevel::Debug {
        config.min_level = LogLevel::Debug;
    }

    set_logger_config(config);
}

/// Split a comma separated tag list, lowercased, empty items skipped
fn parse_tag_list(value: &str) -> HashSet<String> {
    value
        .split(',')
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_list_parsing() {
        let tags = parse_tag_list("Cache, queue,,");
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("cache"));
        assert!(tags.contains("queue"));
    }

    #[test]
    fn test_enabled_tags_restrict_output() {
        let mut config = LoggerConfig::default();
        assert!(config.is_tag_enabled(&LogTag::Storage));

        config.enabled_tags = parse_tag_list("cache");
        assert!(config.is_tag_enabled(&LogTag::Cache));
        assert!(!config.is_tag_enabled(&LogTag::Storage));
    }
}

/// Core logging implementation with automatic filtering
use super::config::with_logger_config;
use super::levels::LogLevel;
use super::tags::LogTag;

/// Check if a log message should be displayed
///
/// Filtering rules:
/// 1. Errors are always shown
/// 2. Verbose level requires --verbose or --verbose-<tag>
/// 3. Other messages above the minimum level are dropped
/// 4. Debug level requires --debug-<tag>
/// 5. If enabled_tags is non-empty, the tag must be in the set
pub fn should_log(tag: &LogTag, level: LogLevel) -> bool {
    if level == LogLevel::Error {
        return true;
    }

    with_logger_config(|config| {
        // --verbose-<tag> opts a single tag in regardless of min_level
        if level == LogLevel::Verbose {
            return config.is_verbose_enabled(tag) && config.is_tag_enabled(tag);
        }

        if level > config.min_level {
            return false;
        }

        if level == LogLevel::Debug && !config.is_debug_enabled(tag) {
            return false;
        }

        config.is_tag_enabled(tag)
    })
}

pub fn log_internal(tag: LogTag, level: LogLevel, message: &str) {
    if !should_log(&tag, level) {
        return;
    }

    super::format::format_and_log(tag, level, message);
}

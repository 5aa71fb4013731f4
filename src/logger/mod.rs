//! Structured, tag-based logging for SmartCache
//!
//! ```rust
//! use smartcache::logger::{self, LogTag};
//!
//! logger::info(LogTag::Cache, "Serving BTC from memory");
//! logger::debug(LogTag::Queue, "rate-limit wait 1000ms"); // only with --debug-queue
//! ```
//!
//! `logger::init()` reads `--debug-<tag>`, `--verbose`, `--quiet`, `--log-tags` from the
//! command line and opens the daily log file. Without it, messages at Info and
//! above go to the console only.

mod config;
mod core;
mod file;
mod format;
mod levels;
mod tags;

pub use config::{get_logger_config, init_from_args, set_logger_config, with_logger_config, LoggerConfig};
pub use levels::LogLevel;
pub use tags::LogTag;

/// Initialize the logger system; call once at startup.
pub fn init() {
    config::init_from_args();
    file::init_file_logging();
}

/// Log at ERROR level (always shown)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level, shown only with `--debug-<tag>`
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level, shown only with `--verbose`
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}

/// Force flush pending log writes
pub fn flush() {
    file::flush_file_logging();
}

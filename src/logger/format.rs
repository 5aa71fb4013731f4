//! Log formatting and output with ANSI colors
//!
//! Handles colorized console output with aligned tag/level columns, dual
//! output (console + file) and broken pipe handling for piped commands.

use super::file::write_to_file;
use super::levels::LogLevel;
use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stderr, ErrorKind, Write};

/// Log format widths for alignment
const TAG_WIDTH: usize = 8;
const LEVEL_WIDTH: usize = 7;

/// Format and output a log message
pub fn format_and_log(tag: LogTag, level: LogLevel, message: &str) {
    let now = Local::now();
    let time = now.format("%H:%M:%S%.3f").to_string();

    let console_line = format!(
        "{} [{}] [{}] {}",
        time.dimmed(),
        format_tag(&tag),
        format_level(level),
        message
    );
    print_console_safe(&console_line);

    let file_line = format!(
        "{} [{}] [{}] {}",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        tag.to_plain_string(),
        level.as_str(),
        message
    );
    write_to_file(&file_line);
}

fn format_tag(tag: &LogTag) -> ColoredString {
    let label = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    match tag {
        LogTag::Cache => label.bright_cyan().bold(),
        LogTag::Queue => label.bright_yellow().bold(),
        LogTag::Storage => label.bright_blue().bold(),
        LogTag::Config => label.bright_magenta().bold(),
        LogTag::System => label.bright_green().bold(),
    }
}

fn format_level(level: LogLevel) -> ColoredString {
    let label = format!("{:<width$}", level.as_str(), width = LEVEL_WIDTH);
    match level {
        LogLevel::Error => label.bright_red().bold(),
        LogLevel::Warning => label.yellow().bold(),
        LogLevel::Info => label.white().bold(),
        LogLevel::Debug => label.dimmed(),
        LogLevel::Verbose => label.dimmed(),
    }
}

/// Print to stderr but ignore broken pipe errors
///
/// Logs go to stderr so the inspection tool can pipe its stdout.
fn print_console_safe(message: &str) {
    if let Err(e) = writeln!(stderr(), "{}", message) {
        if e.kind() == ErrorKind::BrokenPipe {
            return;
        }
    }
}

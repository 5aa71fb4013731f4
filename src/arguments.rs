/// Centralized argument handling for SmartCache binaries and the logger
///
/// Features:
/// - Global CMD_ARGS storage with thread-safe access
/// - Verbose/quiet flag checks used by the logger
/// - Small helpers for flag/value lookups
use once_cell::sync::Lazy;
use std::env;
use std::sync::Mutex;

/// Global command-line arguments storage
/// Binaries and tests may override the default env::args() collection
pub static CMD_ARGS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(env::args().collect()));

/// Sets the global command-line arguments
pub fn set_cmd_args(args: Vec<String>) {
    if let Ok(mut cmd_args) = CMD_ARGS.lock() {
        *cmd_args = args;
    }
}

/// Gets a copy of the current command-line arguments
pub fn get_cmd_args() -> Vec<String> {
    match CMD_ARGS.lock() {
        Ok(args) => args.clone(),
        Err(_) => {
            // Fallback to env::args if mutex is poisoned
            env::args().collect()
        }
    }
}

/// Checks if a specific argument is present in the command line
pub fn has_arg(arg: &str) -> bool {
    get_cmd_args().iter().any(|a| a == arg)
}

/// Gets the value of a command-line argument that follows a flag
pub fn get_arg_value(flag: &str) -> Option<String> {
    let args = get_cmd_args();
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1).cloned())
}

// =============================================================================
// LOGGER FLAG CHECKING FUNCTIONS
// =============================================================================

/// Verbose tracing for every tag
pub fn is_verbose_enabled() -> bool {
    has_arg("--verbose")
}

/// Quiet mode - only warnings and errors reach the console
pub fn is_quiet_enabled() -> bool {
    has_arg("--quiet")
}

/// Log tags identify the subsystem a message comes from.
///
/// The debug key of a tag is what `--debug-<key>` matches on the command line.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    /// Load orchestrator, event bus and snapshot updates
    Cache,
    /// Rate-limited work queue
    Queue,
    /// Persisted tier reads and writes
    Storage,
    Config,
    System,
}

impl LogTag {
    /// Key used by `--debug-<key>` / `--verbose-<key>` flags
    pub fn to_debug_key(&self) -> &'static str {
        match self {
            LogTag::Cache => "cache",
            LogTag::Queue => "queue",
            LogTag::Storage => "storage",
            LogTag::Config => "config",
            LogTag::System => "system",
        }
    }

    /// Uppercase label without colors, used in log files
    pub fn to_plain_string(&self) -> String {
        self.to_debug_key().to_uppercase()
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_plain_string())
    }
}

//! Error types for the cache engine and its persisted tier
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// A load was requested without a key; raised before anything is queued
    #[error("Config key cannot be empty")]
    MissingKey,

    /// The fetch function failed for this key
    #[error("Fetch failed for '{key}': {message}")]
    Fetch { key: String, message: String },

    /// The event bus shut down before a terminal event arrived
    #[error("Event channel closed while waiting for '{key}'")]
    ChannelClosed { key: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Key the error refers to, when there is one
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheError::Fetch { key, .. } | CacheError::ChannelClosed { key } => Some(key),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

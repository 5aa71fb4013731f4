//! Persisted tier for the smart cache
//!
//! A tier is a key-value JSON store addressed by namespace paths such as
//! `["cache", "prices", "BTC"]`. Ordinary misses, unreadable documents and
//! corrupt JSON all read as absence; only writes report errors.

mod json_dir;
mod memory;

pub use json_dir::JsonDirStore;
pub use memory::MemoryTier;

use crate::errors::StorageError;
use crate::logger::{self, LogTag};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Storage backend consumed by the cache engine
pub trait PersistedTier: Send + Sync {
    /// Whether a document exists at `path`
    fn exists(&self, path: &[&str]) -> bool;

    /// Read the document at `path`; `None` for missing or unreadable entries
    fn read(&self, path: &[&str]) -> Option<Value>;

    /// Create or overwrite the document at `path`
    fn write(&self, path: &[&str], value: &Value) -> Result<(), StorageError>;
}

/// Read a document and decode it into `T`, treating decode failures as absence
pub fn read_typed<T: DeserializeOwned>(tier: &dyn PersistedTier, path: &[&str]) -> Option<T> {
    let value = tier.read(path)?;
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            logger::warning(
                LogTag::Storage,
                &format!("Ignoring undecodable document at {}: {}", path.join("/"), e),
            );
            None
        }
    }
}

/// Encode `value` and write it at `path`
pub fn write_typed<T: Serialize>(
    tier: &dyn PersistedTier,
    path: &[&str],
    value: &T,
) -> Result<(), StorageError> {
    let encoded = serde_json::to_value(value)?;
    tier.write(path, &encoded)
}

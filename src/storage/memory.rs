/// In-process persisted tier, mainly for tests and embedders without a disk
use super::PersistedTier;
use crate::errors::StorageError;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MemoryTier {
    documents: RwLock<HashMap<String, Value>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    fn join(path: &[&str]) -> String {
        path.join("/")
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Stored paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.documents.read().keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl PersistedTier for MemoryTier {
    fn exists(&self, path: &[&str]) -> bool {
        self.documents.read().contains_key(&Self::join(path))
    }

    fn read(&self, path: &[&str]) -> Option<Value> {
        self.documents.read().get(&Self::join(path)).cloned()
    }

    fn write(&self, path: &[&str], value: &Value) -> Result<(), StorageError> {
        if path.is_empty() {
            return Err(StorageError::InvalidPath("empty path".to_string()));
        }
        self.documents.write().insert(Self::join(path), value.clone());
        Ok(())
    }
}

/// JSON-file persisted tier
///
/// Each namespace path maps to a file below the base directory: every segment
/// but the last is a directory, the last becomes `<segment>.json`. Segments are
/// percent-encoded so arbitrary keys stay inside their namespace directory.
use super::PersistedTier;
use crate::errors::StorageError;
use crate::logger::{self, LogTag};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct JsonDirStore {
    base: PathBuf,
}

impl JsonDirStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolve a namespace path to its file location
    pub fn file_path(&self, path: &[&str]) -> Result<PathBuf, StorageError> {
        let (last, dirs) = path
            .split_last()
            .ok_or_else(|| StorageError::InvalidPath("empty path".to_string()))?;

        let mut file = self.base.clone();
        for segment in dirs {
            file.push(encode_segment(segment)?);
        }
        file.push(format!("{}.{}", encode_segment(last)?, EXTENSION));
        Ok(file)
    }

    /// Decoded names of the documents stored directly under `namespace`
    pub fn list(&self, namespace: &[&str]) -> Vec<String> {
        let mut dir = self.base.clone();
        for segment in namespace {
            match encode_segment(segment) {
                Ok(encoded) => dir.push(encoded),
                Err(_) => return Vec::new(),
            }
        }

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut keys: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(EXTENSION))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(decode_segment))
            .collect();
        keys.sort();
        keys
    }

    /// Remove every document stored directly under `namespace`, returning how many were removed
    pub fn clear(&self, namespace: &[&str]) -> Result<usize, StorageError> {
        let mut removed = 0;
        for key in self.list(namespace) {
            let mut path: Vec<&str> = namespace.to_vec();
            path.push(&key);
            fs::remove_file(self.file_path(&path)?)?;
            removed += 1;
        }
        Ok(removed)
    }
}

impl PersistedTier for JsonDirStore {
    fn exists(&self, path: &[&str]) -> bool {
        self.file_path(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn read(&self, path: &[&str]) -> Option<Value> {
        let file = self.file_path(path).ok()?;
        let contents = match fs::read_to_string(&file) {
            Ok(contents) => contents,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    logger::warning(
                        LogTag::Storage,
                        &format!("Failed to read {}: {}", file.display(), e),
                    );
                }
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(value) => Some(value),
            Err(e) => {
                logger::warning(
                    LogTag::Storage,
                    &format!("Ignoring corrupt JSON in {}: {}", file.display(), e),
                );
                None
            }
        }
    }

    fn write(&self, path: &[&str], value: &Value) -> Result<(), StorageError> {
        let file = self.file_path(path)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }

        let json_data = serde_json::to_string_pretty(value)?;

        // Write to a temp file first, then rename over the target
        let temp = file.with_extension(format!("{}.tmp", EXTENSION));
        fs::write(&temp, json_data)?;
        fs::rename(&temp, &file)?;

        logger::debug(LogTag::Storage, &format!("Wrote {}", file.display()));
        Ok(())
    }
}

/// Percent-encode one path segment. Dots are escaped as well, so "." and ".."
/// can never address a parent directory.
fn encode_segment(segment: &str) -> Result<String, StorageError> {
    if segment.is_empty() {
        return Err(StorageError::InvalidPath("empty path segment".to_string()));
    }
    Ok(urlencoding::encode(segment).replace('.', "%2E"))
}

fn decode_segment(encoded: &str) -> String {
    match urlencoding::decode(encoded) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(encoded.as_bytes())).into_owned(),
    }
}

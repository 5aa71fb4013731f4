//! Core types for the smart cache: lifecycle events, per-key entries and load configs
use crate::errors::{CacheError, CacheResult};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bounds every cached value type must satisfy
pub trait CacheValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Terminal success for a key. `result: None` means the source confirmed there is no data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEvent<T> {
    pub key: String,
    pub timestamp_ms: i64,
    pub result: Option<T>,
}

impl<T> ResultEvent<T> {
    pub fn new(key: impl Into<String>, result: Option<T>) -> Self {
        Self {
            key: key.into(),
            timestamp_ms: now_ms(),
            result,
        }
    }

    /// Age relative to `now_ms`, never negative
    pub fn age_ms(&self, now_ms: i64) -> u64 {
        u64::try_from(now_ms.saturating_sub(self.timestamp_ms)).unwrap_or(0)
    }
}

/// Terminal failure for a key, carrying the fetch error's message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub key: String,
    pub timestamp_ms: i64,
    pub error: String,
}

impl ErrorEvent {
    pub fn new(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            timestamp_ms: now_ms(),
            error: error.into(),
        }
    }
}

/// Lifecycle event for one key, serialized with a kebab-case `type` tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CacheEvent<T> {
    /// Accepted by the work queue, waiting for its turn
    Queued {
        key: String,
        #[serde(rename = "timestampMs")]
        timestamp_ms: i64,
    },
    /// The queue started the mandatory delay before this fetch
    RateLimit {
        key: String,
        #[serde(rename = "timestampMs")]
        timestamp_ms: i64,
        /// Delay budget in milliseconds
        #[serde(rename = "limitExpiresMs")]
        limit_expires_ms: u64,
    },
    /// Delay elapsed, fetch function invoked
    Loading {
        key: String,
        #[serde(rename = "timestampMs")]
        timestamp_ms: i64,
    },
    Result(ResultEvent<T>),
    Error(ErrorEvent),
}

/// Discriminant of a [`CacheEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Queued,
    RateLimit,
    Loading,
    Result,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Queued => "queued",
            EventKind::RateLimit => "rate-limit",
            EventKind::Loading => "loading",
            EventKind::Result => "result",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl<T> CacheEvent<T> {
    pub fn queued(key: impl Into<String>) -> Self {
        CacheEvent::Queued {
            key: key.into(),
            timestamp_ms: now_ms(),
        }
    }

    pub fn rate_limit(key: impl Into<String>, limit_expires_ms: u64) -> Self {
        CacheEvent::RateLimit {
            key: key.into(),
            timestamp_ms: now_ms(),
            limit_expires_ms,
        }
    }

    pub fn loading(key: impl Into<String>) -> Self {
        CacheEvent::Loading {
            key: key.into(),
            timestamp_ms: now_ms(),
        }
    }

    pub fn result(key: impl Into<String>, result: Option<T>) -> Self {
        CacheEvent::Result(ResultEvent::new(key, result))
    }

    pub fn error(key: impl Into<String>, error: impl Into<String>) -> Self {
        CacheEvent::Error(ErrorEvent::new(key, error))
    }

    pub fn key(&self) -> &str {
        match self {
            CacheEvent::Queued { key, .. }
            | CacheEvent::RateLimit { key, .. }
            | CacheEvent::Loading { key, .. } => key,
            CacheEvent::Result(e) => &e.key,
            CacheEvent::Error(e) => &e.key,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        match self {
            CacheEvent::Queued { timestamp_ms, .. }
            | CacheEvent::RateLimit { timestamp_ms, .. }
            | CacheEvent::Loading { timestamp_ms, .. } => *timestamp_ms,
            CacheEvent::Result(e) => e.timestamp_ms,
            CacheEvent::Error(e) => e.timestamp_ms,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            CacheEvent::Queued { .. } => EventKind::Queued,
            CacheEvent::RateLimit { .. } => EventKind::RateLimit,
            CacheEvent::Loading { .. } => EventKind::Loading,
            CacheEvent::Result(_) => EventKind::Result,
            CacheEvent::Error(_) => EventKind::Error,
        }
    }

    /// `result` and `error` end a caller's subscription
    pub fn is_terminal(&self) -> bool {
        matches!(self, CacheEvent::Result(_) | CacheEvent::Error(_))
    }
}

/// Per-key state held in the snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub last_result_event: Option<ResultEvent<T>>,
    pub last_error_event: Option<ErrorEvent>,
    /// Most recent event of any kind, transient ones included
    pub last_request_event: Option<CacheEvent<T>>,
}

impl<T> Default for CacheEntry<T> {
    fn default() -> Self {
        Self {
            last_result_event: None,
            last_error_event: None,
            last_request_event: None,
        }
    }
}

impl<T> CacheEntry<T> {
    /// A fetch is queued, rate limited or loading for this key
    pub fn is_in_flight(&self) -> bool {
        self.last_request_event
            .as_ref()
            .map(|e| !e.is_terminal())
            .unwrap_or(false)
    }

    /// Last successfully fetched value, if any
    pub fn value(&self) -> Option<&T> {
        self.last_result_event.as_ref().and_then(|e| e.result.as_ref())
    }
}

/// Full key → entry mapping at a point in time
pub type Snapshot<T> = HashMap<String, CacheEntry<T>>;

/// Default freshness budget
pub const DEFAULT_MAX_AGE_MS: u64 = 60_000;
/// Default staleness window
pub const DEFAULT_MAX_STALE_MS: u64 = 30_000;

/// Per-call load parameters; unset budgets fall back to the cache defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadConfig {
    pub key: String,
    pub max_stale_ms: Option<u64>,
    pub max_age_ms: Option<u64>,
}

impl LoadConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            max_stale_ms: None,
            max_age_ms: None,
        }
    }

    pub fn max_age_ms(mut self, max_age_ms: u64) -> Self {
        self.max_age_ms = Some(max_age_ms);
        self
    }

    pub fn max_stale_ms(mut self, max_stale_ms: u64) -> Self {
        self.max_stale_ms = Some(max_stale_ms);
        self
    }

    /// Merge with defaults, rejecting an empty key
    pub(crate) fn resolve(&self, default_max_age_ms: u64, default_max_stale_ms: u64) -> CacheResult<ResolvedLoad> {
        if self.key.is_empty() {
            return Err(CacheError::MissingKey);
        }

        Ok(ResolvedLoad {
            key: self.key.clone(),
            max_age_ms: self.max_age_ms.unwrap_or(default_max_age_ms),
            max_stale_ms: self.max_stale_ms.unwrap_or(default_max_stale_ms),
        })
    }
}

impl From<&str> for LoadConfig {
    fn from(key: &str) -> Self {
        LoadConfig::new(key)
    }
}

impl From<String> for LoadConfig {
    fn from(key: String) -> Self {
        LoadConfig::new(key)
    }
}

/// Load parameters after defaults were applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedLoad {
    pub key: String,
    pub max_age_ms: u64,
    pub max_stale_ms: u64,
}

impl ResolvedLoad {
    /// Absolute horizon beyond which a value is never served
    pub fn horizon_ms(&self) -> u64 {
        self.max_age_ms.saturating_add(self.max_stale_ms)
    }
}

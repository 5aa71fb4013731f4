//! Freshness decisions for cached results
//!
//! `FORCE_SMART_CACHE_VALUE=true` makes every value valid regardless of age.
//! It exists for deterministic test runs only and must never be set in
//! production.
use super::types::now_ms;
use crate::logger::{self, LogTag};

/// Environment switch forcing every validity check to succeed
pub const FORCE_VALID_ENV_VAR: &str = "FORCE_SMART_CACHE_VALUE";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidityPolicy {
    force_valid: bool,
}

impl ValidityPolicy {
    /// Policy honoring the process-wide override
    pub fn from_env() -> Self {
        let force_valid = std::env::var(FORCE_VALID_ENV_VAR)
            .map(|v| v == "true")
            .unwrap_or(false);
        Self { force_valid }
    }

    /// Test-only: explicitly enable or disable the override
    pub fn with_force_valid(force_valid: bool) -> Self {
        Self { force_valid }
    }

    pub fn force_valid(&self) -> bool {
        self.force_valid
    }

    /// True if a value stamped at `timestamp_ms` is younger than `max_age_ms`
    pub fn is_valid(&self, timestamp_ms: i64, max_age_ms: u64) -> bool {
        self.is_valid_at(timestamp_ms, max_age_ms, now_ms())
    }

    pub fn is_valid_at(&self, timestamp_ms: i64, max_age_ms: u64, now_ms: i64) -> bool {
        if self.force_valid {
            logger::verbose(LogTag::Cache, "smart-cache forced valid = true");
            return true;
        }

        let age = i128::from(now_ms) - i128::from(timestamp_ms);
        age < i128::from(max_age_ms)
    }
}

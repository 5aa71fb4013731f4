use crate::config_struct;

// ============================================================================
// SMART CACHE
// ============================================================================

config_struct! {
    /// Settings shared by every cache instance built from configuration
    pub struct SmartCacheConfig {
        /// Freshness budget applied when a load does not set max_age_ms
        default_max_age_ms: u64 = 60_000,
        /// Staleness window applied when a load does not set max_stale_ms
        default_max_stale_ms: u64 = 30_000,
        /// Fixed delay before every fetch (used when requests_per_minute is 0)
        rate_limit_delay_ms: u64 = 1_000,
        /// Upstream request budget; when non-zero the delay is 60000 / rpm
        requests_per_minute: u32 = 0,
        /// Capacity of the lifecycle event broadcast channel
        event_channel_capacity: usize = 1_024,
        /// Persisted tier root; empty uses the platform data directory
        cache_dir: String = String::new(),
    }
}

impl SmartCacheConfig {
    /// Validate values that would break the engine's invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.default_max_age_ms == 0 {
            return Err("default_max_age_ms must be greater than zero".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity must be greater than zero".to_string());
        }
        if self.requests_per_minute == 0 && self.rate_limit_delay_ms == 0 {
            return Err(
                "rate_limit_delay_ms must be positive when requests_per_minute is 0".to_string(),
            );
        }
        Ok(())
    }
}

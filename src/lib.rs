pub mod arguments;
pub mod config;
pub mod errors; // Structured error types
pub mod logger;
pub mod paths;
pub mod smart_cache;
pub mod storage; // Persisted tier backends

pub use errors::{CacheError, CacheResult, StorageError};
pub use smart_cache::{
    CacheEntry, CacheEvent, CacheOptions, CacheStats, EventStream, Fetcher, LoadConfig, RateLimitPolicy,
    SmartCache, ValidityPolicy,
};
pub use storage::{JsonDirStore, MemoryTier, PersistedTier};

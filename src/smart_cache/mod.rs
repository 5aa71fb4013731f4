//! Smart cache: two-tier, request-coalescing, rate-limited loader
//!
//! ```text
//! load(key) ──► memory tier ──valid──► single result (refresh in background if stale)
//!                   │ miss
//!                   ▼
//!            persisted tier (once per key) ──valid──► restore + single result
//!                   │ miss
//!                   ▼
//!       subscribe to key events ──► fire_load ──► work queue (1 worker)
//!                                                   rate-limit ─► loading ─► fetch
//!                                                   result / error ─► event bus
//! ```
//!
//! Every state change goes through the event bus, which owns the snapshot.
//! At most one fetch is in flight per key, and the single worker serializes
//! fetches across all keys.

mod fetcher;
mod queue;
mod store;
mod types;
mod validity;

#[cfg(test)]
mod tests;

pub use fetcher::Fetcher;
pub use queue::RateLimitPolicy;
pub use types::{
    now_ms, CacheEntry, CacheEvent, CacheValue, ErrorEvent, EventKind, LoadConfig, ResultEvent,
    Snapshot, DEFAULT_MAX_AGE_MS, DEFAULT_MAX_STALE_MS,
};
pub use validity::{ValidityPolicy, FORCE_VALID_ENV_VAR};

use crate::config::SmartCacheConfig;
use crate::errors::{CacheError, CacheResult};
use crate::logger::{self, LogTag};
use crate::storage::{self, PersistedTier};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use queue::WorkQueue;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use store::EventBus;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use types::ResolvedLoad;

/// Stream of lifecycle events returned by [`SmartCache::load`]
pub type EventStream<T> = BoxStream<'static, Result<CacheEvent<T>, CacheError>>;

/// Construction-time settings of a cache instance
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOptions {
    pub default_max_age_ms: u64,
    pub default_max_stale_ms: u64,
    pub rate_limit: RateLimitPolicy,
    pub event_channel_capacity: usize,
    pub validity: ValidityPolicy,
}

impl CacheOptions {
    pub fn from_config(config: &SmartCacheConfig) -> Self {
        Self {
            default_max_age_ms: config.default_max_age_ms,
            default_max_stale_ms: config.default_max_stale_ms,
            rate_limit: RateLimitPolicy::from_config(config),
            event_channel_capacity: config.event_channel_capacity,
            validity: ValidityPolicy::from_env(),
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitPolicy) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_validity(mut self, validity: ValidityPolicy) -> Self {
        self.validity = validity;
        self
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::from_config(&SmartCacheConfig::default())
    }
}

/// Point-in-time counters for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub with_result: usize,
    pub in_flight: usize,
    pub errored: usize,
    pub queue_pending: usize,
    pub fetches_started: u64,
    pub fetches_failed: u64,
}

struct Inner<T: CacheValue> {
    cache_type: String,
    tier: Arc<dyn PersistedTier>,
    bus: Arc<EventBus<T>>,
    queue: WorkQueue,
    options: CacheOptions,
    local_checked: Mutex<HashSet<String>>,
}

/// Cloneable handle to one cache instance
pub struct SmartCache<T: CacheValue> {
    inner: Arc<Inner<T>>,
}

impl<T: CacheValue> Clone for SmartCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: CacheValue> SmartCache<T> {
    /// Build a cache with default options.
    ///
    /// Must be called inside a tokio runtime: the queue worker is spawned here.
    pub fn new<F>(tier: Arc<dyn PersistedTier>, cache_type: impl Into<String>, fetcher: F) -> CacheResult<Self>
    where
        F: Fetcher<T> + 'static,
    {
        Self::with_options(tier, cache_type, fetcher, CacheOptions::default())
    }

    pub fn with_options<F>(
        tier: Arc<dyn PersistedTier>,
        cache_type: impl Into<String>,
        fetcher: F,
        options: CacheOptions,
    ) -> CacheResult<Self>
    where
        F: Fetcher<T> + 'static,
    {
        let cache_type = cache_type.into();
        if cache_type.is_empty() {
            return Err(CacheError::Config("cache type cannot be empty".to_string()));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(CacheError::Config(
                "SmartCache must be created inside a tokio runtime".to_string(),
            ));
        }

        if options.validity.force_valid() {
            logger::warning(
                LogTag::Cache,
                &format!(
                    "{}=true: every cached '{}' value is treated as valid (test-only override)",
                    FORCE_VALID_ENV_VAR, cache_type
                ),
            );
        }

        let bus = Arc::new(EventBus::new(
            cache_type.clone(),
            tier.clone(),
            options.event_channel_capacity,
        ));
        let queue = WorkQueue::spawn(bus.clone(), Arc::new(fetcher), options.rate_limit);

        logger::debug(
            LogTag::Cache,
            &format!(
                "SmartCache '{}' ready (max_age={}ms, max_stale={}ms, delay={:?})",
                cache_type,
                options.default_max_age_ms,
                options.default_max_stale_ms,
                options.rate_limit.delay()
            ),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                cache_type,
                tier,
                bus,
                queue,
                options,
                local_checked: Mutex::new(HashSet::new()),
            }),
        })
    }

    pub fn cache_type(&self) -> &str {
        &self.inner.cache_type
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    fn resolve(&self, config: &LoadConfig) -> CacheResult<ResolvedLoad> {
        config.resolve(
            self.inner.options.default_max_age_ms,
            self.inner.options.default_max_stale_ms,
        )
    }

    /// Load a key.
    ///
    /// A value valid within `max_age + max_stale` is returned as a single-item
    /// stream; when it is older than `max_age` a background refresh is queued
    /// as well. Otherwise the stream follows the key's fetch and ends after
    /// its `result`, or yields `Err` for its `error`.
    pub fn load(&self, config: impl Into<LoadConfig>) -> CacheResult<EventStream<T>> {
        let load = self.resolve(&config.into())?;

        if let Some(hit) = self.load_from_local_if_valid(&load) {
            let stale = !self.inner.options.validity.is_valid(hit.timestamp_ms, load.max_age_ms);
            if stale {
                logger::debug(
                    LogTag::Cache,
                    &format!("Serving stale '{}', refreshing in background", load.key),
                );
                self.fire_load_key(&load.key);
            } else {
                logger::debug(LogTag::Cache, &format!("Serving fresh '{}'", load.key));
            }

            let event = CacheEvent::Result(hit);
            return Ok(stream::once(async move { Ok(event) }).boxed());
        }

        // Subscribe before queueing so no event for the key can be missed
        let receiver = self.inner.bus.subscribe_events();
        self.fire_load_key(&load.key);

        Ok(key_event_stream(receiver, self.inner.bus.clone(), load.key))
    }

    /// Load a key and wait for its value
    pub async fn load_value(&self, config: impl Into<LoadConfig>) -> CacheResult<Option<T>> {
        let mut events = self.load(config)?;
        let mut last_key = String::new();

        while let Some(event) = events.next().await {
            match event? {
                CacheEvent::Result(result) => return Ok(result.result),
                other => last_key = other.key().to_string(),
            }
        }

        Err(CacheError::ChannelClosed { key: last_key })
    }

    /// Queue a fetch unless one is already queued, rate limited or loading
    /// for the key. Returns whether a fetch was queued.
    pub fn fire_load(&self, config: impl Into<LoadConfig>) -> CacheResult<bool> {
        let load = self.resolve(&config.into())?;
        Ok(self.fire_load_key(&load.key))
    }

    fn fire_load_key(&self, key: &str) -> bool {
        if self.inner.bus.try_mark_queued(key).is_none() {
            logger::debug(
                LogTag::Cache,
                &format!("'{}' already in flight, joining existing request", key),
            );
            return false;
        }

        if !self.inner.queue.enqueue(key) {
            // Release the key so a later load can retry
            logger::error(LogTag::Queue, &format!("Work queue stopped, cannot fetch '{}'", key));
            self.inner
                .bus
                .publish(CacheEvent::error(key, "work queue stopped"));
            return false;
        }

        true
    }

    fn load_from_local_if_valid(&self, load: &ResolvedLoad) -> Option<ResultEvent<T>> {
        let horizon = load.horizon_ms();
        let validity = &self.inner.options.validity;

        if let Some(cached) = self.inner.bus.last_result(&load.key) {
            if validity.is_valid(cached.timestamp_ms, horizon) {
                return Some(cached);
            }
        }

        if !self.inner.local_checked.lock().insert(load.key.clone()) {
            return None;
        }

        let persisted = self.read_persisted(&load.key)?;
        if !validity.is_valid(persisted.timestamp_ms, horizon) {
            logger::debug(
                LogTag::Storage,
                &format!("Persisted '{}' is past its horizon, ignoring", load.key),
            );
            return None;
        }

        logger::debug(LogTag::Storage, &format!("Rehydrated '{}' from persisted tier", load.key));
        self.inner.bus.restore_result(persisted.clone());
        Some(persisted)
    }

    /// Typed namespace first, then the legacy untyped one
    fn read_persisted(&self, key: &str) -> Option<ResultEvent<T>> {
        let typed = ["cache", self.inner.cache_type.as_str(), key];
        let legacy = ["cache", key];

        for path in [&typed[..], &legacy[..]] {
            if !self.inner.tier.exists(path) {
                continue;
            }

            match storage::read_typed::<CacheEvent<T>>(self.inner.tier.as_ref(), path) {
                Some(CacheEvent::Result(result)) => return Some(result),
                Some(other) => logger::warning(
                    LogTag::Storage,
                    &format!("Expected a result event at {}, found {}", path.join("/"), other.kind()),
                ),
                None => {}
            }
        }

        None
    }

    /// Current entry for a key; never triggers a fetch
    pub fn peek(&self, key: &str) -> Option<CacheEntry<T>> {
        self.inner.bus.peek(key)
    }

    /// The key's entry now and after every snapshot change
    pub fn from_cache(&self, key: &str) -> BoxStream<'static, Option<CacheEntry<T>>> {
        let receiver = self.inner.bus.subscribe_snapshots();
        let key = key.to_string();

        stream::unfold((receiver, key, true), |(mut receiver, key, first)| async move {
            if !first && receiver.changed().await.is_err() {
                return None;
            }
            let entry = receiver.borrow_and_update().get(&key).cloned();
            Some((entry, (receiver, key, false)))
        })
        .boxed()
    }

    /// Every lifecycle event for one key, from now on
    pub fn events_for(&self, key: &str) -> BoxStream<'static, CacheEvent<T>> {
        let key = key.to_string();
        self.events()
            .filter(move |event| futures::future::ready(event.key() == key))
            .boxed()
    }

    /// Every lifecycle event for all keys, from now on
    pub fn events(&self) -> BoxStream<'static, CacheEvent<T>> {
        let receiver = self.inner.bus.subscribe_events();

        stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(RecvError::Lagged(skipped)) => {
                        logger::warning(LogTag::Cache, &format!("Event subscriber lagged, skipped {}", skipped));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Snapshot<T>> {
        self.inner.bus.subscribe_snapshots()
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        self.inner.bus.snapshot()
    }

    /// Inject an event as if the queue had produced it
    pub fn publish(&self, event: CacheEvent<T>) {
        self.inner.bus.publish(event);
    }

    pub fn stats(&self) -> CacheStats {
        let snapshot = self.inner.bus.snapshot();
        let counters = self.inner.queue.counters();

        CacheStats {
            entries: snapshot.len(),
            with_result: snapshot.values().filter(|e| e.last_result_event.is_some()).count(),
            in_flight: snapshot.values().filter(|e| e.is_in_flight()).count(),
            errored: snapshot.values().filter(|e| e.last_error_event.is_some()).count(),
            queue_pending: counters.pending.load(Ordering::SeqCst),
            fetches_started: counters.fetches_started.load(Ordering::SeqCst),
            fetches_failed: counters.fetches_failed.load(Ordering::SeqCst),
        }
    }
}

/// Events for `key` until its terminal event
fn key_event_stream<T: CacheValue>(
    receiver: broadcast::Receiver<CacheEvent<T>>,
    bus: Arc<EventBus<T>>,
    key: String,
) -> EventStream<T> {
    stream::unfold(Some((receiver, bus, key)), |state| async move {
        let (mut receiver, bus, key) = state?;

        loop {
            let event = match receiver.recv().await {
                Ok(event) if event.key() == key => event,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    logger::warning(
                        LogTag::Cache,
                        &format!("Subscriber for '{}' lagged, skipped {} events", key, skipped),
                    );
                    // The terminal event may be among the skipped ones
                    match bus.peek(&key).and_then(|entry| entry.last_request_event) {
                        Some(last) if last.is_terminal() => last,
                        _ => continue,
                    }
                }
                Err(RecvError::Closed) => {
                    return Some((Err(CacheError::ChannelClosed { key: key.clone() }), None));
                }
            };

            return match event {
                CacheEvent::Error(error) => Some((
                    Err(CacheError::Fetch {
                        key: error.key,
                        message: error.error,
                    }),
                    None,
                )),
                event if event.is_terminal() => Some((Ok(event), None)),
                event => Some((Ok(event), Some((receiver, bus, key)))),
            };
        }
    })
    .boxed()
}

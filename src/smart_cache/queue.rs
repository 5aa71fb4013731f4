//! Rate-limited work queue
//!
//! One FIFO and exactly one worker task for the whole cache: fetches for
//! different keys never overlap, and each one waits out the rate-limit delay
//! before it runs.

use super::fetcher::Fetcher;
use super::store::EventBus;
use super::types::{CacheEvent, CacheValue};
use crate::config::SmartCacheConfig;
use crate::logger::{self, LogTag};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Smallest delay ever applied before a fetch
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Computes the mandatory delay before each fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    fixed_delay: Duration,
    requests_per_minute: u32,
}

impl RateLimitPolicy {
    /// Same delay before every fetch
    pub fn fixed(delay: Duration) -> Self {
        Self {
            fixed_delay: delay,
            requests_per_minute: 0,
        }
    }

    /// Spread fetches evenly to stay within a per-minute budget
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            fixed_delay: Duration::from_millis(1_000),
            requests_per_minute,
        }
    }

    pub fn from_config(config: &SmartCacheConfig) -> Self {
        if config.requests_per_minute > 0 {
            Self::per_minute(config.requests_per_minute)
        } else {
            Self::fixed(Duration::from_millis(config.rate_limit_delay_ms))
        }
    }

    /// Delay to apply before the next fetch; always positive
    pub fn delay(&self) -> Duration {
        let delay = if self.requests_per_minute > 0 {
            Duration::from_millis(60_000 / u64::from(self.requests_per_minute))
        } else {
            self.fixed_delay
        };
        delay.max(MIN_DELAY)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(1_000))
    }
}

/// Counters shared between the queue handle and its worker
#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    pub pending: AtomicUsize,
    pub fetches_started: AtomicU64,
    pub fetches_failed: AtomicU64,
}

struct QueueItem {
    key: String,
}

/// Handle to the worker; dropping it lets the worker drain and exit
pub(crate) struct WorkQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
    counters: Arc<QueueCounters>,
}

impl WorkQueue {
    /// Spawn the worker on the current tokio runtime
    pub fn spawn<T: CacheValue>(
        bus: Arc<EventBus<T>>,
        fetcher: Arc<dyn Fetcher<T>>,
        policy: RateLimitPolicy,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(QueueCounters::default());

        tokio::spawn(run_worker(rx, bus, fetcher, policy, counters.clone()));

        Self { tx, counters }
    }

    /// Append a key; false if the worker is gone
    pub fn enqueue(&self, key: &str) -> bool {
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        let sent = self
            .tx
            .send(QueueItem {
                key: key.to_string(),
            })
            .is_ok();

        if !sent {
            self.counters.pending.fetch_sub(1, Ordering::SeqCst);
        }
        sent
    }

    pub fn counters(&self) -> &QueueCounters {
        &self.counters
    }
}

async fn run_worker<T: CacheValue>(
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
    bus: Arc<EventBus<T>>,
    fetcher: Arc<dyn Fetcher<T>>,
    policy: RateLimitPolicy,
    counters: Arc<QueueCounters>,
) {
    while let Some(item) = rx.recv().await {
        let key = item.key;
        let delay = policy.delay();
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);

        logger::debug(LogTag::Queue, &format!("pre-ratelimit '{}' ({}ms)", key, delay_ms));
        bus.publish(CacheEvent::rate_limit(key.as_str(), delay_ms));

        tokio::time::sleep(delay).await;

        logger::debug(LogTag::Queue, &format!("post-ratelimit '{}'", key));
        bus.publish(CacheEvent::loading(key.as_str()));

        counters.pending.fetch_sub(1, Ordering::SeqCst);
        counters.fetches_started.fetch_add(1, Ordering::SeqCst);

        // A panicking fetcher must not take the only worker down with it
        let outcome = AssertUnwindSafe(fetcher.fetch(&key)).catch_unwind().await;

        let event = match outcome {
            Ok(Ok(value)) => CacheEvent::result(key.as_str(), value),
            Ok(Err(e)) => {
                counters.fetches_failed.fetch_add(1, Ordering::SeqCst);
                logger::warning(LogTag::Queue, &format!("Fetch failed for '{}': {:#}", key, e));
                CacheEvent::error(key.as_str(), format!("{:#}", e))
            }
            Err(_) => {
                counters.fetches_failed.fetch_add(1, Ordering::SeqCst);
                logger::error(LogTag::Queue, &format!("Fetch panicked for '{}'", key));
                CacheEvent::error(key.as_str(), "fetch function panicked")
            }
        };

        if let CacheEvent::Result(result) = &event {
            let writer = bus.clone();
            let result = result.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || writer.persist(&result)).await {
                logger::warning(LogTag::Storage, &format!("Persist task failed for '{}': {}", key, e));
            }
        }
        bus.commit(event);
    }

    logger::debug(LogTag::Queue, "Work queue closed, worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_delays() {
        assert_eq!(RateLimitPolicy::default().delay(), Duration::from_millis(1_000));
        assert_eq!(RateLimitPolicy::fixed(Duration::ZERO).delay(), MIN_DELAY);
        assert_eq!(RateLimitPolicy::per_minute(120).delay(), Duration::from_millis(500));
        assert_eq!(RateLimitPolicy::per_minute(u32::MAX).delay(), MIN_DELAY);

        let mut config = SmartCacheConfig::default();
        config.rate_limit_delay_ms = 250;
        assert_eq!(RateLimitPolicy::from_config(&config).delay(), Duration::from_millis(250));
        config.requests_per_minute = 30;
        assert_eq!(RateLimitPolicy::from_config(&config).delay(), Duration::from_millis(2_000));
    }
}

//! Cache store and event bus
//!
//! The snapshot lives in a watch channel whose only sender is owned here, and
//! every write happens under `writer`, so the bus is the single writer of the
//! snapshot. Lifecycle events are fanned out on a broadcast channel after the
//! snapshot reflects them, which keeps snapshot order and event order equal.

use super::types::{CacheEntry, CacheEvent, CacheValue, ResultEvent, Snapshot};
use crate::logger::{self, LogTag};
use crate::storage::{self, PersistedTier};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

pub(crate) struct EventBus<T> {
    cache_type: String,
    tier: Arc<dyn PersistedTier>,
    writer: Mutex<()>,
    snapshot_tx: watch::Sender<Snapshot<T>>,
    events_tx: broadcast::Sender<CacheEvent<T>>,
}

impl<T: CacheValue> EventBus<T> {
    pub fn new(cache_type: String, tier: Arc<dyn PersistedTier>, capacity: usize) -> Self {
        let (snapshot_tx, _) = watch::channel(Snapshot::new());
        let (events_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            cache_type,
            tier,
            writer: Mutex::new(()),
            snapshot_tx,
            events_tx,
        }
    }

    /// Namespace a successful result is written under
    pub fn persist_path<'a>(&'a self, key: &'a str) -> [&'a str; 3] {
        ["cache", self.cache_type.as_str(), key]
    }

    /// Persist (for `result`), apply to the snapshot and fan out.
    ///
    /// `queued` only fans out: its snapshot update happens in `try_mark_queued`.
    pub fn publish(&self, event: CacheEvent<T>) {
        if let CacheEvent::Result(result) = &event {
            self.persist(result);
        }
        self.commit(event);
    }

    /// Apply and fan out an event whose result, if any, is already persisted.
    ///
    /// The writer lock covers the snapshot update and the broadcast only; disk
    /// writes happen outside it.
    pub fn commit(&self, event: CacheEvent<T>) {
        let _guard = self.writer.lock();

        if !matches!(event, CacheEvent::Queued { .. }) {
            self.apply(&event);
        }

        // Err only means nobody is listening right now
        let _ = self.events_tx.send(event);
    }

    /// Load a result read back from the persisted tier into memory.
    ///
    /// Unlike `publish`, an in-flight request stays the key's last request
    /// event, so a fetch already queued keeps coalescing later loads. The
    /// result is announced only when nothing is in flight.
    pub fn restore_result(&self, result: ResultEvent<T>) {
        let _guard = self.writer.lock();

        let mut announce = None;
        self.snapshot_tx.send_modify(|snapshot| {
            let entry = snapshot.entry(result.key.clone()).or_default();
            entry.last_result_event = Some(result.clone());
            entry.last_error_event = None;

            if !entry.is_in_flight() {
                let event = CacheEvent::Result(result.clone());
                entry.last_request_event = Some(event.clone());
                announce = Some(event);
            }
        });

        logger::verbose(
            LogTag::Storage,
            &format!("{} '{}' restored (in flight: {})", self.cache_type, result.key, announce.is_none()),
        );

        if let Some(event) = announce {
            let _ = self.events_tx.send(event);
        }
    }

    /// Coalescing guard: record and announce a `queued` event unless a fetch
    /// is already queued, rate limited or loading for `key`.
    pub fn try_mark_queued(&self, key: &str) -> Option<CacheEvent<T>> {
        let _guard = self.writer.lock();

        let mut queued = None;
        self.snapshot_tx.send_if_modified(|snapshot| {
            let entry = snapshot.entry(key.to_string()).or_default();
            if entry.is_in_flight() {
                return false;
            }

            let event = CacheEvent::queued(key);
            entry.last_request_event = Some(event.clone());
            queued = Some(event);
            true
        });

        if let Some(event) = &queued {
            let _ = self.events_tx.send(event.clone());
        }
        queued
    }

    fn apply(&self, event: &CacheEvent<T>) {
        self.snapshot_tx.send_modify(|snapshot| {
            let entry = snapshot.entry(event.key().to_string()).or_default();

            match event {
                CacheEvent::Error(error) => {
                    entry.last_error_event = Some(error.clone());
                }
                CacheEvent::Result(result) => {
                    entry.last_result_event = Some(result.clone());
                    entry.last_error_event = None;
                }
                _ => {}
            }

            entry.last_request_event = Some(event.clone());
        });

        logger::verbose(
            LogTag::Cache,
            &format!("{} '{}' -> {}", self.cache_type, event.key(), event.kind()),
        );
    }

    /// Write a result to the persisted tier; failures are logged, not returned
    pub fn persist(&self, result: &ResultEvent<T>) {
        let event = CacheEvent::Result(result.clone());
        let path = self.persist_path(&result.key);

        if let Err(e) = storage::write_typed(self.tier.as_ref(), &path, &event) {
            logger::warning(
                LogTag::Storage,
                &format!("Failed to persist {}: {}", path.join("/"), e),
            );
        }
    }

    pub fn peek(&self, key: &str) -> Option<CacheEntry<T>> {
        self.snapshot_tx.borrow().get(key).cloned()
    }

    pub fn last_result(&self, key: &str) -> Option<ResultEvent<T>> {
        self.snapshot_tx
            .borrow()
            .get(key)
            .and_then(|entry| entry.last_result_event.clone())
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Snapshot<T>> {
        self.snapshot_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CacheEvent<T>> {
        self.events_tx.subscribe()
    }
}

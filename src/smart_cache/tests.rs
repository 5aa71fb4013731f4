use super::*;
use crate::storage::{JsonDirStore, MemoryTier};
use serde_json::json;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tempfile::TempDir;

const DELAY_MS: u64 = 5;

fn options() -> CacheOptions {
    CacheOptions::default()
        .with_rate_limit(RateLimitPolicy::fixed(Duration::from_millis(DELAY_MS)))
        .with_validity(ValidityPolicy::with_force_valid(false))
}

/// Returns `value-<key>` and counts its calls
fn counting_fetcher(calls: Arc<AtomicUsize>) -> impl Fetcher<String> {
    move |key: String| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(Some(format!("value-{}", key)))
        }
    }
}

fn failing_fetcher(calls: Arc<AtomicUsize>) -> impl Fetcher<String> {
    move |_key: String| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<Option<String>, _>(anyhow::anyhow!("upstream returned 503"))
        }
    }
}

fn memory_cache(calls: &Arc<AtomicUsize>) -> (SmartCache<String>, Arc<MemoryTier>) {
    let tier = Arc::new(MemoryTier::new());
    let cache = SmartCache::with_options(tier.clone(), "prices", counting_fetcher(calls.clone()), options())
        .unwrap();
    (cache, tier)
}

fn aged_result(key: &str, value: &str, age_ms: i64) -> CacheEvent<String> {
    CacheEvent::Result(ResultEvent {
        key: key.to_string(),
        timestamp_ms: now_ms() - age_ms,
        result: Some(value.to_string()),
    })
}

fn kinds(events: &[Result<CacheEvent<String>, CacheError>]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| match e {
            Ok(event) => event.kind().as_str(),
            Err(_) => "err",
        })
        .collect()
}

async fn collect(stream: EventStream<String>) -> Vec<Result<CacheEvent<String>, CacheError>> {
    tokio::time::timeout(Duration::from_secs(5), stream.collect())
        .await
        .expect("stream did not finish")
}

#[tokio::test]
async fn test_miss_emits_full_lifecycle() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (cache, tier) = memory_cache(&calls);

    let events = collect(cache.load("BTC").unwrap()).await;
    assert_eq!(kinds(&events), vec!["queued", "rate-limit", "loading", "result"]);

    match events.last() {
        Some(Ok(CacheEvent::Result(result))) => assert_eq!(result.result.as_deref(), Some("value-BTC")),
        other => panic!("unexpected terminal event: {:?}", other),
    }
    match &events[1] {
        Ok(CacheEvent::RateLimit { limit_expires_ms, .. }) => assert_eq!(*limit_expires_ms, DELAY_MS),
        other => panic!("expected rate-limit, got {:?}", other),
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(tier.exists(&["cache", "prices", "BTC"]));
    assert!(!cache.peek("BTC").unwrap().is_in_flight());
}

#[tokio::test]
async fn test_concurrent_loads_share_one_fetch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (cache, _tier) = memory_cache(&calls);

    let first = cache.load("ETH").unwrap();
    let second = cache.load("ETH").unwrap();
    assert!(!cache.fire_load("ETH").unwrap());

    let (first, second) = tokio::join!(collect(first), collect(second));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(kinds(&first).first(), Some(&"queued"));
    assert_eq!(kinds(&first).last(), Some(&"result"));
    // The joiner subscribed after the queued event was announced
    assert_eq!(kinds(&second), vec!["rate-limit", "loading", "result"]);
    assert_eq!(first.last().unwrap(), second.last().unwrap());
}

#[tokio::test]
async fn test_fresh_value_served_without_fetch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (cache, _tier) = memory_cache(&calls);
    cache.publish(aged_result("SOL", "150", 1_000));

    let events = collect(cache.load(LoadConfig::new("SOL").max_age_ms(60_000)).unwrap()).await;
    assert_eq!(kinds(&events), vec!["result"]);

    tokio::time::sleep(Duration::from_millis(DELAY_MS * 4)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!cache.peek("SOL").unwrap().is_in_flight());
}

#[tokio::test]
async fn test_stale_value_served_and_refreshed_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (cache, _tier) = memory_cache(&calls);
    cache.publish(aged_result("SOL", "old", 70_000));

    let config = LoadConfig::new("SOL").max_age_ms(60_000).max_stale_ms(30_000);
    let events = collect(cache.load(config.clone()).unwrap()).await;
    let second = collect(cache.load(config).unwrap()).await;

    for served in [&events, &second] {
        match served.as_slice() {
            [Ok(CacheEvent::Result(result))] => assert_eq!(result.result.as_deref(), Some("old")),
            other => panic!("expected the stale value, got {:?}", other),
        }
    }

    tokio::time::sleep(Duration::from_millis(DELAY_MS * 10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.peek("SOL").unwrap().value().map(String::as_str), Some("value-SOL"));
}

#[tokio::test]
async fn test_value_past_horizon_goes_through_fetch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (cache, _tier) = memory_cache(&calls);
    cache.publish(aged_result("ADA", "ancient", 95_000));

    let config = LoadConfig::new("ADA").max_age_ms(60_000).max_stale_ms(30_000);
    let events = collect(cache.load(config).unwrap()).await;

    assert_eq!(kinds(&events), vec!["queued", "rate-limit", "loading", "result"]);
    match events.last() {
        Some(Ok(CacheEvent::Result(result))) => assert_eq!(result.result.as_deref(), Some("value-ADA")),
        other => panic!("expected a fetched result, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_load_joins_fetch_waiting_on_rate_limit() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (cache, _tier) = memory_cache(&calls);
    let mut observed = cache.events_for("ETH");

    let first = cache.load("ETH").unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = observed.next().await {
            if event.kind() == EventKind::RateLimit {
                return;
            }
        }
        panic!("event stream ended before rate-limit");
    })
    .await
    .unwrap();

    // The worker is now sleeping out the delay for ETH
    assert!(matches!(
        cache.peek("ETH").unwrap().last_request_event,
        Some(CacheEvent::RateLimit { .. })
    ));
    let second = cache.load("ETH").unwrap();
    assert!(!cache.fire_load("ETH").unwrap());

    let (first, second) = tokio::join!(collect(first), collect(second));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(kinds(&second), vec!["loading", "result"]);
    assert_eq!(first.last().unwrap(), second.last().unwrap());
}

#[tokio::test]
async fn test_fetches_are_serialized_across_keys() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (cache, _tier) = memory_cache(&calls);
    let all = cache.events();

    let (a, b) = tokio::join!(cache.load_value("A"), cache.load_value("B"));
    assert_eq!(a.unwrap().as_deref(), Some("value-A"));
    assert_eq!(b.unwrap().as_deref(), Some("value-B"));

    let seen: Vec<(String, &'static str)> = all
        .take(8)
        .map(|e| (e.key().to_string(), e.kind().as_str()))
        .collect()
        .await;

    let position = |key: &str, kind: &str| {
        seen.iter()
            .position(|(k, t)| k == key && *t == kind)
            .unwrap_or_else(|| panic!("missing {} {} in {:?}", key, kind, seen))
    };

    assert!(position("A", "result") < position("B", "rate-limit"));
    assert!(position("A", "queued") < position("A", "rate-limit"));
}

#[tokio::test]
async fn test_force_valid_serves_any_age() {
    let calls = Arc::new(AtomicUsize::new(0));
    let tier = Arc::new(MemoryTier::new());
    let cache = SmartCache::with_options(
        tier,
        "prices",
        counting_fetcher(calls.clone()),
        options().with_validity(ValidityPolicy::with_force_valid(true)),
    )
    .unwrap();
    cache.publish(aged_result("DOT", "frozen", 10_000_000));

    let value = cache.load_value(LoadConfig::new("DOT").max_age_ms(1).max_stale_ms(0)).await;
    assert_eq!(value.unwrap().as_deref(), Some("frozen"));

    tokio::time::sleep(Duration::from_millis(DELAY_MS * 4)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_json_store_round_trip_across_instances() {
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let store = Arc::new(JsonDirStore::new(dir.path()));
        let cache: SmartCache<String> =
            SmartCache::with_options(store, "prices", counting_fetcher(calls.clone()), options()).unwrap();
        assert_eq!(cache.load_value("BTC").await.unwrap().as_deref(), Some("value-BTC"));
    }

    let store = Arc::new(JsonDirStore::new(dir.path()));
    assert!(store.file_path(&["cache", "prices", "BTC"]).unwrap().is_file());

    let failures = Arc::new(AtomicUsize::new(0));
    let cache: SmartCache<String> =
        SmartCache::with_options(store, "prices", failing_fetcher(failures.clone()), options()).unwrap();

    let events = collect(cache.load("BTC").unwrap()).await;
    assert_eq!(kinds(&events), vec!["result"]);
    assert_eq!(cache.peek("BTC").unwrap().value().map(String::as_str), Some("value-BTC"));
    assert_eq!(failures.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_legacy_untyped_path_is_read() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (cache, tier) = memory_cache(&calls);
    tier.write(
        &["cache", "LINK"],
        &json!({"type": "result", "key": "LINK", "timestampMs": now_ms(), "result": "legacy"}),
    )
    .unwrap();

    assert_eq!(cache.load_value("LINK").await.unwrap().as_deref(), Some("legacy"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rehydrate_does_not_reset_queued_fetch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (cache, tier) = memory_cache(&calls);
    tier.write(
        &["cache", "prices", "BTC"],
        &json!({"type": "result", "key": "BTC", "timestampMs": now_ms() - 70_000, "result": "old"}),
    )
    .unwrap();

    assert!(cache.fire_load("BTC").unwrap());
    let served = cache
        .load(LoadConfig::new("BTC").max_age_ms(60_000).max_stale_ms(30_000))
        .unwrap();

    // The stale hit joined the queued fetch instead of queueing a second one
    let entry = cache.peek("BTC").unwrap();
    assert!(entry.is_in_flight());
    assert_eq!(entry.value().map(String::as_str), Some("old"));
    assert_eq!(cache.stats().queue_pending, 1);

    let served = collect(served).await;
    match served.as_slice() {
        [Ok(CacheEvent::Result(result))] => assert_eq!(result.result.as_deref(), Some("old")),
        other => panic!("expected the persisted value, got {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(DELAY_MS * 10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().fetches_started, 1);
    assert_eq!(cache.peek("BTC").unwrap().value().map(String::as_str), Some("value-BTC"));
}

#[tokio::test]
async fn test_persisted_tier_checked_once_per_key() {
    let calls = Arc::new(AtomicUsize::new(0));
    let tier = Arc::new(MemoryTier::new());
    let cache: SmartCache<String> =
        SmartCache::with_options(tier.clone(), "prices", failing_fetcher(calls.clone()), options()).unwrap();

    assert!(cache.load_value("XRP").await.is_err());

    tier.write(
        &["cache", "prices", "XRP"],
        &json!({"type": "result", "key": "XRP", "timestampMs": now_ms(), "result": "late"}),
    )
    .unwrap();

    assert!(cache.load_value("XRP").await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_fetch_error_then_recovery() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let fetcher = move |key: String| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(anyhow::anyhow!("timeout fetching {}", key));
            }
            Ok::<_, anyhow::Error>(Some("recovered".to_string()))
        }
    };
    let cache: SmartCache<String> =
        SmartCache::with_options(Arc::new(MemoryTier::new()), "prices", fetcher, options()).unwrap();

    let events = collect(cache.load("AVAX").unwrap()).await;
    assert_eq!(kinds(&events), vec!["queued", "rate-limit", "loading", "err"]);
    match events.last() {
        Some(Err(CacheError::Fetch { key, message })) => {
            assert_eq!(key, "AVAX");
            assert!(message.contains("timeout fetching AVAX"));
        }
        other => panic!("expected fetch error, got {:?}", other),
    }

    let entry = cache.peek("AVAX").unwrap();
    assert!(entry.last_error_event.is_some());
    assert!(entry.last_result_event.is_none());
    assert!(!entry.is_in_flight());

    assert_eq!(cache.load_value("AVAX").await.unwrap().as_deref(), Some("recovered"));
    assert!(cache.peek("AVAX").unwrap().last_error_event.is_none());
}

#[tokio::test]
async fn test_panicking_fetcher_becomes_error_event() {
    let fetcher = |key: String| async move {
        if key == "boom" {
            panic!("fetcher exploded");
        }
        Ok::<_, anyhow::Error>(Some(key))
    };
    let cache: SmartCache<String> =
        SmartCache::with_options(Arc::new(MemoryTier::new()), "prices", fetcher, options()).unwrap();

    assert!(matches!(cache.load_value("boom").await, Err(CacheError::Fetch { .. })));
    // The worker survives and keeps serving other keys
    assert_eq!(cache.load_value("ok").await.unwrap().as_deref(), Some("ok"));
    assert_eq!(cache.stats().fetches_failed, 1);
}

#[tokio::test]
async fn test_no_data_result_is_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let fetcher = move |_key: String| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<Option<String>, anyhow::Error>(None)
        }
    };
    let cache: SmartCache<String> =
        SmartCache::with_options(Arc::new(MemoryTier::new()), "prices", fetcher, options()).unwrap();

    assert_eq!(cache.load_value("GHOST").await.unwrap(), None);
    assert_eq!(cache.load_value("GHOST").await.unwrap(), None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.peek("GHOST").unwrap().last_result_event.is_some());
}

#[tokio::test]
async fn test_missing_key_is_rejected_before_queueing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (cache, _tier) = memory_cache(&calls);

    assert!(matches!(cache.load(""), Err(CacheError::MissingKey)));
    assert_eq!(cache.fire_load(LoadConfig::new("")), Err(CacheError::MissingKey));
    assert!(cache.snapshot().is_empty());
    assert_eq!(cache.stats(), CacheStats::default());
}

#[tokio::test]
async fn test_from_cache_follows_entry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (cache, _tier) = memory_cache(&calls);

    let mut entries = cache.from_cache("BNB");
    assert_eq!(entries.next().await, Some(None));

    assert!(cache.fire_load("BNB").unwrap());
    let with_value = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(entry) = entries.next().await {
            if let Some(value) = entry.as_ref().and_then(|e| e.value()) {
                return value.clone();
            }
        }
        panic!("snapshot stream ended");
    })
    .await
    .unwrap();

    assert_eq!(with_value, "value-BNB");
}

#[tokio::test]
async fn test_events_for_filters_by_key() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (cache, _tier) = memory_cache(&calls);
    let only_b = cache.events_for("B");

    cache.load_value("A").await.unwrap();
    cache.load_value("B").await.unwrap();

    let kinds: Vec<_> = only_b.take(4).map(|e| (e.key().to_string(), e.kind())).collect().await;
    assert!(kinds.iter().all(|(key, _)| key == "B"));
    assert_eq!(kinds.last().map(|(_, kind)| *kind), Some(EventKind::Result));
}

#[tokio::test]
async fn test_stats_counts() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (cache, _tier) = memory_cache(&calls);

    cache.load_value("A").await.unwrap();
    cache.publish(CacheEvent::error("B", "bad"));
    assert!(cache.fire_load("C").unwrap());

    let stats = cache.stats();
    assert_eq!(stats.entries, 3);
    assert_eq!(stats.with_result, 1);
    assert_eq!(stats.errored, 1);
    assert_eq!(stats.in_flight, 1);
    assert_eq!(stats.queue_pending, 1);
    assert_eq!(stats.fetches_started, 1);
}

#[test]
fn test_construction_requires_runtime() {
    let calls = Arc::new(AtomicUsize::new(0));
    let result: CacheResult<SmartCache<String>> =
        SmartCache::new(Arc::new(MemoryTier::new()), "prices", counting_fetcher(calls));
    assert!(matches!(result, Err(CacheError::Config(_))));
}

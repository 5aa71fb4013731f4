//! Caller-supplied data source for the work queue
use async_trait::async_trait;
use std::future::Future;

/// Fetches the current value for one key.
///
/// `Ok(None)` is a successful "no data" answer and is cached like any other
/// result; `Err` becomes an `error` event for the key.
#[async_trait]
pub trait Fetcher<T>: Send + Sync
where
    T: Send + 'static,
{
    async fn fetch(&self, key: &str) -> anyhow::Result<Option<T>>;
}

/// Async closures taking the key by value are fetchers
#[async_trait]
impl<T, F, Fut> Fetcher<T> for F
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<T>>> + Send,
{
    async fn fetch(&self, key: &str) -> anyhow::Result<Option<T>> {
        (self)(key.to_string()).await
    }
}

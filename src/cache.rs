//! Generic request/response cache keyed by [`RequestKey`].
//!
//! Guarantees the consumers rely on:
//! - at most one in-flight fetch per key; concurrent subscribers coalesce
//!   onto the same fetch and observe the same result,
//! - last invalidation wins: a fetch superseded by a later `invalidate`
//!   has its completion discarded, even if it finishes afterwards,
//! - an entry survives as long as any subscription holds it and is removed
//!   when the last one drops.
//!
//! The shared state is the entry map behind a `tokio::sync::Mutex`; results
//! fan out to subscribers over a `watch` channel per entry.

use crate::{
    config::FetchPolicy,
    constants::{RETRY_BACKOFF_BASE_MS, RETRY_BACKOFF_MAX_MS},
    error::{BalanceError, Result},
    key::RequestKey,
};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Type-erased fetch closure stored per entry.
pub type FetchFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// Point-in-time view of one cache entry.
///
/// A `Loading` snapshot retains the previous data (stale-while-revalidate)
/// and an `Error` result does not erase a previously successful value;
/// callers choose between stale success and fresh error.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub status: EntryStatus,
    pub data: Option<T>,
    pub error: Option<Arc<BalanceError>>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl<T> Snapshot<T> {
    fn idle() -> Self {
        Self {
            status: EntryStatus::Idle,
            data: None,
            error: None,
            last_updated: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.status, EntryStatus::Idle | EntryStatus::Loading)
    }
}

struct Entry<T> {
    tx: watch::Sender<Snapshot<T>>,
    fetch: FetchFn<T>,
    /// Bumped on every invalidation; a completing fetch publishes only if
    /// its captured generation still matches.
    generation: u64,
    in_flight: bool,
    subscribers: usize,
    retry_count: u32,
}

pub struct RequestCache<T> {
    entries: Arc<Mutex<HashMap<RequestKey, Entry<T>>>>,
}

impl<T> Clone for RequestCache<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for RequestCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register interest in `key`. Creates the entry on first use and
    /// starts a fetch unless one is already in flight or a success landed
    /// inside the policy's dedupe window.
    pub async fn subscribe(
        &self,
        key: RequestKey,
        fetch: FetchFn<T>,
        policy: &FetchPolicy,
    ) -> CacheSubscription<T> {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.clone()).or_insert_with(|| {
            let (tx, _) = watch::channel(Snapshot::idle());
            Entry {
                tx,
                fetch: Arc::clone(&fetch),
                generation: 0,
                in_flight: false,
                subscribers: 0,
                retry_count: policy.retry_count,
            }
        });
        entry.subscribers += 1;
        entry.fetch = fetch;
        entry.retry_count = policy.retry_count;
        let rx = entry.tx.subscribe();

        if !entry.in_flight && !Self::fresh_within(entry, policy.dedupe_interval) {
            let generation = Self::mark_loading(entry);
            let fetch = Arc::clone(&entry.fetch);
            let retry_count = entry.retry_count;
            drop(entries);
            self.spawn_fetch(key.clone(), generation, fetch, retry_count);
        }

        CacheSubscription {
            key,
            cache: self.clone(),
            rx,
        }
    }

    /// Force `key` back to loading and refetch. Any in-flight fetch for the
    /// key is superseded; ordering is by invalidation time, not completion
    /// time. A key with no live entry is a no-op.
    pub async fn invalidate(&self, key: &RequestKey) {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        let generation = Self::mark_loading(entry);
        let fetch = Arc::clone(&entry.fetch);
        let retry_count = entry.retry_count;
        drop(entries);
        self.spawn_fetch(key.clone(), generation, fetch, retry_count);
    }

    /// Current state of `key`, if any subscription keeps it alive.
    pub async fn snapshot(&self, key: &RequestKey) -> Option<Snapshot<T>> {
        let entries = self.entries.lock().await;
        entries.get(key).map(|entry| entry.tx.borrow().clone())
    }

    fn fresh_within(entry: &Entry<T>, window: Duration) -> bool {
        let snapshot = entry.tx.borrow();
        if snapshot.status != EntryStatus::Success {
            return false;
        }
        match snapshot.last_updated {
            Some(updated) => {
                let age = Utc::now().signed_duration_since(updated);
                age.to_std().map(|age| age < window).unwrap_or(true)
            }
            None => false,
        }
    }

    /// Bump the generation, publish `Loading` (keeping stale data), mark a
    /// fetch in flight. Returns the generation the fetch must publish under.
    fn mark_loading(entry: &mut Entry<T>) -> u64 {
        entry.generation += 1;
        entry.in_flight = true;
        entry.tx.send_modify(|snapshot| {
            snapshot.status = EntryStatus::Loading;
            snapshot.error = None;
        });
        entry.generation
    }

    fn spawn_fetch(&self, key: RequestKey, generation: u64, fetch: FetchFn<T>, retry_count: u32) {
        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            let mut attempt = 0;
            let outcome = loop {
                match fetch().await {
                    Ok(value) => break Ok(value),
                    Err(err) if attempt < retry_count => {
                        attempt += 1;
                        tracing::warn!(
                            key = %key,
                            attempt,
                            "Balance fetch failed, retrying: {}",
                            err
                        );
                        tokio::time::sleep(retry_backoff(attempt)).await;
                    }
                    Err(err) => break Err(err),
                }
            };

            let mut map = entries.lock().await;
            let Some(entry) = map.get_mut(&key) else {
                // last subscriber dropped while we were fetching
                return;
            };
            if entry.generation != generation {
                tracing::debug!(key = %key, "Discarding superseded fetch result");
                return;
            }
            entry.in_flight = false;
            entry.tx.send_modify(|snapshot| {
                snapshot.last_updated = Some(Utc::now());
                match outcome {
                    Ok(value) => {
                        snapshot.status = EntryStatus::Success;
                        snapshot.data = Some(value);
                        snapshot.error = None;
                    }
                    Err(err) => {
                        snapshot.status = EntryStatus::Error;
                        snapshot.error = Some(Arc::new(err));
                    }
                }
            });
        });
    }
}

impl<T> RequestCache<T>
where
    T: Send + Sync + 'static,
{
    async fn release(&self, key: RequestKey) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&key) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                entries.remove(&key);
            }
        }
    }
}

fn retry_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(4);
    let millis = RETRY_BACKOFF_BASE_MS << exponent;
    Duration::from_millis(millis.min(RETRY_BACKOFF_MAX_MS))
}

/// Handle returned by [`RequestCache::subscribe`]. Dropping it releases the
/// entry reference; the entry disappears with its last handle.
pub struct CacheSubscription<T: Send + Sync + 'static> {
    key: RequestKey,
    cache: RequestCache<T>,
    rx: watch::Receiver<Snapshot<T>>,
}

impl<T> CacheSubscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    pub fn current(&self) -> Snapshot<T> {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot change.
    pub async fn changed(&mut self) -> Result<()> {
        self.rx
            .changed()
            .await
            .map_err(|_| BalanceError::SubscriptionClosed)
    }

    /// Wait until the entry settles into a non-loading state.
    pub async fn settled(&mut self) -> Result<Snapshot<T>> {
        loop {
            let snapshot = self.current();
            if !snapshot.is_loading() {
                return Ok(snapshot);
            }
            self.changed().await?;
        }
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate(&self.key).await;
    }
}

impl<T: Send + Sync + 'static> Drop for CacheSubscription<T> {
    fn drop(&mut self) {
        let cache = self.cache.clone();
        let key = self.key.clone();
        // release is async; outside a runtime the process is tearing down
        // and the map goes with it
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                cache.release(key).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_key(suffix: &str) -> RequestKey {
        RequestKey::build("0x1", "SN_MAIN", suffix, None).unwrap()
    }

    fn counting_fetch(
        calls: Arc<AtomicUsize>,
        behavior: impl Fn(usize) -> BoxFuture<'static, Result<String>> + Send + Sync + 'static,
    ) -> FetchFn<String> {
        Arc::new(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            behavior(n)
        })
    }

    #[tokio::test]
    async fn concurrent_subscribers_share_one_fetch() {
        let cache: RequestCache<String> = RequestCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting_fetch(Arc::clone(&calls), |_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok("100".to_string())
            })
        });

        let key = test_key("0xaa");
        let policy = FetchPolicy::default();
        let mut first = cache.subscribe(key.clone(), Arc::clone(&fetch), &policy).await;
        let mut second = cache.subscribe(key.clone(), fetch, &policy).await;

        let a = first.settled().await.unwrap();
        let b = second.settled().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.data.as_deref(), Some("100"));
        assert_eq!(b.data.as_deref(), Some("100"));
    }

    #[tokio::test]
    async fn fresh_success_suppresses_refetch_inside_dedupe_window() {
        let cache: RequestCache<String> = RequestCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting_fetch(Arc::clone(&calls), |_| {
            Box::pin(async { Ok("7".to_string()) })
        });

        let key = test_key("0xab");
        let policy = FetchPolicy {
            dedupe_interval: Duration::from_secs(60),
            ..FetchPolicy::default()
        };
        let mut first = cache.subscribe(key.clone(), Arc::clone(&fetch), &policy).await;
        first.settled().await.unwrap();

        let second = cache.subscribe(key.clone(), fetch, &policy).await;
        assert_eq!(second.current().data.as_deref(), Some("7"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_supersedes_in_flight_fetch() {
        let cache: RequestCache<String> = RequestCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        // first fetch is slow and stale; every later fetch is fast and fresh
        let fetch = counting_fetch(Arc::clone(&calls), |n| {
            Box::pin(async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    Ok("stale".to_string())
                } else {
                    Ok("fresh".to_string())
                }
            })
        });

        let key = test_key("0xac");
        let mut sub = cache
            .subscribe(key.clone(), fetch, &FetchPolicy::default())
            .await;
        cache.invalidate(&key).await;

        let settled = sub.settled().await.unwrap();
        assert_eq!(settled.data.as_deref(), Some("fresh"));

        // even after the slow fetch completes, its result stays discarded
        tokio::time::sleep(Duration::from_millis(200)).await;
        let snapshot = cache.snapshot(&key).await.unwrap();
        assert_eq!(snapshot.data.as_deref(), Some("fresh"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_success_value() {
        let cache: RequestCache<String> = RequestCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting_fetch(Arc::clone(&calls), |n| {
            Box::pin(async move {
                if n == 0 {
                    Ok("42".to_string())
                } else {
                    Err(BalanceError::Transport("down".to_string()))
                }
            })
        });

        let key = test_key("0xad");
        let mut sub = cache
            .subscribe(key.clone(), fetch, &FetchPolicy::default())
            .await;
        sub.settled().await.unwrap();

        cache.invalidate(&key).await;
        let settled = sub.settled().await.unwrap();

        assert_eq!(settled.status, EntryStatus::Error);
        assert!(settled.error.is_some());
        assert_eq!(settled.data.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn retries_are_bounded_by_policy() {
        let cache: RequestCache<String> = RequestCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = counting_fetch(Arc::clone(&calls), |n| {
            Box::pin(async move {
                if n == 0 {
                    Err(BalanceError::Transport("flaky".to_string()))
                } else {
                    Ok("9".to_string())
                }
            })
        });

        let key = test_key("0xae");
        let policy = FetchPolicy {
            retry_count: 1,
            ..FetchPolicy::default()
        };
        let mut sub = cache.subscribe(key.clone(), fetch, &policy).await;
        let settled = sub.settled().await.unwrap();

        assert_eq!(settled.status, EntryStatus::Success);
        assert_eq!(settled.data.as_deref(), Some("9"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn entry_is_removed_with_last_subscriber() {
        let cache: RequestCache<String> = RequestCache::new();
        let fetch: FetchFn<String> = Arc::new(|| Box::pin(async { Ok("1".to_string()) }));

        let key = test_key("0xaf");
        let mut sub = cache
            .subscribe(key.clone(), fetch, &FetchPolicy::default())
            .await;
        sub.settled().await.unwrap();
        drop(sub);

        // drop releases via a spawned task
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.snapshot(&key).await.is_none());
    }

    #[test]
    fn retry_backoff_is_capped() {
        assert_eq!(retry_backoff(1), Duration::from_millis(RETRY_BACKOFF_BASE_MS));
        assert!(retry_backoff(10) <= Duration::from_millis(RETRY_BACKOFF_MAX_MS));
        assert!(retry_backoff(2) > retry_backoff(1));
    }
}

//! Pending-transaction-driven cache invalidation.
//!
//! A decrease in an account's pending-transaction count means a transaction
//! left the pending set (confirmed or dropped) and the account's balances
//! may have changed; that is the only balance-change signal available here.
//! An increase carries no such information, so it only moves the baseline.

use crate::{cache::RequestCache, error::Result, key::RequestKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Source of an account's pending-transaction count.
#[async_trait]
pub trait PendingTransactionSource: Send + Sync {
    async fn pending_count(&self, account_address: &str) -> Result<usize>;
}

/// Two-state observer: `Uninitialized` until the first count arrives, then
/// `Observing(last)`. Only the immediately preceding count is retained.
#[derive(Debug, Default)]
pub struct PendingCountTracker {
    last: Option<usize>,
}

impl PendingCountTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `count` and report whether it decreased since the previous
    /// observation. The first observation only sets the baseline.
    pub fn observe(&mut self, count: usize) -> bool {
        let decreased = matches!(self.last, Some(previous) if count < previous);
        self.last = Some(count);
        decreased
    }
}

struct AccountWatch {
    tracker: PendingCountTracker,
    /// Keys with a live-subscription count each. Two subscriptions to the
    /// same tuple share one key; the key stays registered until both drop.
    keys: HashMap<RequestKey, usize>,
}

/// Polls the pending-transaction source per registered account and
/// invalidates every balance key of an account exactly when its pending
/// count decreases. Observation failures are treated as "no signal": the
/// cycle is skipped and the baseline left untouched, since a missed
/// invalidation recovers on the next observation.
pub struct InvalidationWatcher<T> {
    cache: RequestCache<T>,
    source: Arc<dyn PendingTransactionSource>,
    registry: Arc<Mutex<HashMap<String, AccountWatch>>>,
    poll_interval: Duration,
}

impl<T> InvalidationWatcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        cache: RequestCache<T>,
        source: Arc<dyn PendingTransactionSource>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            cache,
            source,
            registry: Arc::new(Mutex::new(HashMap::new())),
            poll_interval,
        }
    }

    /// Associate a balance key with an account, counting one registration
    /// per live subscription. The first key for an account creates its
    /// observation record.
    pub async fn register(&self, account_address: &str, key: RequestKey) {
        let mut registry = self.registry.lock().await;
        let watch = registry
            .entry(account_address.to_string())
            .or_insert_with(|| AccountWatch {
                tracker: PendingCountTracker::new(),
                keys: HashMap::new(),
            });
        *watch.keys.entry(key).or_insert(0) += 1;
    }

    /// Release one registration of a key. The key stays watched while any
    /// other subscription still holds it; the account's observation record
    /// goes with its last key.
    pub async fn unregister(&self, account_address: &str, key: &RequestKey) {
        let mut registry = self.registry.lock().await;
        if let Some(watch) = registry.get_mut(account_address) {
            if let Some(count) = watch.keys.get_mut(key) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    watch.keys.remove(key);
                }
            }
            if watch.keys.is_empty() {
                registry.remove(account_address);
            }
        }
    }

    /// One observation pass over all registered accounts.
    pub async fn tick(&self) {
        let accounts: Vec<String> = self.registry.lock().await.keys().cloned().collect();

        for account in accounts {
            let count = match self.source.pending_count(&account).await {
                Ok(count) => count,
                Err(err) => {
                    tracing::debug!(
                        account = %account,
                        "Pending count unavailable, skipping cycle: {}",
                        err
                    );
                    continue;
                }
            };

            let keys_to_invalidate: Vec<RequestKey> = {
                let mut registry = self.registry.lock().await;
                let Some(watch) = registry.get_mut(&account) else {
                    continue;
                };
                if watch.tracker.observe(count) {
                    watch.keys.keys().cloned().collect()
                } else {
                    Vec::new()
                }
            };

            for key in keys_to_invalidate {
                tracing::debug!(account = %account, key = %key, "Pending count decreased, invalidating");
                self.cache.invalidate(&key).await;
            }
        }
    }

    /// Run the polling loop until the returned handle is dropped.
    pub fn spawn(self: Arc<Self>) -> WatcherHandle {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        });
        WatcherHandle { handle }
    }
}

/// Aborts the watcher loop on drop.
pub struct WatcherHandle {
    handle: JoinHandle<()>,
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FetchFn;
    use crate::config::FetchPolicy;
    use crate::error::BalanceError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn tracker_fires_only_on_decrease() {
        let mut tracker = PendingCountTracker::new();
        let observations = [3, 3, 5, 2, 2, 4];
        let fired: Vec<bool> = observations
            .iter()
            .map(|&count| tracker.observe(count))
            .collect();
        assert_eq!(fired, [false, false, false, true, false, false]);
    }

    #[test]
    fn tracker_first_observation_sets_baseline_silently() {
        let mut tracker = PendingCountTracker::new();
        assert!(!tracker.observe(0));
        assert!(!tracker.observe(0));
    }

    struct ScriptedSource {
        count: AtomicUsize,
        failing: AtomicBool,
    }

    #[async_trait]
    impl PendingTransactionSource for ScriptedSource {
        async fn pending_count(&self, _account: &str) -> Result<usize> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(BalanceError::Transport("source down".to_string()));
            }
            Ok(self.count.load(Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn decrease_invalidates_registered_keys() {
        let cache: RequestCache<String> = RequestCache::new();
        let fetches = Arc::new(AtomicUsize::new(0));
        let fetch: FetchFn<String> = {
            let fetches = Arc::clone(&fetches);
            Arc::new(move || {
                fetches.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok("1".to_string()) })
            })
        };

        let key = RequestKey::build("0x1", "SN_MAIN", "0xacct", None).unwrap();
        let mut sub = cache
            .subscribe(key.clone(), fetch, &FetchPolicy::default())
            .await;
        sub.settled().await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        let source = Arc::new(ScriptedSource {
            count: AtomicUsize::new(3),
            failing: AtomicBool::new(false),
        });
        let watcher =
            InvalidationWatcher::new(cache.clone(), source.clone(), Duration::from_secs(60));
        watcher.register("0xacct", key.clone()).await;

        // baseline, then no-change: neither invalidates
        watcher.tick().await;
        watcher.tick().await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // increase: baseline moves, no invalidation
        source.count.store(5, Ordering::SeqCst);
        watcher.tick().await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // decrease: every key for the account refetches
        source.count.store(2, Ordering::SeqCst);
        watcher.tick().await;
        sub.settled().await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_observation_skips_cycle_and_keeps_baseline() {
        let cache: RequestCache<String> = RequestCache::new();
        let fetches = Arc::new(AtomicUsize::new(0));
        let fetch: FetchFn<String> = {
            let fetches = Arc::clone(&fetches);
            Arc::new(move || {
                fetches.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok("1".to_string()) })
            })
        };

        let key = RequestKey::build("0x1", "SN_MAIN", "0xacct", None).unwrap();
        let mut sub = cache
            .subscribe(key.clone(), fetch, &FetchPolicy::default())
            .await;
        sub.settled().await.unwrap();

        let source = Arc::new(ScriptedSource {
            count: AtomicUsize::new(4),
            failing: AtomicBool::new(false),
        });
        let watcher =
            InvalidationWatcher::new(cache.clone(), source.clone(), Duration::from_secs(60));
        watcher.register("0xacct", key.clone()).await;
        watcher.tick().await;

        // source failure: no signal, no invalidation, baseline kept
        source.failing.store(true, Ordering::SeqCst);
        watcher.tick().await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // recovery with a decrease measured against the pre-failure baseline
        source.failing.store(false, Ordering::SeqCst);
        source.count.store(1, Ordering::SeqCst);
        watcher.tick().await;
        sub.settled().await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn key_stays_registered_while_another_subscription_holds_it() {
        let cache: RequestCache<String> = RequestCache::new();
        let fetches = Arc::new(AtomicUsize::new(0));
        let fetch: FetchFn<String> = {
            let fetches = Arc::clone(&fetches);
            Arc::new(move || {
                fetches.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok("1".to_string()) })
            })
        };

        let key = RequestKey::build("0x1", "SN_MAIN", "0xacct", None).unwrap();
        let mut sub = cache
            .subscribe(key.clone(), fetch, &FetchPolicy::default())
            .await;
        sub.settled().await.unwrap();

        let source = Arc::new(ScriptedSource {
            count: AtomicUsize::new(3),
            failing: AtomicBool::new(false),
        });
        let watcher =
            InvalidationWatcher::new(cache.clone(), source.clone(), Duration::from_secs(60));

        // two subscriptions to the same tuple share one key
        watcher.register("0xacct", key.clone()).await;
        watcher.register("0xacct", key.clone()).await;
        watcher.unregister("0xacct", &key).await;

        watcher.tick().await;
        source.count.store(1, Ordering::SeqCst);
        watcher.tick().await;
        sub.settled().await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);

        // the last registration going away retires the account record
        watcher.unregister("0xacct", &key).await;
        assert!(watcher.registry.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unregister_drops_account_record() {
        let cache: RequestCache<String> = RequestCache::new();
        let source = Arc::new(ScriptedSource {
            count: AtomicUsize::new(1),
            failing: AtomicBool::new(false),
        });
        let watcher =
            InvalidationWatcher::<String>::new(cache, source, Duration::from_secs(60));

        let key = RequestKey::build("0x1", "SN_MAIN", "0xacct", None).unwrap();
        watcher.register("0xacct", key.clone()).await;
        watcher.unregister("0xacct", &key).await;
        assert!(watcher.registry.lock().await.is_empty());
    }
}

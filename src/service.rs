//! Consumer-facing subscription surface.
//!
//! A UI surface asks for `(token, account)` once and from then on observes
//! snapshots: current value or classified error, loading flag, and a
//! `mutate` lever for manual refresh. Refetch-on-confirmation is wired in
//! here via the [`InvalidationWatcher`].

use crate::{
    cache::{CacheSubscription, FetchFn, RequestCache, Snapshot},
    config::{BalanceQuery, FetchPolicy, ProviderConfig},
    error::Result,
    fetcher::{BalanceFetcher, BalanceOutcome},
    key::RequestKey,
    provider::{BalanceProvider, JsonRpcBalanceProvider},
    watcher::{InvalidationWatcher, PendingTransactionSource, WatcherHandle},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct BalanceService {
    fetcher: BalanceFetcher,
    cache: RequestCache<BalanceOutcome>,
    watcher: Arc<InvalidationWatcher<BalanceOutcome>>,
    _watcher_handle: WatcherHandle,
}

impl BalanceService {
    pub fn new(
        provider: Arc<dyn BalanceProvider>,
        pending_source: Arc<dyn PendingTransactionSource>,
        pending_poll_interval: Duration,
    ) -> Self {
        let cache = RequestCache::new();
        let watcher = Arc::new(InvalidationWatcher::new(
            cache.clone(),
            pending_source,
            pending_poll_interval,
        ));
        let watcher_handle = Arc::clone(&watcher).spawn();
        Self {
            fetcher: BalanceFetcher::new(provider),
            cache,
            watcher,
            _watcher_handle: watcher_handle,
        }
    }

    /// Wire up the shipped JSON-RPC provider from environment-driven config.
    pub fn from_config(
        config: &ProviderConfig,
        pending_source: Arc<dyn PendingTransactionSource>,
    ) -> Result<Self> {
        let provider = Arc::new(JsonRpcBalanceProvider::from_config(config)?);
        Ok(Self::new(
            provider,
            pending_source,
            config.pending_poll_interval,
        ))
    }

    /// Subscribe to a balance. Concurrent subscriptions for the same
    /// `(token, network, account, multicall)` tuple coalesce onto one
    /// in-flight query.
    pub async fn subscribe(
        &self,
        query: BalanceQuery,
        policy: FetchPolicy,
    ) -> Result<BalanceSubscription> {
        let key = RequestKey::build(
            &query.token_address,
            &query.network_id,
            &query.account_address,
            query.multicall_address.as_deref(),
        )?;
        let account_address = query.account_address.clone();

        let fetch: FetchFn<BalanceOutcome> = {
            let fetcher = self.fetcher.clone();
            let query = Arc::new(query);
            Arc::new(move || {
                let fetcher = fetcher.clone();
                let query = Arc::clone(&query);
                Box::pin(async move { fetcher.fetch(&query).await })
            })
        };

        let inner = self.cache.subscribe(key.clone(), fetch, &policy).await;
        self.watcher.register(&account_address, key.clone()).await;

        let refresh = policy.refresh_interval.map(|period| {
            let cache = self.cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // the subscribe-time fetch covers the first period
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    cache.invalidate(&key).await;
                }
            })
        });

        Ok(BalanceSubscription {
            inner,
            watcher: Arc::clone(&self.watcher),
            account_address,
            refresh,
        })
    }
}

/// Live balance subscription. Snapshots carry the data/error/loading triple
/// the consumer renders from; `mutate` forces a refetch.
pub struct BalanceSubscription {
    inner: CacheSubscription<BalanceOutcome>,
    watcher: Arc<InvalidationWatcher<BalanceOutcome>>,
    account_address: String,
    refresh: Option<JoinHandle<()>>,
}

impl BalanceSubscription {
    pub fn key(&self) -> &RequestKey {
        self.inner.key()
    }

    pub fn current(&self) -> Snapshot<BalanceOutcome> {
        self.inner.current()
    }

    /// Wait for the next snapshot change.
    pub async fn changed(&mut self) -> Result<()> {
        self.inner.changed().await
    }

    /// Wait for the entry to settle into success or error.
    pub async fn settled(&mut self) -> Result<Snapshot<BalanceOutcome>> {
        self.inner.settled().await
    }

    /// Manual invalidation: back to loading, fresh fetch, supersedes any
    /// in-flight one.
    pub async fn mutate(&self) {
        self.inner.invalidate().await;
    }
}

impl Drop for BalanceSubscription {
    fn drop(&mut self) {
        if let Some(refresh) = self.refresh.take() {
            refresh.abort();
        }
        let watcher = Arc::clone(&self.watcher);
        let account_address = std::mem::take(&mut self.account_address);
        let key = self.inner.key().clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                watcher.unregister(&account_address, &key).await;
            });
        }
    }
}

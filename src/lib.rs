//! Token-balance retrieval for Starknet wallet UIs.
//!
//! One subscription per `(token, network, account, multicall)` tuple:
//! concurrent requests for the same tuple coalesce onto a single RPC call,
//! confirmed transactions invalidate the cached value via the
//! pending-transaction watcher, and RPC failures are classified into a
//! small set of user-presentable categories so every surface renders the
//! same message for the same failure.

pub mod address;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod error;
pub mod fetcher;
pub mod key;
pub mod provider;
pub mod service;
pub mod watcher;

// Re-export for convenience
pub use cache::{CacheSubscription, EntryStatus, RequestCache, Snapshot};
pub use classifier::{classify, ClassifiedError, ErrorKind};
pub use config::{BalanceQuery, FetchPolicy, ProviderConfig};
pub use error::{BalanceError, Result, RpcFailure};
pub use fetcher::{BalanceFetcher, BalanceOutcome};
pub use key::RequestKey;
pub use provider::{BalanceProvider, JsonRpcBalanceProvider};
pub use service::{BalanceService, BalanceSubscription};
pub use watcher::{InvalidationWatcher, PendingCountTracker, PendingTransactionSource};

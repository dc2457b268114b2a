use crate::constants::{
    DEFAULT_DEDUPE_INTERVAL_MS, DEFAULT_PENDING_POLL_INTERVAL_MS, DEFAULT_RETRY_COUNT,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// One balance request as a consumer states it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceQuery {
    pub token_address: String,
    pub network_id: String,
    pub account_address: String,
    pub multicall_address: Option<String>,
    /// When true, query failures resolve as [`ClassifiedError`] data instead
    /// of propagating, so the consumer needs no surrounding failure boundary.
    ///
    /// [`ClassifiedError`]: crate::classifier::ClassifiedError
    pub return_error: bool,
}

/// Fetch tuning forwarded per subscription. The cache forwards these values
/// without interpreting them beyond their documented effect.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// A success newer than this window suppresses the refetch a new
    /// subscriber would otherwise trigger.
    pub dedupe_interval: Duration,
    /// Additional attempts after a failed fetch, inside the same fetch task.
    pub retry_count: u32,
    /// When set, the subscription re-invalidates its key on this period.
    pub refresh_interval: Option<Duration>,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            dedupe_interval: Duration::from_millis(DEFAULT_DEDUPE_INTERVAL_MS),
            retry_count: DEFAULT_RETRY_COUNT,
            refresh_interval: None,
        }
    }
}

/// Environment-driven settings for the JSON-RPC balance provider and the
/// pending-transaction watcher.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub rpc_url: String,
    pub network_id: String,
    pub multicall_address: Option<String>,
    pub pending_poll_interval: Duration,
}

impl ProviderConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let pending_poll_ms = env::var("PENDING_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| DEFAULT_PENDING_POLL_INTERVAL_MS.to_string())
            .parse()?;

        Ok(Self {
            rpc_url: env::var("STARKNET_RPC_URL")?,
            network_id: env::var("STARKNET_CHAIN_ID").unwrap_or_else(|_| "SN_MAIN".to_string()),
            multicall_address: env::var("MULTICALL_ADDRESS")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            pending_poll_interval: Duration::from_millis(pending_poll_ms),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rpc_url.trim().is_empty() {
            anyhow::bail!("STARKNET_RPC_URL is empty");
        }
        if self.network_id.trim().is_empty() {
            anyhow::bail!("STARKNET_CHAIN_ID is empty");
        }

        if let Some(multicall) = &self.multicall_address {
            if !multicall.starts_with("0x") {
                tracing::warn!("Multicall address does not look like a hex address");
            }
        }
        if self.pending_poll_interval.is_zero() {
            tracing::warn!("Pending poll interval of zero will spin the watcher loop");
        }

        Ok(())
    }
}

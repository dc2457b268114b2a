// Shared constants for the balance cache and the RPC provider.

/// Gateway error code for a call against an undeployed contract.
pub const UNINITIALIZED_CONTRACT_CODE: &str = "StarknetErrorCode.UNINITIALIZED_CONTRACT";

/// Numeric RPC codes treated as transient infrastructure failures.
pub const RETRYABLE_RPC_CODES: [i64; 2] = [429, 502];

/// ERC-20 entry point queried for a single balance.
pub const BALANCE_ENTRY_POINT: &str = "balanceOf";

/// Entry point of the batching contract, when one is configured.
pub const MULTICALL_AGGREGATE_ENTRY_POINT: &str = "aggregate";

/// Separator for cache-key components. Never expected inside an address,
/// a network id, or a felt, which keeps the key injective.
pub const REQUEST_KEY_SEPARATOR: &str = "::";

pub const DEFAULT_DEDUPE_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_RETRY_COUNT: u32 = 0;
pub const DEFAULT_PENDING_POLL_INTERVAL_MS: u64 = 5_000;

/// Base delay between fetch retries; backed off exponentially and capped.
pub const RETRY_BACKOFF_BASE_MS: u64 = 250;
pub const RETRY_BACKOFF_MAX_MS: u64 = 4_000;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw failure payload reported by the balance-query RPC layer.
///
/// The code is kept loose on purpose: Starknet gateways report string codes
/// (`"StarknetErrorCode.UNINITIALIZED_CONTRACT"`) while HTTP-level failures
/// surface numeric ones (429, 502). The classifier decides what it means.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcFailure {
    pub code: Option<serde_json::Value>,
    pub message: Option<String>,
}

impl RpcFailure {
    pub fn new(code: Option<serde_json::Value>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }

    /// Numeric reading of the code, for retryable-status checks.
    ///
    /// A string code must parse fully as an integer to count; `"429x"` or an
    /// absent code never matches a numeric set.
    pub fn numeric_code(&self) -> Option<i64> {
        match self.code.as_ref()? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn code_text(&self) -> Option<&str> {
        self.code.as_ref()?.as_str()
    }
}

impl std::fmt::Display for RpcFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message()),
            None => write!(f, "{}", self.message()),
        }
    }
}

#[derive(Error, Debug)]
pub enum BalanceError {
    #[error("Blockchain RPC error: {0}")]
    Rpc(RpcFailure),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Subscription closed")]
    SubscriptionClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BalanceError {
    /// The `{code, message}` view the classifier works over.
    ///
    /// Transport and internal failures have no server-assigned code; they
    /// fall through to the generic branch of the decision table.
    pub fn as_rpc_failure(&self) -> RpcFailure {
        match self {
            BalanceError::Rpc(failure) => failure.clone(),
            other => RpcFailure {
                code: None,
                message: Some(other.to_string()),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, BalanceError>;

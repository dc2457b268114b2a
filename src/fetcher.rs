use crate::{
    classifier::{classify, ClassifiedError},
    config::BalanceQuery,
    error::Result,
    provider::BalanceProvider,
};
use std::sync::Arc;

/// Result of one balance fetch, as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceOutcome {
    /// The raw numeric balance string, unmodified.
    Balance(String),
    /// A classified failure returned as data, when the query opted into
    /// error transparency.
    Failed(ClassifiedError),
}

impl BalanceOutcome {
    pub fn balance(&self) -> Option<&str> {
        match self {
            BalanceOutcome::Balance(value) => Some(value),
            BalanceOutcome::Failed(_) => None,
        }
    }

    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            BalanceOutcome::Balance(_) => None,
            BalanceOutcome::Failed(error) => Some(error),
        }
    }
}

/// Translation layer between the provider and the cache: fetch a balance
/// and, per the query's preference, either propagate failures unchanged or
/// hand them to the classifier and return them as data.
#[derive(Clone)]
pub struct BalanceFetcher {
    provider: Arc<dyn BalanceProvider>,
}

impl BalanceFetcher {
    pub fn new(provider: Arc<dyn BalanceProvider>) -> Self {
        Self { provider }
    }

    pub async fn fetch(&self, query: &BalanceQuery) -> Result<BalanceOutcome> {
        let result = self
            .provider
            .get_balance(&query.token_address, &query.account_address)
            .await;

        match result {
            Ok(balance) => Ok(BalanceOutcome::Balance(balance)),
            Err(err) if query.return_error => {
                let classified = classify(
                    &err.as_rpc_failure(),
                    &query.token_address,
                    &query.network_id,
                    query.multicall_address.as_deref(),
                );
                Ok(BalanceOutcome::Failed(classified))
            }
            Err(err) => Err(err),
        }
    }
}

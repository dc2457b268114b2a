use crate::{
    address::{addresses_equal, extract_hex_address},
    constants::{RETRYABLE_RPC_CODES, UNINITIALIZED_CONTRACT_CODE},
    error::RpcFailure,
};
use serde::{Deserialize, Serialize};

/// Closed set of user-presentable failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TokenNotFound,
    NoMulticall,
    MissingContract,
    NetworkError,
    GenericError,
}

/// A raw RPC failure reduced to something a UI can show directly.
///
/// Only [`classify`] constructs these; nothing else in the crate builds one
/// ad hoc, which keeps the taxonomy closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub description: String,
}

impl ClassifiedError {
    fn new(kind: ErrorKind, message: &str, description: String) -> Self {
        Self {
            kind,
            message: message.to_string(),
            description,
        }
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.message, self.description)
    }
}

/// Map a raw RPC failure onto the closed taxonomy.
///
/// Precedence: undeployed-contract codes are resolved against the queried
/// token and the configured multicall contract first; then the retryable
/// numeric codes; everything else is generic. Generic shapes are logged so
/// new gateway error forms can be promoted into the table later.
pub fn classify(
    failure: &RpcFailure,
    token_address: &str,
    network_id: &str,
    multicall_address: Option<&str>,
) -> ClassifiedError {
    let raw_message = failure.message();

    if failure.code_text() == Some(UNINITIALIZED_CONTRACT_CODE) {
        return classify_uninitialized(raw_message, token_address, network_id, multicall_address);
    }

    if let Some(code) = failure.numeric_code() {
        if RETRYABLE_RPC_CODES.contains(&code) {
            return ClassifiedError::new(
                ErrorKind::NetworkError,
                "Network error",
                raw_message.to_string(),
            );
        }
    }

    tracing::warn!(
        code = ?failure.code,
        message = raw_message,
        "Unclassified balance query failure"
    );
    ClassifiedError::new(
        ErrorKind::GenericError,
        "Something went wrong",
        raw_message.to_string(),
    )
}

fn classify_uninitialized(
    raw_message: &str,
    token_address: &str,
    network_id: &str,
    multicall_address: Option<&str>,
) -> ClassifiedError {
    let Some(found) = extract_hex_address(raw_message) else {
        return ClassifiedError::new(
            ErrorKind::MissingContract,
            "Missing contract",
            raw_message.to_string(),
        );
    };

    if addresses_equal(found, token_address) {
        return ClassifiedError::new(
            ErrorKind::TokenNotFound,
            "Token not found",
            format!(
                "Token contract {} is not deployed on network {}",
                token_address, network_id
            ),
        );
    }

    if let Some(multicall) = multicall_address {
        if addresses_equal(found, multicall) {
            return ClassifiedError::new(
                ErrorKind::NoMulticall,
                "No multicall",
                format!("Multicall contract {} is not deployed", multicall),
            );
        }
    }

    ClassifiedError::new(
        ErrorKind::MissingContract,
        "Missing contract",
        format!("Contract {} is not deployed", found),
    )
}

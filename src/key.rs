use crate::{
    constants::REQUEST_KEY_SEPARATOR,
    error::{BalanceError, Result},
};
use serde::{Deserialize, Serialize};

/// Opaque cache key identifying one (token, network, account, multicall)
/// balance request.
///
/// Identical tuples always build the identical key; tuples differing in any
/// component build different keys. An absent multicall address is omitted
/// from the key rather than placeholdered, so its presence participates in
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn build(
        token_address: &str,
        network_id: &str,
        account_address: &str,
        multicall_address: Option<&str>,
    ) -> Result<Self> {
        let token_address = required(token_address, "token_address")?;
        let network_id = required(network_id, "network_id")?;
        let account_address = required(account_address, "account_address")?;

        let mut key = String::from("balance");
        for component in [token_address, network_id, account_address] {
            key.push_str(REQUEST_KEY_SEPARATOR);
            key.push_str(component);
        }
        if let Some(multicall) = multicall_address.map(str::trim).filter(|m| !m.is_empty()) {
            key.push_str(REQUEST_KEY_SEPARATOR);
            key.push_str(multicall);
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BalanceError::InvalidRequest(format!("{} is empty", field)));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_is_deterministic() {
        let a = RequestKey::build("0x1", "SN_MAIN", "0x2", Some("0x3")).unwrap();
        let b = RequestKey::build("0x1", "SN_MAIN", "0x2", Some("0x3")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn differing_components_differ() {
        let base = RequestKey::build("0x1", "SN_MAIN", "0x2", Some("0x3")).unwrap();
        let variants = [
            RequestKey::build("0x9", "SN_MAIN", "0x2", Some("0x3")).unwrap(),
            RequestKey::build("0x1", "SN_SEPOLIA", "0x2", Some("0x3")).unwrap(),
            RequestKey::build("0x1", "SN_MAIN", "0x9", Some("0x3")).unwrap(),
            RequestKey::build("0x1", "SN_MAIN", "0x2", Some("0x9")).unwrap(),
            RequestKey::build("0x1", "SN_MAIN", "0x2", None).unwrap(),
        ];
        for variant in variants {
            assert_ne!(base, variant);
        }
    }

    #[test]
    fn empty_components_are_rejected() {
        assert!(RequestKey::build("", "SN_MAIN", "0x2", None).is_err());
        assert!(RequestKey::build("0x1", "  ", "0x2", None).is_err());
        assert!(RequestKey::build("0x1", "SN_MAIN", "", None).is_err());
    }

    #[test]
    fn blank_multicall_is_treated_as_absent() {
        let absent = RequestKey::build("0x1", "SN_MAIN", "0x2", None).unwrap();
        let blank = RequestKey::build("0x1", "SN_MAIN", "0x2", Some("  ")).unwrap();
        assert_eq!(absent, blank);
    }
}

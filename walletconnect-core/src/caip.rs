//! CAIP-2 chain ids and CAIP-10 account ids.
//!
//! Grammar (from the CAIP documents):
//!
//! ```text
//! namespace: [-a-z0-9]{3,8}
//! reference: [-_a-zA-Z0-9]{1,32}
//! address:   [-.%a-zA-Z0-9]{1,128}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaipError {
    #[error("invalid chain id: {0}")]
    InvalidChainId(String),
    #[error("invalid account id: {0}")]
    InvalidAccountId(String),
}

fn valid_namespace(s: &str) -> bool {
    (3..=8).contains(&s.len())
        && s.bytes()
            .all(|b| b == b'-' || b.is_ascii_lowercase() || b.is_ascii_digit())
}

fn valid_reference(s: &str) -> bool {
    (1..=32).contains(&s.len())
        && s.bytes()
            .all(|b| b == b'-' || b == b'_' || b.is_ascii_alphanumeric())
}

fn valid_address(s: &str) -> bool {
    (1..=128).contains(&s.len())
        && s.bytes()
            .all(|b| matches!(b, b'-' | b'.' | b'%') || b.is_ascii_alphanumeric())
}

/// CAIP-2 blockchain id, e.g. `eip155:1`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Blockchain {
    namespace: String,
    reference: String,
}

impl Blockchain {
    pub fn new(namespace: &str, reference: &str) -> Result<Self, CaipError> {
        if !valid_namespace(namespace) || !valid_reference(reference) {
            return Err(CaipError::InvalidChainId(format!("{}:{}", namespace, reference)));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            reference: reference.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn absolute_string(&self) -> String {
        self.to_string()
    }
}

impl FromStr for Blockchain {
    type Err = CaipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(reference), None) => {
                Self::new(ns, reference).map_err(|_| CaipError::InvalidChainId(s.to_string()))
            }
            _ => Err(CaipError::InvalidChainId(s.to_string())),
        }
    }
}

impl TryFrom<String> for Blockchain {
    type Error = CaipError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Blockchain> for String {
    fn from(chain: Blockchain) -> Self {
        chain.to_string()
    }
}

impl fmt::Display for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

/// CAIP-10 account id, e.g. `eip155:1:0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Account {
    blockchain: Blockchain,
    address: String,
}

impl Account {
    pub fn new(blockchain: Blockchain, address: &str) -> Result<Self, CaipError> {
        if !valid_address(address) {
            return Err(CaipError::InvalidAccountId(format!("{}:{}", blockchain, address)));
        }
        Ok(Self {
            blockchain,
            address: address.to_string(),
        })
    }

    /// The CAIP-2 chain this account lives on.
    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn namespace(&self) -> &str {
        self.blockchain.namespace()
    }

    pub fn reference(&self) -> &str {
        self.blockchain.reference()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn absolute_string(&self) -> String {
        self.to_string()
    }
}

impl FromStr for Account {
    type Err = CaipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CaipError::InvalidAccountId(s.to_string());
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(reference), Some(address), None) => {
                let chain = Blockchain::new(ns, reference).map_err(|_| invalid())?;
                Self::new(chain, address).map_err(|_| invalid())
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Account {
    type Error = CaipError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Account> for String {
    fn from(account: Account) -> Self {
        account.to_string()
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.blockchain, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_chain() {
        let chain: Blockchain = "eip155:1".parse().unwrap();
        assert_eq!(chain.namespace(), "eip155");
        assert_eq!(chain.reference(), "1");
        assert_eq!(chain.absolute_string(), "eip155:1");
    }

    #[test]
    fn parses_account_and_derives_chain() {
        let account: Account = "eip155:1:0xab16a96D359eC26a11e2C2b3d8f8B8942d5Bfcdb"
            .parse()
            .unwrap();
        assert_eq!(account.blockchain().to_string(), "eip155:1");
        assert_eq!(account.address(), "0xab16a96D359eC26a11e2C2b3d8f8B8942d5Bfcdb");
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["", "eip155", "eip155:", ":1", "eip155:1:2", "EIP155:1", "ab:1"] {
            assert!(bad.parse::<Blockchain>().is_err(), "{bad}");
        }
        for bad in ["eip155:1", "eip155:1:", "eip155::0xabc", ":1:0xabc", "eip155:1:0x:1"] {
            assert!(bad.parse::<Account>().is_err(), "{bad}");
        }
    }

    #[test]
    fn serde_as_string() {
        let account: Account = "solana:4sGjMW1sUnHzSxGspuhpqLDx6wiyjNtZ:abc".parse().unwrap();
        let json = serde_json::to_string(&account).unwrap();
        assert_eq!(json, "\"solana:4sGjMW1sUnHzSxGspuhpqLDx6wiyjNtZ:abc\"");
        assert!(serde_json::from_str::<Account>("\"bad\"").is_err());
    }

    proptest! {
        #[test]
        fn account_roundtrip(
            ns in "[-a-z0-9]{3,8}",
            reference in "[-_a-zA-Z0-9]{1,32}",
            address in "[-.%a-zA-Z0-9]{1,128}",
        ) {
            let s = format!("{}:{}:{}", ns, reference, address);
            let account: Account = s.parse().unwrap();
            prop_assert_eq!(account.absolute_string(), s);
        }

        #[test]
        fn missing_segment_fails(ns in "[a-z]{3,8}", address in "[a-zA-Z0-9]{1,40}") {
            let missing_ref = format!("{}::{}", ns, address);
            let no_colon = format!("{}{}", ns, address);
            prop_assert!(missing_ref.parse::<Account>().is_err());
            prop_assert!(no_colon.parse::<Account>().is_err());
        }
    }
}

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// JSON-RPC id: a string or a 64-bit integer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    String(String),
}

impl RpcId {
    /// Time-based id: milliseconds since epoch followed by three random digits.
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let entropy: i64 = rand::thread_rng().gen_range(0..1000);
        Self::Number(millis * 1000 + entropy)
    }

    /// Storage key form of this id.
    pub fn as_key(&self) -> String {
        match self {
            Self::Number(n) => format!("n{}", n),
            Self::String(s) => format!("s{}", s),
        }
    }
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RpcId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for RpcId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RpcId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_serde() {
        assert_eq!(serde_json::to_string(&RpcId::Number(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&RpcId::from("x")).unwrap(), "\"x\"");
        assert_eq!(serde_json::from_str::<RpcId>("42").unwrap(), RpcId::Number(42));
        assert_eq!(
            serde_json::from_str::<RpcId>("\"42\"").unwrap(),
            RpcId::String("42".into())
        );
    }

    #[test]
    fn string_and_number_keys_differ() {
        assert_ne!(RpcId::Number(1).as_key(), RpcId::from("1").as_key());
    }

    #[test]
    fn generated_ids_are_time_ordered() {
        let a = RpcId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = RpcId::generate();
        assert!(a < b);
    }
}

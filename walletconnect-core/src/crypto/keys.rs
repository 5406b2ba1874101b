//! Key types: X25519 agreement keys and the derived symmetric key.

use std::fmt;
use std::str::FromStr;

use hkdf::Hkdf;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::KeyError;
use crate::Topic;

pub const KEY_LENGTH: usize = 32;

fn decode_32(hex_str: &str) -> Result<[u8; KEY_LENGTH], String> {
    let bytes = hex::decode(hex_str).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected {} bytes, got {}", KEY_LENGTH, b.len()))
}

/// X25519 private key. Only the key store holds these.
#[derive(Clone)]
pub struct AgreementPrivateKey(StaticSecret);

impl AgreementPrivateKey {
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn to_bytes(&self) -> [u8; KEY_LENGTH] {
        self.0.to_bytes()
    }

    pub fn public_key(&self) -> AgreementPublicKey {
        AgreementPublicKey(PublicKey::from(&self.0).to_bytes())
    }

    /// ECDH with `peer`, expanded with HKDF-SHA256 into a symmetric key.
    pub fn shared_key(&self, peer: &AgreementPublicKey) -> Result<SymmetricKey, KeyError> {
        let shared = self.0.diffie_hellman(&PublicKey::from(peer.0));
        let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut okm = [0u8; KEY_LENGTH];
        hk.expand(&[], &mut okm)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        let key = SymmetricKey::from_bytes(okm);
        okm.zeroize();
        Ok(key)
    }
}

impl fmt::Debug for AgreementPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AgreementPrivateKey")
            .field(&self.public_key())
            .finish()
    }
}

/// X25519 public key, hex encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgreementPublicKey([u8; KEY_LENGTH]);

impl AgreementPublicKey {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        decode_32(hex_str)
            .map(Self)
            .map_err(KeyError::InvalidPublicKey)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Topic on which responses addressed to this key are published.
    pub fn derive_topic(&self) -> Topic {
        Topic::from_digest(&self.0)
    }
}

impl fmt::Debug for AgreementPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgreementPublicKey({})", self.to_hex())
    }
}

impl fmt::Display for AgreementPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for AgreementPublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for AgreementPublicKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<AgreementPublicKey> for String {
    fn from(key: AgreementPublicKey) -> Self {
        key.to_hex()
    }
}

/// 32-byte ChaCha20-Poly1305 key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LENGTH]);

impl SymmetricKey {
    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        decode_32(hex_str).map(Self).map_err(KeyError::InvalidKey)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// `sha256(key)`: the topic of the channel secured by this key.
    pub fn derive_topic(&self) -> Topic {
        Topic::from_digest(&self.0)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Result of a key agreement: the derived key and our own public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgreementSecret {
    pub shared_secret: SymmetricKey,
    pub public_key: AgreementPublicKey,
}

impl AgreementSecret {
    pub fn derive_topic(&self) -> Topic {
        self.shared_secret.derive_topic()
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 * KEY_LENGTH);
        bytes.extend_from_slice(self.shared_secret.as_bytes());
        bytes.extend_from_slice(self.public_key.as_bytes());
        bytes
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 2 * KEY_LENGTH {
            return None;
        }
        let shared: [u8; KEY_LENGTH] = bytes[..KEY_LENGTH].try_into().ok()?;
        let public: [u8; KEY_LENGTH] = bytes[KEY_LENGTH..].try_into().ok()?;
        Some(Self {
            shared_secret: SymmetricKey::from_bytes(shared),
            public_key: AgreementPublicKey::from_bytes(public),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn public_key_hex_roundtrip() {
        let key = AgreementPrivateKey::generate().public_key();
        let parsed: AgreementPublicKey = key.to_hex().parse().unwrap();
        assert_eq!(parsed, key);
        assert!(AgreementPublicKey::from_hex("abcd").is_err());
        assert!(AgreementPublicKey::from_hex("zz").is_err());
    }

    #[test]
    fn symmetric_key_topic_is_sha256() {
        let key = SymmetricKey::from_bytes([0u8; 32]);
        // sha256 of 32 zero bytes
        assert_eq!(
            key.derive_topic().as_str(),
            "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925"
        );
    }

    #[test]
    fn debug_never_prints_secret() {
        let key = SymmetricKey::from_bytes([7u8; 32]);
        assert!(!format!("{:?}", key).contains("0707"));
    }

    #[test]
    fn agreement_secret_bytes_roundtrip() {
        let a = AgreementPrivateKey::generate();
        let b = AgreementPrivateKey::generate();
        let secret = AgreementSecret {
            shared_secret: a.shared_key(&b.public_key()).unwrap(),
            public_key: a.public_key(),
        };
        assert_eq!(AgreementSecret::from_bytes(&secret.to_bytes()), Some(secret));
        assert!(AgreementSecret::from_bytes(&[0u8; 10]).is_none());
    }

    proptest! {
        #[test]
        fn topic_symmetry(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            let a = AgreementPrivateKey::from_bytes(a);
            let b = AgreementPrivateKey::from_bytes(b);
            let ab = a.shared_key(&b.public_key()).unwrap().derive_topic();
            let ba = b.shared_key(&a.public_key()).unwrap().derive_topic();
            prop_assert_eq!(ab, ba);
        }
    }
}

//! Envelope codec: JSON-RPC payload <-> topic-addressed wire string.
//!
//! # Wire Format
//!
//! ```text
//! type 0: base64([0x00][12 bytes nonce][ciphertext + 16 bytes tag])
//! type 1: base64([0x01][32 bytes sender public key][12 bytes nonce][ciphertext + tag])
//! type 2: base64url([0x02][plaintext JSON])
//! ```
//!
//! Types 0 and 1 use ChaCha20-Poly1305 with a random nonce. Type 0 uses the
//! key already bound to the topic. Type 1 carries the sender's public key so
//! the receiver can derive the key on first contact. Type 2 is unencrypted.
//!
//! Decode failures are expected noise on a multiplexed relay: callers log
//! them and drop the message.

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL};
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crypto::{AgreementPublicKey, KeyError, KeyManagementService, SymmetricKey, KEY_LENGTH};
use crate::Topic;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Envelope codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed envelope encoding")]
    Encoding,
    #[error("envelope too short")]
    Truncated,
    #[error("unknown envelope type {0}")]
    UnknownType(u8),
    #[error("encryption failed")]
    Encryption,
    #[error("decryption failed")]
    Decryption,
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Envelope selection for serialization, and the decoded type on receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvelopeType {
    /// Sealed with the topic's key.
    Type0,
    /// Sealed with the topic's key, prefixed with the sender's public key.
    Type1 { sender_public_key: AgreementPublicKey },
    /// Unencrypted.
    Type2,
}

impl EnvelopeType {
    pub fn tag(&self) -> u8 {
        match self {
            Self::Type0 => 0,
            Self::Type1 { .. } => 1,
            Self::Type2 => 2,
        }
    }
}

/// Serializes payloads into envelopes using keys from the key store.
#[derive(Clone)]
pub struct Serializer {
    kms: KeyManagementService,
}

impl Serializer {
    pub fn new(kms: KeyManagementService) -> Self {
        Self { kms }
    }

    pub fn kms(&self) -> &KeyManagementService {
        &self.kms
    }

    /// Encode `payload` for `topic`.
    ///
    /// Type 0 and type 1 require a key bound to `topic`; otherwise fails with
    /// [`KeyError::KeyNotFound`].
    pub fn serialize<T: Serialize>(
        &self,
        topic: &Topic,
        payload: &T,
        envelope_type: &EnvelopeType,
    ) -> Result<String, CodecError> {
        let plaintext = serde_json::to_vec(payload)?;
        match envelope_type {
            EnvelopeType::Type0 => {
                let key = self.topic_key(topic)?;
                let sealed = seal(&key, &plaintext)?;
                let mut bytes = Vec::with_capacity(1 + sealed.len());
                bytes.push(0);
                bytes.extend_from_slice(&sealed);
                Ok(BASE64.encode(bytes))
            }
            EnvelopeType::Type1 { sender_public_key } => {
                let key = self.topic_key(topic)?;
                let sealed = seal(&key, &plaintext)?;
                let mut bytes = Vec::with_capacity(1 + KEY_LENGTH + sealed.len());
                bytes.push(1);
                bytes.extend_from_slice(sender_public_key.as_bytes());
                bytes.extend_from_slice(&sealed);
                Ok(BASE64.encode(bytes))
            }
            EnvelopeType::Type2 => {
                let mut bytes = Vec::with_capacity(1 + plaintext.len());
                bytes.push(2);
                bytes.extend_from_slice(&plaintext);
                Ok(BASE64_URL.encode(bytes))
            }
        }
    }

    /// Decode an envelope received on `topic`.
    ///
    /// For type 1, the receiving key is the public key registered for `topic`
    /// with [`KeyManagementService::set_public_key`].
    pub fn deserialize<T: DeserializeOwned>(
        &self,
        topic: &Topic,
        encoded: &str,
    ) -> Result<(T, EnvelopeType), CodecError> {
        let bytes = decode_base64(encoded)?;
        let (&type_byte, body) = bytes.split_first().ok_or(CodecError::Truncated)?;
        match type_byte {
            0 => {
                let key = self.topic_key(topic)?;
                let plaintext = open(&key, body)?;
                Ok((serde_json::from_slice(&plaintext)?, EnvelopeType::Type0))
            }
            1 => {
                if body.len() < KEY_LENGTH {
                    return Err(CodecError::Truncated);
                }
                let (sender, sealed) = body.split_at(KEY_LENGTH);
                let sender: [u8; KEY_LENGTH] =
                    sender.try_into().map_err(|_| CodecError::Truncated)?;
                let sender_public_key = AgreementPublicKey::from_bytes(sender);
                let key = self.type1_key(topic, &sender_public_key)?;
                let plaintext = open(&key, sealed)?;
                Ok((
                    serde_json::from_slice(&plaintext)?,
                    EnvelopeType::Type1 { sender_public_key },
                ))
            }
            2 => Ok((serde_json::from_slice(body)?, EnvelopeType::Type2)),
            other => Err(CodecError::UnknownType(other)),
        }
    }

    fn topic_key(&self, topic: &Topic) -> Result<SymmetricKey, CodecError> {
        self.kms
            .get_key_for_topic(topic)?
            .ok_or_else(|| KeyError::KeyNotFound(topic.to_string()).into())
    }

    fn type1_key(
        &self,
        topic: &Topic,
        sender: &AgreementPublicKey,
    ) -> Result<SymmetricKey, CodecError> {
        if let Some(own) = self.kms.get_public_key(topic)? {
            let secret = self.kms.perform_key_agreement(&own, &sender.to_hex())?;
            return Ok(secret.shared_secret);
        }
        // The sender side already holds the agreement secret for the topic.
        self.topic_key(topic)
    }
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>, CodecError> {
    BASE64
        .decode(encoded)
        .or_else(|_| BASE64_URL.decode(encoded.trim_end_matches('=')))
        .map_err(|_| CodecError::Encoding)
}

fn seal(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CodecError::Encryption)?;
    let nonce_bytes: [u8; NONCE_SIZE] = rand::random();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| CodecError::Encryption)?;
    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open(key: &SymmetricKey, sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CodecError::Truncated);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CodecError::Decryption)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CodecError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure_storage::InMemoryKeyStorage;
    use proptest::prelude::*;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn serializer() -> Serializer {
        Serializer::new(KeyManagementService::new(Arc::new(InMemoryKeyStorage::new())))
    }

    fn with_topic_key() -> (Serializer, Topic) {
        let serializer = serializer();
        let key = SymmetricKey::generate();
        let topic = key.derive_topic();
        serializer.kms().set_symmetric_key(&key, &topic).unwrap();
        (serializer, topic)
    }

    #[test]
    fn type0_roundtrip() {
        let (serializer, topic) = with_topic_key();
        let payload = json!({"jsonrpc": "2.0", "id": 1, "method": "wc_pairingPing", "params": {}});
        let encoded = serializer.serialize(&topic, &payload, &EnvelopeType::Type0).unwrap();
        let (decoded, kind): (Value, _) = serializer.deserialize(&topic, &encoded).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(kind, EnvelopeType::Type0);
    }

    #[test]
    fn type0_without_key_fails() {
        let serializer = serializer();
        let topic = Topic::generate();
        let err = serializer
            .serialize(&topic, &json!({}), &EnvelopeType::Type0)
            .unwrap_err();
        assert!(matches!(err, CodecError::Key(KeyError::KeyNotFound(_))));
    }

    #[test]
    fn wrong_key_fails_to_decode() {
        let (sender, topic) = with_topic_key();
        let encoded = sender.serialize(&topic, &json!({"a": 1}), &EnvelopeType::Type0).unwrap();

        let other = serializer();
        other
            .kms()
            .set_symmetric_key(&SymmetricKey::generate(), &topic)
            .unwrap();
        let result: Result<(Value, _), _> = other.deserialize(&topic, &encoded);
        assert!(matches!(result, Err(CodecError::Decryption)));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let (serializer, topic) = with_topic_key();
        let encoded = serializer.serialize(&topic, &json!({"a": 1}), &EnvelopeType::Type0).unwrap();
        let mut bytes = BASE64.decode(&encoded).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let result: Result<(Value, _), _> = serializer.deserialize(&topic, &BASE64.encode(bytes));
        assert!(matches!(result, Err(CodecError::Decryption)));
    }

    #[test]
    fn type1_derives_key_on_receipt() {
        // Receiver announces a public key; the sender answers on sha256(pubkey).
        let receiver = serializer();
        let receiver_pub = receiver.kms().create_x25519_key_pair().unwrap();
        let topic = receiver_pub.derive_topic();
        receiver.kms().set_public_key(&receiver_pub, &topic).unwrap();

        let sender = serializer();
        let sender_pub = sender.kms().create_x25519_key_pair().unwrap();
        let secret = sender
            .kms()
            .perform_key_agreement(&sender_pub, &receiver_pub.to_hex())
            .unwrap();
        sender.kms().set_agreement_secret(&secret, &topic).unwrap();

        let payload = json!({"jsonrpc": "2.0", "id": 9, "result": {"ok": true}});
        let encoded = sender
            .serialize(&topic, &payload, &EnvelopeType::Type1 { sender_public_key: sender_pub })
            .unwrap();
        let (decoded, kind): (Value, _) = receiver.deserialize(&topic, &encoded).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(kind, EnvelopeType::Type1 { sender_public_key: sender_pub });
    }

    #[test]
    fn type2_is_plain_base64url() {
        let serializer = serializer();
        let topic = Topic::generate();
        let payload = json!({"msg": "???>>>"});
        let encoded = serializer.serialize(&topic, &payload, &EnvelopeType::Type2).unwrap();
        assert!(!encoded.contains('+') && !encoded.contains('/'));
        let (decoded, kind): (Value, _) = serializer.deserialize(&topic, &encoded).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(kind, EnvelopeType::Type2);
    }

    #[test]
    fn garbage_is_rejected() {
        let (serializer, topic) = with_topic_key();
        let cases = ["", "!!!", &BASE64.encode([9u8, 1, 2, 3]), &BASE64.encode([0u8, 1, 2])];
        for case in cases {
            let result: Result<(Value, _), _> = serializer.deserialize(&topic, case);
            assert!(result.is_err(), "{case}");
        }
    }

    proptest! {
        #[test]
        fn envelope_roundtrip(text in ".*", n in any::<i64>(), use_type2 in any::<bool>()) {
            let (serializer, topic) = with_topic_key();
            let payload = json!({"text": text, "n": n});
            let kind = if use_type2 { EnvelopeType::Type2 } else { EnvelopeType::Type0 };
            let encoded = serializer.serialize(&topic, &payload, &kind).unwrap();
            let (decoded, decoded_kind): (Value, _) = serializer.deserialize(&topic, &encoded).unwrap();
            prop_assert_eq!(decoded, payload);
            prop_assert_eq!(decoded_kind, kind);
        }
    }
}

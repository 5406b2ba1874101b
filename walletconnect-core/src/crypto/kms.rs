use std::sync::Arc;

use tracing::debug;

use super::{AgreementPrivateKey, AgreementPublicKey, AgreementSecret, KeyError, SymmetricKey, KEY_LENGTH};
use crate::secure_storage::{SecureKeyStorage, SecureStorageError};
use crate::Topic;

const PRIVATE_KEY_PREFIX: &str = "privateKey";
const SYM_KEY_PREFIX: &str = "symKey";
const AGREEMENT_PREFIX: &str = "agreement";
const TOPIC_PUBLIC_KEY_PREFIX: &str = "topicPublicKey";

/// Crypto/KeyStore: owns private keys and channel secrets.
///
/// Every `set_*` persists immediately; every `delete_*` is idempotent.
#[derive(Clone)]
pub struct KeyManagementService {
    storage: Arc<dyn SecureKeyStorage>,
}

impl KeyManagementService {
    pub fn new(storage: Arc<dyn SecureKeyStorage>) -> Self {
        Self { storage }
    }

    /// Generate and persist a fresh X25519 key pair; returns the public half.
    pub fn create_x25519_key_pair(&self) -> Result<AgreementPublicKey, KeyError> {
        let private_key = AgreementPrivateKey::generate();
        self.set_private_key(&private_key)?;
        Ok(private_key.public_key())
    }

    pub fn set_private_key(&self, private_key: &AgreementPrivateKey) -> Result<(), KeyError> {
        let key = format!("{}:{}", PRIVATE_KEY_PREFIX, private_key.public_key());
        self.storage.add(&key, &private_key.to_bytes())?;
        Ok(())
    }

    pub fn get_private_key(
        &self,
        public_key: &AgreementPublicKey,
    ) -> Result<Option<AgreementPrivateKey>, KeyError> {
        let key = format!("{}:{}", PRIVATE_KEY_PREFIX, public_key);
        match self.storage.read(&key)? {
            Some(bytes) => Ok(Some(AgreementPrivateKey::from_bytes(to_key_bytes(&key, bytes)?))),
            None => Ok(None),
        }
    }

    pub fn delete_private_key(&self, public_key: &AgreementPublicKey) -> Result<(), KeyError> {
        self.storage
            .delete(&format!("{}:{}", PRIVATE_KEY_PREFIX, public_key))?;
        Ok(())
    }

    /// ECDH between our stored key `self_public_key` and `peer_public_key`.
    ///
    /// Fails with [`KeyError::KeyNotFound`] if we never created `self_public_key`.
    pub fn perform_key_agreement(
        &self,
        self_public_key: &AgreementPublicKey,
        peer_public_key: &str,
    ) -> Result<AgreementSecret, KeyError> {
        let peer = AgreementPublicKey::from_hex(peer_public_key)?;
        let private_key = self
            .get_private_key(self_public_key)?
            .ok_or_else(|| KeyError::KeyNotFound(self_public_key.to_hex()))?;
        Ok(AgreementSecret {
            shared_secret: private_key.shared_key(&peer)?,
            public_key: *self_public_key,
        })
    }

    pub fn set_agreement_secret(&self, secret: &AgreementSecret, topic: &Topic) -> Result<(), KeyError> {
        self.storage
            .add(&format!("{}:{}", AGREEMENT_PREFIX, topic), &secret.to_bytes())?;
        Ok(())
    }

    pub fn get_agreement_secret(&self, topic: &Topic) -> Result<Option<AgreementSecret>, KeyError> {
        let key = format!("{}:{}", AGREEMENT_PREFIX, topic);
        match self.storage.read(&key)? {
            Some(bytes) => AgreementSecret::from_bytes(&bytes)
                .map(Some)
                .ok_or_else(|| SecureStorageError::invalid_key(key, "malformed agreement secret").into()),
            None => Ok(None),
        }
    }

    pub fn delete_agreement_secret(&self, topic: &Topic) -> Result<(), KeyError> {
        self.storage.delete(&format!("{}:{}", AGREEMENT_PREFIX, topic))?;
        Ok(())
    }

    pub fn set_symmetric_key(&self, key: &SymmetricKey, topic: &Topic) -> Result<(), KeyError> {
        self.storage
            .add(&format!("{}:{}", SYM_KEY_PREFIX, topic), key.as_bytes())?;
        Ok(())
    }

    pub fn get_symmetric_key(&self, topic: &Topic) -> Result<Option<SymmetricKey>, KeyError> {
        let key = format!("{}:{}", SYM_KEY_PREFIX, topic);
        match self.storage.read(&key)? {
            Some(bytes) => Ok(Some(SymmetricKey::from_bytes(to_key_bytes(&key, bytes)?))),
            None => Ok(None),
        }
    }

    pub fn delete_symmetric_key(&self, topic: &Topic) -> Result<(), KeyError> {
        self.storage.delete(&format!("{}:{}", SYM_KEY_PREFIX, topic))?;
        Ok(())
    }

    /// Remember which of our public keys receives type-1 envelopes on `topic`.
    pub fn set_public_key(&self, public_key: &AgreementPublicKey, topic: &Topic) -> Result<(), KeyError> {
        self.storage.add(
            &format!("{}:{}", TOPIC_PUBLIC_KEY_PREFIX, topic),
            public_key.as_bytes(),
        )?;
        Ok(())
    }

    pub fn get_public_key(&self, topic: &Topic) -> Result<Option<AgreementPublicKey>, KeyError> {
        let key = format!("{}:{}", TOPIC_PUBLIC_KEY_PREFIX, topic);
        match self.storage.read(&key)? {
            Some(bytes) => Ok(Some(AgreementPublicKey::from_bytes(to_key_bytes(&key, bytes)?))),
            None => Ok(None),
        }
    }

    pub fn delete_public_key(&self, topic: &Topic) -> Result<(), KeyError> {
        self.storage
            .delete(&format!("{}:{}", TOPIC_PUBLIC_KEY_PREFIX, topic))?;
        Ok(())
    }

    /// The key that seals type-0 envelopes on `topic`: a symmetric key if one
    /// was stored, otherwise the agreement secret.
    pub fn get_key_for_topic(&self, topic: &Topic) -> Result<Option<SymmetricKey>, KeyError> {
        if let Some(key) = self.get_symmetric_key(topic)? {
            return Ok(Some(key));
        }
        Ok(self.get_agreement_secret(topic)?.map(|s| s.shared_secret))
    }

    /// Forget every key bound to `topic`.
    pub fn delete_topic_keys(&self, topic: &Topic) -> Result<(), KeyError> {
        self.delete_symmetric_key(topic)?;
        self.delete_agreement_secret(topic)?;
        self.delete_public_key(topic)?;
        debug!(%topic, "deleted topic keys");
        Ok(())
    }

    pub fn delete_all(&self) -> Result<(), KeyError> {
        self.storage.delete_all()?;
        Ok(())
    }
}

fn to_key_bytes(key_id: &str, bytes: Vec<u8>) -> Result<[u8; KEY_LENGTH], KeyError> {
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        SecureStorageError::invalid_key(key_id, format!("expected {} bytes, got {}", KEY_LENGTH, len)).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure_storage::InMemoryKeyStorage;

    fn kms() -> KeyManagementService {
        KeyManagementService::new(Arc::new(InMemoryKeyStorage::new()))
    }

    #[test]
    fn test_agreement_is_symmetric() {
        let a = kms();
        let b = kms();
        let a_pub = a.create_x25519_key_pair().unwrap();
        let b_pub = b.create_x25519_key_pair().unwrap();

        let ab = a.perform_key_agreement(&a_pub, &b_pub.to_hex()).unwrap();
        let ba = b.perform_key_agreement(&b_pub, &a_pub.to_hex()).unwrap();

        assert_eq!(ab.shared_secret, ba.shared_secret);
        assert_eq!(ab.derive_topic(), ba.derive_topic());
        assert_eq!(ab.public_key, a_pub);
    }

    #[test]
    fn test_agreement_without_private_key() {
        let kms = kms();
        let stranger = AgreementPrivateKey::generate().public_key();
        let peer = AgreementPrivateKey::generate().public_key();
        let err = kms.perform_key_agreement(&stranger, &peer.to_hex()).unwrap_err();
        assert!(matches!(err, KeyError::KeyNotFound(_)));
    }

    #[test]
    fn test_agreement_with_bad_peer_key() {
        let kms = kms();
        let own = kms.create_x25519_key_pair().unwrap();
        let err = kms.perform_key_agreement(&own, "not-hex").unwrap_err();
        assert!(matches!(err, KeyError::InvalidPublicKey(_)));
    }

    #[test]
    fn test_symmetric_key_lifecycle() {
        let kms = kms();
        let key = SymmetricKey::generate();
        let topic = key.derive_topic();
        kms.set_symmetric_key(&key, &topic).unwrap();
        assert_eq!(kms.get_symmetric_key(&topic).unwrap(), Some(key.clone()));
        assert_eq!(kms.get_key_for_topic(&topic).unwrap(), Some(key));
        kms.delete_symmetric_key(&topic).unwrap();
        kms.delete_symmetric_key(&topic).unwrap();
        assert!(kms.get_key_for_topic(&topic).unwrap().is_none());
    }

    #[test]
    fn test_agreement_secret_lifecycle() {
        let kms = kms();
        let own = kms.create_x25519_key_pair().unwrap();
        let peer = AgreementPrivateKey::generate().public_key();
        let secret = kms.perform_key_agreement(&own, &peer.to_hex()).unwrap();
        let topic = secret.derive_topic();

        kms.set_agreement_secret(&secret, &topic).unwrap();
        assert_eq!(kms.get_agreement_secret(&topic).unwrap(), Some(secret.clone()));
        assert_eq!(kms.get_key_for_topic(&topic).unwrap(), Some(secret.shared_secret));

        kms.delete_topic_keys(&topic).unwrap();
        assert!(kms.get_agreement_secret(&topic).unwrap().is_none());
    }

    #[test]
    fn test_private_key_delete() {
        let kms = kms();
        let own = kms.create_x25519_key_pair().unwrap();
        assert!(kms.get_private_key(&own).unwrap().is_some());
        kms.delete_private_key(&own).unwrap();
        assert!(kms.get_private_key(&own).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_entry_is_an_error() {
        let storage = Arc::new(InMemoryKeyStorage::new());
        let kms = KeyManagementService::new(storage.clone());
        let topic = Topic::generate();
        storage.add(&format!("symKey:{}", topic), b"short").unwrap();
        assert!(matches!(
            kms.get_symmetric_key(&topic),
            Err(KeyError::Storage(_))
        ));
    }
}

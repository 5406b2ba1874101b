//! Two independent key stores exchanging envelopes.

use std::sync::Arc;

use serde_json::json;
use walletconnect_core::crypto::AgreementPublicKey;
use walletconnect_core::envelope::CodecError;
use walletconnect_core::secure_storage::InMemoryKeyStorage;
use walletconnect_core::{EnvelopeType, KeyManagementService, RpcRequest, Serializer, Topic};

fn serializer() -> Serializer {
    Serializer::new(KeyManagementService::new(Arc::new(InMemoryKeyStorage::new())))
}

#[test]
fn test_agreed_key_opens_type0_on_both_sides() {
    let alice = serializer();
    let bob = serializer();

    let alice_pub = alice.kms().create_x25519_key_pair().unwrap();
    let bob_pub = bob.kms().create_x25519_key_pair().unwrap();
    let a = alice.kms().perform_key_agreement(&alice_pub, &bob_pub.to_hex()).unwrap();
    let b = bob.kms().perform_key_agreement(&bob_pub, &alice_pub.to_hex()).unwrap();
    assert_eq!(a.derive_topic(), b.derive_topic());

    let topic = a.derive_topic();
    alice.kms().set_agreement_secret(&a, &topic).unwrap();
    bob.kms().set_agreement_secret(&b, &topic).unwrap();

    let request = RpcRequest::new("wc_sessionPing", json!({}));
    let sealed = alice.serialize(&topic, &request, &EnvelopeType::Type0).unwrap();
    let (opened, envelope): (RpcRequest, _) = bob.deserialize(&topic, &sealed).unwrap();
    assert_eq!(opened, request);
    assert_eq!(envelope, EnvelopeType::Type0);
}

#[test]
fn test_type1_first_contact() {
    // The requester only publishes its public key; the responder derives the
    // key and answers on the topic derived from that public key.
    let requester = serializer();
    let responder = serializer();

    let requester_pub = requester.kms().create_x25519_key_pair().unwrap();
    let response_topic = requester_pub.derive_topic();
    requester.kms().set_public_key(&requester_pub, &response_topic).unwrap();

    let responder_pub = responder.kms().create_x25519_key_pair().unwrap();
    let secret = responder
        .kms()
        .perform_key_agreement(&responder_pub, &requester_pub.to_hex())
        .unwrap();
    responder.kms().set_agreement_secret(&secret, &response_topic).unwrap();

    let payload = json!({"jsonrpc": "2.0", "id": 1, "result": {"cacaos": []}});
    let sealed = responder
        .serialize(
            &response_topic,
            &payload,
            &EnvelopeType::Type1 {
                sender_public_key: responder_pub,
            },
        )
        .unwrap();

    let (opened, envelope): (serde_json::Value, _) =
        requester.deserialize(&response_topic, &sealed).unwrap();
    assert_eq!(opened, payload);
    assert_eq!(
        envelope,
        EnvelopeType::Type1 {
            sender_public_key: responder_pub
        }
    );
}

#[test]
fn test_stranger_cannot_open() {
    let alice = serializer();
    let eve = serializer();
    let key = walletconnect_core::SymmetricKey::generate();
    let topic = key.derive_topic();
    alice.kms().set_symmetric_key(&key, &topic).unwrap();
    eve.kms()
        .set_symmetric_key(&walletconnect_core::SymmetricKey::generate(), &topic)
        .unwrap();

    let sealed = alice.serialize(&topic, &json!({"secret": 1}), &EnvelopeType::Type0).unwrap();
    let err = eve.deserialize::<serde_json::Value>(&topic, &sealed).unwrap_err();
    assert!(matches!(err, CodecError::Decryption));

    let unknown = Topic::generate();
    let err = serializer()
        .deserialize::<serde_json::Value>(&unknown, &sealed)
        .unwrap_err();
    assert!(matches!(err, CodecError::Key(_)));
}

#[test]
fn test_type2_needs_no_key() {
    let alice = serializer();
    let bob = serializer();
    let topic = AgreementPublicKey::from_bytes([7u8; 32]).derive_topic();
    let sealed = alice.serialize(&topic, &json!({"hello": "world"}), &EnvelopeType::Type2).unwrap();
    assert!(!sealed.contains('+') && !sealed.contains('/') && !sealed.ends_with('='));
    let (opened, envelope): (serde_json::Value, _) = bob.deserialize(&topic, &sealed).unwrap();
    assert_eq!(opened["hello"], "world");
    assert_eq!(envelope, EnvelopeType::Type2);
}

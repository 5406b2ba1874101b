//! Key agreement and envelope benchmarks
//!
//! Run with: `cargo bench --bench crypto_benchmarks`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use walletconnect_core::crypto::AgreementPrivateKey;
use walletconnect_core::secure_storage::InMemoryKeyStorage;
use walletconnect_core::{EnvelopeType, KeyManagementService, RpcRequest, Serializer, SymmetricKey};

fn bench_key_agreement(c: &mut Criterion) {
    let peer = AgreementPrivateKey::generate().public_key();

    c.bench_function("x25519_hkdf_agreement", |b| {
        b.iter(|| {
            let own = AgreementPrivateKey::generate();
            black_box(own.shared_key(black_box(&peer)))
        })
    });
}

fn bench_envelope(c: &mut Criterion) {
    let serializer = Serializer::new(KeyManagementService::new(Arc::new(InMemoryKeyStorage::new())));
    let key = SymmetricKey::generate();
    let topic = key.derive_topic();
    serializer.kms().set_symmetric_key(&key, &topic).unwrap();

    let mut group = c.benchmark_group("envelope_type0");
    for size in [64usize, 1024, 16 * 1024] {
        let request = RpcRequest::new(
            "wc_sessionRequest",
            json!({ "request": { "method": "personal_sign", "params": ["x".repeat(size)] } }),
        );
        let sealed = serializer.serialize(&topic, &request, &EnvelopeType::Type0).unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("seal_{}", size), |b| {
            b.iter(|| black_box(serializer.serialize(&topic, black_box(&request), &EnvelopeType::Type0)))
        });
        group.bench_function(format!("open_{}", size), |b| {
            b.iter(|| black_box(serializer.deserialize::<RpcRequest>(&topic, black_box(&sealed))))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_key_agreement, bench_envelope);
criterion_main!(benches);

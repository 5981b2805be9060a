//! Criterion benchmarks for the CBC stream and key derivation.
//!
//! Run with:
//! ```bash
//! cargo bench --package mwb-core --bench cipher_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mwb_core::crypto::{derive_session_key, CipherDirection};

const PASSPHRASE: &str = "ABCDEFGHIJKLMNOP";

/// Encrypting one extended packet through a persistent stream.
fn bench_stream_packet(c: &mut Criterion) {
    let key = derive_session_key(PASSPHRASE).unwrap();
    let mut stream = key.make_stream_cipher(CipherDirection::Encrypt);
    let packet = [0x42u8; 64];

    c.bench_function("stream_encrypt_64", |b| {
        b.iter(|| stream.process(black_box(&packet)).unwrap())
    });
}

/// Full passphrase derivation; dominated by the 2 x 50,000 hash rounds.
fn bench_derive(c: &mut Criterion) {
    let mut group = c.benchmark_group("derive");
    group.sample_size(10);
    group.bench_function("session_key", |b| {
        b.iter(|| derive_session_key(black_box(PASSPHRASE)).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_stream_packet, bench_derive);
criterion_main!(benches);

use envault_crypto::{
    create_item, decrypt, encrypt, read_item, rewrap, unwrap_key_with_private,
    wrap_key_for_recipient, IdentityKeyPair, SymmetricKey, VaultKey,
};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(13) ^ (i >> 2)) as u8)
        .collect()
}

#[divan::bench(args = [64, 4096, 65536])]
fn bench_encrypt(bencher: divan::Bencher, size: usize) {
    let key = SymmetricKey::generate();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt(divan::black_box(&key), divan::black_box(&data)).unwrap());
}

#[divan::bench(args = [64, 4096, 65536])]
fn bench_decrypt(bencher: divan::Bencher, size: usize) {
    let key = SymmetricKey::generate();
    let encrypted = encrypt(&key, &make_data(size)).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| decrypt(divan::black_box(&key), divan::black_box(&encrypted)).unwrap());
}

#[divan::bench]
fn bench_item_roundtrip(bencher: divan::Bencher) {
    let vault_key = VaultKey::generate();
    let content = serde_json::json!({
        "title": "bank",
        "username": "alice",
        "password": "p4ssw0rd!",
    });
    bencher.bench(|| {
        let envelope = create_item(divan::black_box(&vault_key), &content).unwrap();
        read_item::<serde_json::Value>(&vault_key, &envelope).unwrap()
    });
}

/// Per-record cost of a vault-key rotation.
#[divan::bench]
fn bench_rewrap_item_key(bencher: divan::Bencher) {
    let old = VaultKey::generate();
    let new = VaultKey::generate();
    let envelope = create_item(&old, &"x").unwrap();
    bencher.bench(|| {
        rewrap(
            divan::black_box(&old),
            divan::black_box(&new),
            divan::black_box(&envelope.encrypted_item_key),
        )
        .unwrap()
    });
}

#[divan::bench(sample_count = 20)]
fn bench_rsa_wrap_unwrap(bencher: divan::Bencher) {
    let keypair = IdentityKeyPair::generate().unwrap();
    let item_key = SymmetricKey::generate();
    bencher.bench(|| {
        let wrapped = wrap_key_for_recipient(divan::black_box(&item_key), &keypair.public).unwrap();
        unwrap_key_with_private(&wrapped, &keypair.private).unwrap()
    });
}

fn main() {
    divan::main();
}

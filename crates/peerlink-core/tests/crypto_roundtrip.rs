//! Integration tests for the credential document cipher.
//!
//! These tests exercise the public cipher API the way the credential store
//! uses it: whole JSON documents in, `EncryptedBlob`s out, over many randomly
//! generated documents.

use std::collections::HashSet;

use peerlink_core::crypto::{ALGORITHM_AES_256_GCM, ALGORITHM_PLAINTEXT_BASE64};
use peerlink_core::{CryptoError, DocumentCipher, EncryptedBlob, KdfParams};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};

fn light_params() -> KdfParams {
    KdfParams::new(1024, 1, 1)
}

fn random_string(rng: &mut StdRng) -> String {
    let len = rng.random_range(0..24);
    (0..len)
        .map(|_| {
            // Mix ASCII with a few multi-byte characters.
            match rng.random_range(0..10) {
                0 => 'é',
                1 => '鍵',
                _ => rng.random_range(b' '..=b'~') as char,
            }
        })
        .collect()
}

fn random_value(rng: &mut StdRng, depth: u32) -> Value {
    let kind = if depth == 0 {
        rng.random_range(0..4)
    } else {
        rng.random_range(0..6)
    };
    match kind {
        0 => Value::Null,
        1 => Value::Bool(rng.random()),
        2 => json!(rng.random::<i64>()),
        3 => Value::String(random_string(rng)),
        4 => {
            let len = rng.random_range(0..5);
            Value::Array((0..len).map(|_| random_value(rng, depth - 1)).collect())
        }
        _ => {
            let len = rng.random_range(0..5);
            let mut map = Map::new();
            for _ in 0..len {
                map.insert(random_string(rng), random_value(rng, depth - 1));
            }
            Value::Object(map)
        }
    }
}

#[test]
fn test_roundtrip_1000_random_documents() {
    // Arrange
    let cipher = DocumentCipher::derive(b"roundtrip-secret", &light_params()).unwrap();
    let mut rng = StdRng::seed_from_u64(0x5EED_1234);

    for i in 0..1000 {
        let value = random_value(&mut rng, 3);

        // Act
        let blob = cipher.encrypt_value(&value).expect("encrypt must succeed");
        let decoded = cipher.decrypt_value(&blob).expect("decrypt must succeed");

        // Assert
        assert_eq!(decoded, value, "document #{i} did not round-trip");
        assert_eq!(blob.algorithm, ALGORITHM_AES_256_GCM);
    }
}

#[test]
fn test_blob_survives_json_serialization() {
    // The store writes the blob itself as JSON; parsing it back must yield a
    // blob that still decrypts.
    let cipher = DocumentCipher::derive(b"s", &light_params()).unwrap();
    let value = json!({"10.0.0.2:47265": {"token": "abc"}});

    let on_disk = serde_json::to_string(&cipher.encrypt_value(&value).unwrap()).unwrap();
    let blob: EncryptedBlob = serde_json::from_str(&on_disk).unwrap();

    assert_eq!(cipher.decrypt_value(&blob).unwrap(), value);
}

#[test]
fn test_cross_key_isolation() {
    // Arrange
    let alice = DocumentCipher::derive(b"alice-secret", &light_params()).unwrap();
    let bob = DocumentCipher::derive(b"bob-secret", &light_params()).unwrap();
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..50 {
        let value = random_value(&mut rng, 2);

        // Act
        let blob = alice.encrypt_value(&value).unwrap();

        // Assert
        assert_eq!(bob.decrypt_value(&blob), Err(CryptoError::Decrypt));
    }
}

#[test]
fn test_nonces_are_unique_across_many_encryptions() {
    let cipher = DocumentCipher::from_key(&[42u8; 32]);
    let ivs: HashSet<String> = (0..500)
        .map(|_| cipher.encrypt(b"same plaintext").unwrap().iv)
        .collect();
    assert_eq!(ivs.len(), 500);
}

#[test]
fn test_degraded_blob_opens_with_or_without_key() {
    let cipher = DocumentCipher::from_key(&[1u8; 32]);
    let blob = EncryptedBlob::degraded(br#"{"k":"v"}"#);

    assert_eq!(blob.algorithm, ALGORITHM_PLAINTEXT_BASE64);
    assert_eq!(blob.open(None).unwrap(), br#"{"k":"v"}"#);
    assert_eq!(blob.open(Some(&cipher)).unwrap(), br#"{"k":"v"}"#);
}

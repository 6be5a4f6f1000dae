use clipsync_crypto::{decrypt, encrypt, generate_key_material, AccountKey, CryptoError, NONCE_SIZE};
use proptest::prelude::*;

// ── Happy Path ──────────────────────────────────────────────────

#[test]
fn round_trip_is_byte_exact() {
    let key = generate_key_material();
    let payload = b"some clipboard content \xf0\x9f\x93\x8b".to_vec();
    let blob = encrypt(&key, &payload).unwrap();
    assert_eq!(decrypt(&key, &blob).unwrap(), payload);
}

#[test]
fn empty_payload_round_trips() {
    let key = generate_key_material();
    let blob = encrypt(&key, b"").unwrap();
    assert_eq!(decrypt(&key, &blob).unwrap(), Vec::<u8>::new());
}

#[test]
fn account_keys_are_distinct() {
    let a = AccountKey::generate("user-1");
    let b = AccountKey::generate("user-1");
    assert_ne!(a.id, b.id);
    assert_ne!(a.material.as_bytes(), b.material.as_bytes());
}

// ── Failure Modes ───────────────────────────────────────────────

#[test]
fn wrong_key_fails_decryption() {
    let key = generate_key_material();
    let other = generate_key_material();
    let blob = encrypt(&key, b"secret").unwrap();
    assert!(matches!(
        decrypt(&other, &blob),
        Err(CryptoError::DecryptionFailure(_))
    ));
}

#[test]
fn tampered_ciphertext_fails() {
    let key = generate_key_material();
    let mut blob = encrypt(&key, b"secret").unwrap();
    let last = blob.len() - 1;
    blob[last] ^= 0xff;
    assert!(matches!(
        decrypt(&key, &blob),
        Err(CryptoError::DecryptionFailure(_))
    ));
}

#[test]
fn truncated_blob_is_rejected() {
    let key = generate_key_material();
    assert!(matches!(
        decrypt(&key, &[0u8; NONCE_SIZE - 1]),
        Err(CryptoError::TruncatedPayload(_))
    ));
}

// ── Properties ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn round_trip_for_arbitrary_payloads(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let key = generate_key_material();
        let blob = encrypt(&key, &payload).unwrap();
        prop_assert_eq!(decrypt(&key, &blob).unwrap(), payload);
    }
}

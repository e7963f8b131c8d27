//! Argon2id key derivation and AES-256-GCM document encryption.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// Algorithm tag for AES-256-GCM blobs.
pub const ALGORITHM_AES_256_GCM: &str = "aes-256-gcm";

/// Algorithm tag for the degraded, non-confidential encoding.
pub const ALGORITHM_PLAINTEXT_BASE64: &str = "plaintext-base64";

/// Salt for the key derivation.  The root secret is already random and
/// per-instance, so a fixed salt only domain-separates this key.
const KDF_SALT: &[u8] = b"peerlink/credential-store/v1";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Errors produced by key derivation, encryption, or blob decoding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed")]
    Encrypt,

    /// Wrong key or tampered ciphertext.  AEAD errors carry no detail.
    #[error("decryption failed: wrong key or corrupted data")]
    Decrypt,

    #[error("invalid blob encoding: {0}")]
    Encoding(String),

    #[error("unsupported algorithm: {0:?}")]
    UnsupportedAlgorithm(String),

    /// An encrypted blob was found but no key is available to open it.
    #[error("no encryption key available")]
    KeyUnavailable,
}

// ── KDF parameters ────────────────────────────────────────────────────────────

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            parallelism,
        }
    }
}

// ── Blob ──────────────────────────────────────────────────────────────────────

/// The serialized form of an encrypted (or degraded) document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    /// Base64 ciphertext (or base64 plaintext for the degraded encoding).
    pub ciphertext: String,
    /// Base64 96-bit nonce; empty for the degraded encoding.
    pub iv: String,
    pub algorithm: String,
}

impl EncryptedBlob {
    /// Wraps `plaintext` in the degraded `plaintext-base64` encoding.
    ///
    /// The result is not confidential.  It exists so that credentials survive
    /// on hosts where key derivation is unavailable.
    pub fn degraded(plaintext: &[u8]) -> Self {
        Self {
            ciphertext: BASE64.encode(plaintext),
            iv: String::new(),
            algorithm: ALGORITHM_PLAINTEXT_BASE64.to_string(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.algorithm == ALGORITHM_PLAINTEXT_BASE64
    }

    /// Recovers the plaintext.
    ///
    /// Degraded blobs open without a key; AES-GCM blobs need `cipher`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyUnavailable`] for an encrypted blob when
    /// `cipher` is `None`, and the decryption/decoding errors of
    /// [`DocumentCipher::decrypt`] otherwise.
    pub fn open(&self, cipher: Option<&DocumentCipher>) -> Result<Vec<u8>, CryptoError> {
        match self.algorithm.as_str() {
            ALGORITHM_PLAINTEXT_BASE64 => BASE64
                .decode(&self.ciphertext)
                .map_err(|e| CryptoError::Encoding(e.to_string())),
            ALGORITHM_AES_256_GCM => cipher.ok_or(CryptoError::KeyUnavailable)?.decrypt(self),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

// ── Cipher ────────────────────────────────────────────────────────────────────

/// AES-256-GCM cipher keyed from the instance's root secret.
pub struct DocumentCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for DocumentCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCipher").finish_non_exhaustive()
    }
}

impl DocumentCipher {
    /// Derives the document key from `secret` with Argon2id.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivation`] if `params` are out of range for
    /// Argon2 or the derivation itself fails.
    pub fn derive(secret: &[u8], params: &KdfParams) -> Result<Self, CryptoError> {
        let key = derive_key(secret, params)?;
        Ok(Self::from_key(&key))
    }

    /// Builds a cipher from a raw 32-byte key.
    pub fn from_key(key: &[u8; KEY_LEN]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encrypt`] if the AEAD rejects the input.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        Ok(EncryptedBlob {
            ciphertext: BASE64.encode(ciphertext),
            iv: BASE64.encode(nonce),
            algorithm: ALGORITHM_AES_256_GCM.to_string(),
        })
    }

    /// Decrypts an AES-256-GCM blob.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::UnsupportedAlgorithm`] for any other algorithm tag.
    /// - [`CryptoError::Encoding`] for bad base64 or a nonce of the wrong size.
    /// - [`CryptoError::Decrypt`] for a wrong key or tampered data.
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Vec<u8>, CryptoError> {
        if blob.algorithm != ALGORITHM_AES_256_GCM {
            return Err(CryptoError::UnsupportedAlgorithm(blob.algorithm.clone()));
        }

        let iv = BASE64
            .decode(&blob.iv)
            .map_err(|e| CryptoError::Encoding(format!("iv: {e}")))?;
        if iv.len() != NONCE_LEN {
            return Err(CryptoError::Encoding(format!(
                "iv: expected {NONCE_LEN} bytes, got {}",
                iv.len()
            )));
        }
        let ciphertext = BASE64
            .decode(&blob.ciphertext)
            .map_err(|e| CryptoError::Encoding(format!("ciphertext: {e}")))?;

        self.cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
            .map_err(|_| CryptoError::Decrypt)
    }

    /// Serializes `value` to JSON and encrypts it.
    ///
    /// # Errors
    ///
    /// See [`encrypt`](Self::encrypt).
    pub fn encrypt_value(&self, value: &serde_json::Value) -> Result<EncryptedBlob, CryptoError> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| CryptoError::Encoding(e.to_string()))?;
        self.encrypt(&bytes)
    }

    /// Decrypts a blob and parses the plaintext as JSON.
    ///
    /// # Errors
    ///
    /// See [`decrypt`](Self::decrypt); non-JSON plaintext is
    /// [`CryptoError::Encoding`].
    pub fn decrypt_value(&self, blob: &EncryptedBlob) -> Result<serde_json::Value, CryptoError> {
        let bytes = self.decrypt(blob)?;
        serde_json::from_slice(&bytes).map_err(|e| CryptoError::Encoding(e.to_string()))
    }
}

/// Argon2id over `secret`.  The key is wiped when the caller drops it.
fn derive_key(secret: &[u8], params: &KdfParams) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(secret, KDF_SALT, key.as_mut_slice())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light_params() -> KdfParams {
        KdfParams::new(1024, 1, 1)
    }

    fn make_cipher(secret: &[u8]) -> DocumentCipher {
        DocumentCipher::derive(secret, &light_params()).unwrap()
    }

    fn assert_zeroize_on_drop<T: zeroize::ZeroizeOnDrop>(_: &T) {}

    #[test]
    fn test_derived_key_is_wiped_on_drop_and_deterministic() {
        // Arrange / Act
        let first = derive_key(b"root-secret", &light_params()).unwrap();
        let second = derive_key(b"root-secret", &light_params()).unwrap();

        // Assert
        assert_zeroize_on_drop(&first);
        assert_eq!(*first, *second);
        assert_ne!(*first, [0u8; KEY_LEN]);
    }

    #[test]
    fn test_default_params() {
        let p = KdfParams::default();
        assert_eq!((p.memory_kib, p.iterations, p.parallelism), (19456, 2, 1));
    }

    #[test]
    fn test_encrypt_then_decrypt_returns_plaintext() {
        // Arrange
        let cipher = make_cipher(b"root-secret");

        // Act
        let blob = cipher.encrypt(b"hello peers").unwrap();
        let plain = cipher.decrypt(&blob).unwrap();

        // Assert
        assert_eq!(plain, b"hello peers");
        assert_eq!(blob.algorithm, ALGORITHM_AES_256_GCM);
        assert_ne!(blob.ciphertext, BASE64.encode(b"hello peers"));
    }

    #[test]
    fn test_same_secret_derives_same_key() {
        let blob = make_cipher(b"s").encrypt(b"data").unwrap();
        assert_eq!(make_cipher(b"s").decrypt(&blob).unwrap(), b"data");
    }

    #[test]
    fn test_wrong_key_fails_with_decrypt_error() {
        let blob = make_cipher(b"alice").encrypt(b"data").unwrap();
        assert_eq!(make_cipher(b"bob").decrypt(&blob), Err(CryptoError::Decrypt));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        // Arrange
        let cipher = make_cipher(b"s");
        let mut blob = cipher.encrypt(b"data").unwrap();
        let mut raw = BASE64.decode(&blob.ciphertext).unwrap();
        raw[0] ^= 0xFF;
        blob.ciphertext = BASE64.encode(raw);

        // Act / Assert
        assert_eq!(cipher.decrypt(&blob), Err(CryptoError::Decrypt));
    }

    #[test]
    fn test_short_iv_is_an_encoding_error() {
        let cipher = make_cipher(b"s");
        let mut blob = cipher.encrypt(b"data").unwrap();
        blob.iv = BASE64.encode([0u8; 4]);
        assert!(matches!(cipher.decrypt(&blob), Err(CryptoError::Encoding(_))));
    }

    #[test]
    fn test_each_encryption_uses_a_fresh_nonce() {
        let cipher = make_cipher(b"s");
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_invalid_kdf_params_are_rejected() {
        let result = DocumentCipher::derive(b"s", &KdfParams::new(1, 0, 0));
        assert!(matches!(result, Err(CryptoError::KeyDerivation(_))));
    }

    #[test]
    fn test_degraded_blob_opens_without_key() {
        // Arrange
        let blob = EncryptedBlob::degraded(b"{\"a\":1}");

        // Act
        let plain = blob.open(None).unwrap();

        // Assert
        assert!(blob.is_degraded());
        assert_eq!(plain, b"{\"a\":1}");
    }

    #[test]
    fn test_encrypted_blob_needs_a_key_to_open() {
        let blob = make_cipher(b"s").encrypt(b"x").unwrap();
        assert_eq!(blob.open(None), Err(CryptoError::KeyUnavailable));
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let blob = EncryptedBlob {
            ciphertext: String::new(),
            iv: String::new(),
            algorithm: "rot13".to_string(),
        };
        assert_eq!(
            blob.open(Some(&make_cipher(b"s"))),
            Err(CryptoError::UnsupportedAlgorithm("rot13".to_string()))
        );
    }

    #[test]
    fn test_value_helpers_round_trip_json() {
        let cipher = make_cipher(b"s");
        let value = serde_json::json!({"10.0.0.2:47265": {"token": "abc"}});
        let blob = cipher.encrypt_value(&value).unwrap();
        assert_eq!(cipher.decrypt_value(&blob).unwrap(), value);
    }

    #[test]
    fn test_blob_serializes_with_three_fields() {
        let blob = EncryptedBlob::degraded(b"x");
        let json = serde_json::to_value(&blob).unwrap();
        assert_eq!(json["algorithm"], ALGORITHM_PLAINTEXT_BASE64);
        assert_eq!(json["ciphertext"], "eA==");
        assert_eq!(json["iv"], "");
    }
}

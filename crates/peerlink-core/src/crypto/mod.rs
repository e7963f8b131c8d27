//! Encryption of the on-disk credential document.
//!
//! A 256-bit key is derived from the instance's root secret with Argon2id and
//! used with AES-256-GCM.  Every encryption draws a fresh 96-bit nonce, stored
//! next to the ciphertext in an [`EncryptedBlob`].

pub mod cipher;

pub use cipher::{
    CryptoError, DocumentCipher, EncryptedBlob, KdfParams, ALGORITHM_AES_256_GCM,
    ALGORITHM_PLAINTEXT_BASE64,
};

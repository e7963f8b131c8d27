//! Encrypted, file-backed credential store.
//!
//! The store is a single JSON document (`credentials.json` in the data
//! directory) mapping pairing endpoints to [`TokenRecord`]s.  On disk the map
//! is wrapped in an [`EncryptedBlob`]:
//!
//! ```json
//! { "ciphertext": "...", "iv": "...", "algorithm": "aes-256-gcm" }
//! ```
//!
//! # Document formats
//!
//! | Shape on disk                         | Handling                          |
//! |---------------------------------------|-----------------------------------|
//! | object with an `algorithm` key        | blob, opened with the store key   |
//! | any other object                      | legacy plaintext map, re-written  |
//! |                                       | as a blob on the next write       |
//! | missing or empty file                 | empty store                       |
//!
//! Legacy map values may be a full `TokenRecord` or a bare token string.
//!
//! # Degraded mode
//!
//! If the key cannot be derived (or AES-GCM refuses to encrypt), documents are
//! written with the `plaintext-base64` encoding and a warning is logged.  The
//! store keeps working; [`CredentialStore::mode`] reports
//! [`StoreMode::Degraded`] so the caller can surface it.
//!
//! # Concurrency
//!
//! Every operation runs inside one async critical section, so a
//! read-modify-write is never interleaved with another in this process.
//! Writes go to a temporary file which is then renamed over the document.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use peerlink_core::crypto::{ALGORITHM_AES_256_GCM, ALGORITHM_PLAINTEXT_BASE64};
use peerlink_core::{
    CryptoError, DocumentCipher, EncryptedBlob, KdfParams, PairingToken, TokenRecord,
};
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::application::credentials::{CredentialRepository, RepositoryError};

pub const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error accessing credential store at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Whether documents are written encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Encrypted,
    /// Written as `plaintext-base64`; not confidential.
    Degraded,
}

type Records = BTreeMap<String, TokenRecord>;

pub struct CredentialStore {
    path: PathBuf,
    cipher: Option<DocumentCipher>,
    lock: Mutex<()>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.path)
            .field("mode", &self.mode())
            .finish()
    }
}

impl CredentialStore {
    /// Opens the store at `path`, deriving the key from `secret`.
    ///
    /// Never fails: a key derivation error puts the store in
    /// [`StoreMode::Degraded`].  Nothing is read until the first operation.
    pub fn open(path: impl Into<PathBuf>, secret: &[u8], params: &KdfParams) -> Self {
        let path = path.into();
        let cipher = match DocumentCipher::derive(secret, params) {
            Ok(cipher) => Some(cipher),
            Err(e) => {
                warn!(
                    "credential store key derivation failed ({e}); \
                     credentials will be stored without encryption"
                );
                None
            }
        };
        Self {
            path,
            cipher,
            lock: Mutex::new(()),
        }
    }

    /// Opens `credentials.json` inside `data_dir`.
    pub fn open_in(data_dir: &Path, secret: &[u8], params: &KdfParams) -> Self {
        Self::open(data_dir.join(CREDENTIALS_FILE), secret, params)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> StoreMode {
        if self.cipher.is_some() {
            StoreMode::Encrypted
        } else {
            StoreMode::Degraded
        }
    }

    /// # Errors
    ///
    /// [`StoreError`] if the document cannot be read or opened.
    pub async fn get(&self, endpoint: SocketAddr) -> Result<Option<TokenRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        Ok(records.remove(&endpoint.to_string()))
    }

    /// Inserts or replaces the record for `record.peer_address`.
    ///
    /// Returns the algorithm tag the document was written with.
    ///
    /// # Errors
    ///
    /// [`StoreError`] if the current document cannot be read (it is then left
    /// untouched) or the new one cannot be written.
    pub async fn put(&self, record: TokenRecord) -> Result<&'static str, StoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        records.insert(record.key(), record);
        self.save(&records).await
    }

    /// Returns `true` if a record was deleted.
    ///
    /// # Errors
    ///
    /// See [`put`](Self::put).
    pub async fn remove(&self, endpoint: SocketAddr) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        if records.remove(&endpoint.to_string()).is_none() {
            return Ok(false);
        }
        self.save(&records).await?;
        Ok(true)
    }

    /// All records, ordered by endpoint.
    ///
    /// # Errors
    ///
    /// [`StoreError`] if the document cannot be read or opened.
    pub async fn all(&self) -> Result<Vec<TokenRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_values().collect())
    }

    // ── Document I/O ──────────────────────────────────────────────────────────

    async fn load(&self) -> Result<Records, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Records::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Records::new());
        }

        let document: Value = serde_json::from_slice(&bytes)?;
        if document.get("algorithm").is_some() {
            let blob: EncryptedBlob = serde_json::from_value(document)?;
            let plaintext = blob.open(self.cipher.as_ref())?;
            let map: Value = serde_json::from_slice(&plaintext)?;
            Ok(parse_records(map))
        } else {
            debug!("loading legacy plaintext credential document");
            Ok(parse_records(document))
        }
    }

    async fn save(&self, records: &Records) -> Result<&'static str, StoreError> {
        let value = serde_json::to_value(records)?;
        let blob = match &self.cipher {
            Some(cipher) => match cipher.encrypt_value(&value) {
                Ok(blob) => blob,
                Err(e) => {
                    warn!("credential encryption failed ({e}); writing degraded document");
                    EncryptedBlob::degraded(&serde_json::to_vec(&value)?)
                }
            },
            None => EncryptedBlob::degraded(&serde_json::to_vec(&value)?),
        };
        let algorithm = if blob.is_degraded() {
            ALGORITHM_PLAINTEXT_BASE64
        } else {
            ALGORITHM_AES_256_GCM
        };

        let bytes = serde_json::to_vec_pretty(&blob)?;
        self.write_atomic(&bytes).await.map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(algorithm)
    }

    async fn write_atomic(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.path.with_extension("json.tmp");

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await
    }
}

/// Parses a plaintext `endpoint → record | token` map.  Entries that fit
/// neither shape are skipped with a warning.
fn parse_records(map: Value) -> Records {
    let Value::Object(entries) = map else {
        warn!("credential document is not a JSON object; treating as empty");
        return Records::new();
    };

    let mut records = Records::new();
    for (key, value) in entries {
        let record = match value {
            Value::String(token) => key.parse::<SocketAddr>().ok().map(|addr| {
                TokenRecord::new(addr, PairingToken::from_string(token), None)
            }),
            other => serde_json::from_value::<TokenRecord>(other).ok(),
        };
        match record {
            Some(record) => {
                records.insert(record.key(), record);
            }
            None => warn!(key = %key, "skipping unreadable credential entry"),
        }
    }
    records
}

#[async_trait]
impl CredentialRepository for CredentialStore {
    async fn get(&self, endpoint: SocketAddr) -> Result<Option<TokenRecord>, RepositoryError> {
        CredentialStore::get(self, endpoint)
            .await
            .map_err(|e| RepositoryError(e.to_string()))
    }

    async fn put(&self, record: TokenRecord) -> Result<(), RepositoryError> {
        CredentialStore::put(self, record)
            .await
            .map(|_| ())
            .map_err(|e| RepositoryError(e.to_string()))
    }

    async fn remove(&self, endpoint: SocketAddr) -> Result<bool, RepositoryError> {
        CredentialStore::remove(self, endpoint)
            .await
            .map_err(|e| RepositoryError(e.to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

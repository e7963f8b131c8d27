//! Port through which the use cases reach the credential store.

use std::net::SocketAddr;

use async_trait::async_trait;
use peerlink_core::TokenRecord;
use thiserror::Error;

/// A credential lookup or write failed.
///
/// The message is the underlying store error rendered as text; the use cases
/// only log it and decide the outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("credential repository error: {0}")]
pub struct RepositoryError(pub String);

/// Pairing tokens keyed by peer pairing endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn get(&self, endpoint: SocketAddr) -> Result<Option<TokenRecord>, RepositoryError>;

    /// Inserts or replaces the record for `record.peer_address`.
    async fn put(&self, record: TokenRecord) -> Result<(), RepositoryError>;

    /// Returns `true` if a record was deleted.
    async fn remove(&self, endpoint: SocketAddr) -> Result<bool, RepositoryError>;
}

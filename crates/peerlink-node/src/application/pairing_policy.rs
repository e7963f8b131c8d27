//! The accept/reject decision for incoming `/pair` requests.
//!
//! In the desktop application the policy asks the user; the host binary and
//! the tests use one of the two fixed policies below.

use std::net::SocketAddr;

use async_trait::async_trait;
use peerlink_core::PeerId;

/// What the policy is told about a pairing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingCandidate {
    pub requester_id: PeerId,
    pub requester_name: String,
    /// Observed IP of the requester combined with its declared pairing port.
    pub requester_endpoint: SocketAddr,
    pub requester_fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingDecision {
    Accept,
    Reject { reason: String },
}

/// Decides whether to trust a peer that asked to pair.
///
/// The call may take as long as a human needs to answer a prompt; the pairing
/// server holds the HTTP request open until it returns.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PairingPolicy: Send + Sync {
    async fn decide(&self, candidate: &PairingCandidate) -> PairingDecision;
}

/// Accepts every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoAcceptPolicy;

#[async_trait]
impl PairingPolicy for AutoAcceptPolicy {
    async fn decide(&self, _candidate: &PairingCandidate) -> PairingDecision {
        PairingDecision::Accept
    }
}

/// Rejects every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAllPolicy;

#[async_trait]
impl PairingPolicy for RejectAllPolicy {
    async fn decide(&self, _candidate: &PairingCandidate) -> PairingDecision {
        PairingDecision::Reject {
            reason: "pairing requests are not accepted".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn candidate() -> PairingCandidate {
        PairingCandidate {
            requester_id: Uuid::new_v4(),
            requester_name: "bob".to_string(),
            requester_endpoint: "10.0.0.2:47265".parse().unwrap(),
            requester_fingerprint: None,
        }
    }

    #[tokio::test]
    async fn test_auto_accept_policy_accepts() {
        assert_eq!(
            AutoAcceptPolicy.decide(&candidate()).await,
            PairingDecision::Accept
        );
    }

    #[tokio::test]
    async fn test_reject_all_policy_rejects() {
        assert!(matches!(
            RejectAllPolicy.decide(&candidate()).await,
            PairingDecision::Reject { .. }
        ));
    }
}

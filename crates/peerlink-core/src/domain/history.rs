//! Bounded connection history (audit log).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of entries kept by [`ConnectionHistory`].
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// The kind of action a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Discover,
    Pair,
    Auth,
    Disconnect,
    Unpair,
}

/// One audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHistoryEntry {
    pub peer_name: String,
    pub action: HistoryAction,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl ConnectionHistoryEntry {
    /// Creates an entry stamped with the current time.
    pub fn now(peer_name: impl Into<String>, action: HistoryAction, success: bool) -> Self {
        Self {
            peer_name: peer_name.into(),
            action,
            success,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only log that keeps the `capacity` most recent entries.
///
/// When full, pushing a new entry evicts the oldest one.
#[derive(Debug, Clone)]
pub struct ConnectionHistory {
    entries: VecDeque<ConnectionHistoryEntry>,
    capacity: usize,
}

impl Default for ConnectionHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ConnectionHistory {
    /// Creates an empty history.  A capacity of 0 is raised to 1.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: ConnectionHistoryEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Convenience wrapper around [`push`](Self::push).
    pub fn record(&mut self, peer_name: impl Into<String>, action: HistoryAction, success: bool) {
        self.push(ConnectionHistoryEntry::now(peer_name, action, success));
    }

    /// Snapshot of all entries, oldest first.
    pub fn entries(&self) -> Vec<ConnectionHistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

//! Remote replication target contract and in-process implementation.
//!
//! # Responsibility
//! - Define what the replicator needs from a remote document database.
//! - Provide `MemoryRemote` for tests and offline sessions.
//!
//! # Invariants
//! - `changes_since` returns documents ordered by the remote's own `seq`.
//! - `apply` keeps the winning revision per document and never regresses.

use crate::repo::document_repo::{revision_wins, DocKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;

/// One document revision as it travels between databases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedDoc {
    pub kind: DocKind,
    pub id: String,
    pub rev: String,
    pub deleted: bool,
    /// Position in the sending database's change feed.
    pub seq: i64,
    /// Full JSON document body.
    pub body: String,
}

/// Remote failure envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "remote error `{}`: {}", self.code, self.message)
    }
}

impl Error for RemoteError {}

/// Remote document database the journal replicates with.
pub trait RemoteTarget {
    /// Address used to key replication checkpoints.
    fn endpoint(&self) -> &str;
    /// Returns up to `limit` changes with `seq > since`.
    fn changes_since(&self, since: i64, limit: usize) -> Result<Vec<ReplicatedDoc>, RemoteError>;
    /// Stores incoming revisions and returns how many were accepted.
    fn apply(&self, docs: &[ReplicatedDoc]) -> Result<usize, RemoteError>;
}

#[derive(Default)]
struct MemoryRemoteState {
    docs: BTreeMap<(DocKind, String), ReplicatedDoc>,
    last_seq: i64,
    offline: bool,
}

/// In-process remote database.
pub struct MemoryRemote {
    endpoint: String,
    state: Mutex<MemoryRemoteState>,
}

impl MemoryRemote {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            state: Mutex::new(MemoryRemoteState::default()),
        }
    }

    /// Simulates losing the connection; every call fails while offline.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.offline = offline;
        }
    }

    /// Returns the current revision of one document.
    pub fn get(&self, kind: DocKind, id: &str) -> Option<ReplicatedDoc> {
        let state = self.state.lock().ok()?;
        state.docs.get(&(kind, id.to_string())).cloned()
    }

    /// Returns every stored document ordered by kind and id.
    pub fn documents(&self) -> Vec<ReplicatedDoc> {
        self.state
            .lock()
            .map(|state| state.docs.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock_online(&self) -> Result<std::sync::MutexGuard<'_, MemoryRemoteState>, RemoteError> {
        let state = self
            .state
            .lock()
            .map_err(|_| RemoteError::new("remote_poisoned", "remote state lock poisoned", false))?;
        if state.offline {
            return Err(RemoteError::new(
                "remote_unreachable",
                format!("{} is offline", self.endpoint),
                true,
            ));
        }
        Ok(state)
    }
}

impl RemoteTarget for MemoryRemote {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn changes_since(&self, since: i64, limit: usize) -> Result<Vec<ReplicatedDoc>, RemoteError> {
        let state = self.lock_online()?;
        let mut changes: Vec<ReplicatedDoc> = state
            .docs
            .values()
            .filter(|doc| doc.seq > since)
            .cloned()
            .collect();
        changes.sort_by_key(|doc| doc.seq);
        changes.truncate(limit);
        Ok(changes)
    }

    fn apply(&self, docs: &[ReplicatedDoc]) -> Result<usize, RemoteError> {
        let mut state = self.lock_online()?;
        let mut applied = 0;
        for doc in docs {
            let key = (doc.kind, doc.id.clone());
            let accept = match state.docs.get(&key) {
                None => true,
                Some(current) => revision_wins(&doc.rev, &current.rev),
            };
            if !accept {
                continue;
            }
            state.last_seq += 1;
            let mut stored = doc.clone();
            stored.seq = state.last_seq;
            state.docs.insert(key, stored);
            applied += 1;
        }
        Ok(applied)
    }
}

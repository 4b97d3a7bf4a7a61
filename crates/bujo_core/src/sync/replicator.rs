//! Change-feed replication between the local store and a remote target.
//!
//! # Responsibility
//! - Push local document revisions the remote has not seen yet.
//! - Pull remote revisions and merge them into the local store.
//! - Track progress per endpoint in `sync_checkpoints`.
//!
//! # Invariants
//! - A checkpoint only advances after its batch has been stored.
//! - Local merges keep the winning revision (higher generation, then larger
//!   token), so repeated syncs converge and are idempotent.

use crate::repo::document_repo::{
    next_seq, revision_wins, stored_revision, DocKind, RepoError, RepoResult,
};
use crate::sync::remote::{RemoteError, RemoteTarget, ReplicatedDoc};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DEFAULT_BATCH_SIZE: usize = 100;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug)]
pub enum SyncError {
    Repo(RepoError),
    Remote(RemoteError),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::Remote(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Remote(err) => Some(err),
        }
    }
}

impl From<RepoError> for SyncError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

impl From<RemoteError> for SyncError {
    fn from(value: RemoteError) -> Self {
        Self::Remote(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Push,
    Pull,
}

impl SyncDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

/// Outcome of one replication pass in one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationReport {
    pub direction: SyncDirection,
    /// Revisions read from the source feed.
    pub docs_read: usize,
    /// Revisions the destination accepted.
    pub docs_written: usize,
    /// Checkpoint after the pass.
    pub last_seq: i64,
}

/// Outcome of a push followed by a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub push: ReplicationReport,
    pub pull: ReplicationReport,
}

/// Replicates the local journal with one remote target.
pub struct Replicator<'a, R: RemoteTarget> {
    conn: &'a Connection,
    remote: &'a R,
    batch_size: usize,
}

impl<'a, R: RemoteTarget> Replicator<'a, R> {
    pub fn new(conn: &'a Connection, remote: &'a R) -> Self {
        Self {
            conn,
            remote,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets how many revisions travel per round trip (at least one).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sends local revisions newer than the push checkpoint.
    pub fn push(&self) -> SyncResult<ReplicationReport> {
        let endpoint = self.remote.endpoint();
        let mut report = ReplicationReport {
            direction: SyncDirection::Push,
            docs_read: 0,
            docs_written: 0,
            last_seq: load_checkpoint(self.conn, endpoint, SyncDirection::Push)?,
        };

        loop {
            let changes = local_changes_since(self.conn, report.last_seq, self.batch_size)?;
            let Some(last) = changes.last() else {
                break;
            };
            let last_seq = last.seq;

            let written = self.remote.apply(&changes).map_err(|err| {
                log_failure(SyncDirection::Push, endpoint, &err);
                err
            })?;
            store_checkpoint(self.conn, endpoint, SyncDirection::Push, last_seq)?;

            report.docs_read += changes.len();
            report.docs_written += written;
            report.last_seq = last_seq;
        }

        log_report(endpoint, &report);
        Ok(report)
    }

    /// Fetches remote revisions newer than the pull checkpoint and merges them.
    pub fn pull(&self) -> SyncResult<ReplicationReport> {
        let endpoint = self.remote.endpoint();
        let mut report = ReplicationReport {
            direction: SyncDirection::Pull,
            docs_read: 0,
            docs_written: 0,
            last_seq: load_checkpoint(self.conn, endpoint, SyncDirection::Pull)?,
        };

        loop {
            let changes = self
                .remote
                .changes_since(report.last_seq, self.batch_size)
                .map_err(|err| {
                    log_failure(SyncDirection::Pull, endpoint, &err);
                    err
                })?;
            let Some(last_seq) = changes.iter().map(|doc| doc.seq).max() else {
                break;
            };

            let tx = self.conn.unchecked_transaction()?;
            let mut written = 0;
            for doc in &changes {
                if merge_local(&tx, doc)? {
                    written += 1;
                }
            }
            store_checkpoint(&tx, endpoint, SyncDirection::Pull, last_seq)?;
            tx.commit()?;

            report.docs_read += changes.len();
            report.docs_written += written;
            report.last_seq = last_seq;
        }

        log_report(endpoint, &report);
        Ok(report)
    }

    /// Pushes, then pulls.
    pub fn sync(&self) -> SyncResult<SyncReport> {
        let push = self.push()?;
        let pull = self.pull()?;
        Ok(SyncReport { push, pull })
    }
}

/// Reads the local change feed after `since`.
pub fn local_changes_since(
    conn: &Connection,
    since: i64,
    limit: usize,
) -> RepoResult<Vec<ReplicatedDoc>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "SELECT doc_type, doc_id, rev, deleted, seq, body
         FROM documents
         WHERE seq > ?1
         ORDER BY seq ASC
         LIMIT ?2;",
    )?;
    let mut rows = stmt.query(params![since, limit])?;
    let mut changes = Vec::new();
    while let Some(row) = rows.next()? {
        let kind_text: String = row.get("doc_type")?;
        let kind = DocKind::parse(&kind_text).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid document type `{kind_text}`"))
        })?;
        changes.push(ReplicatedDoc {
            kind,
            id: row.get("doc_id")?,
            rev: row.get("rev")?,
            deleted: row.get::<_, i64>("deleted")? != 0,
            seq: row.get("seq")?,
            body: row.get("body")?,
        });
    }
    Ok(changes)
}

/// Stores an incoming revision when it beats the local one.
///
/// Returns whether the local store changed.
pub fn merge_local(conn: &Connection, doc: &ReplicatedDoc) -> RepoResult<bool> {
    if let Some(stored) = stored_revision(conn, doc.kind, &doc.id)? {
        if !revision_wins(&doc.rev, &stored.rev) {
            return Ok(false);
        }
    }

    let seq = next_seq(conn)?;
    conn.execute(
        "INSERT INTO documents (doc_type, doc_id, rev, deleted, seq, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (doc_type, doc_id) DO UPDATE SET
            rev = excluded.rev,
            deleted = excluded.deleted,
            seq = excluded.seq,
            body = excluded.body,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![
            doc.kind.as_str(),
            doc.id,
            doc.rev,
            i64::from(doc.deleted),
            seq,
            doc.body
        ],
    )?;
    Ok(true)
}

/// Returns the stored checkpoint for one endpoint and direction (0 if none).
pub fn load_checkpoint(
    conn: &Connection,
    endpoint: &str,
    direction: SyncDirection,
) -> RepoResult<i64> {
    let last_seq = conn
        .query_row(
            "SELECT last_seq FROM sync_checkpoints WHERE endpoint = ?1 AND direction = ?2;",
            params![endpoint, direction.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(last_seq.unwrap_or(0))
}

fn store_checkpoint(
    conn: &Connection,
    endpoint: &str,
    direction: SyncDirection,
    last_seq: i64,
) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO sync_checkpoints (endpoint, direction, last_seq)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (endpoint, direction) DO UPDATE SET
            last_seq = excluded.last_seq,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![endpoint, direction.as_str(), last_seq],
    )?;
    Ok(())
}

fn log_report(endpoint: &str, report: &ReplicationReport) {
    info!(
        "event=replication_{} module=sync status=ok endpoint={} docs_read={} docs_written={} last_seq={}",
        report.direction.as_str(),
        endpoint,
        report.docs_read,
        report.docs_written,
        report.last_seq
    );
}

fn log_failure(direction: SyncDirection, endpoint: &str, err: &RemoteError) {
    error!(
        "event=replication_{} module=sync status=error endpoint={} error_code={} retryable={}",
        direction.as_str(),
        endpoint,
        err.code,
        err.retryable
    );
}

//! Document store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist bullets and collections as revisioned JSON documents.
//! - Resolve related documents on `find` (collections ↔ bullets).
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Every write produces a new revision `<generation>-<32 hex>` and a new,
//!   strictly larger `seq`.
//! - A save must carry the current revision of the stored document, except
//!   when creating a document or re-creating a deleted one.
//! - Deletes leave tombstones so they can be replicated.

use crate::db::DbError;
use crate::model::bullet::{Bullet, BulletValidationError};
use crate::model::collection::Collection;
use log::error;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static REVISION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([1-9][0-9]*)-([0-9a-f]{32})$").expect("valid revision regex"));

pub type RepoResult<T> = Result<T, RepoError>;

/// Document category stored in `documents.doc_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocKind {
    Bullet,
    Collection,
}

impl DocKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bullet => "bullet",
            Self::Collection => "collection",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bullet" => Some(Self::Bullet),
            "collection" => Some(Self::Collection),
            _ => None,
        }
    }
}

impl Display for DocKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository error for document persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    Validation(BulletValidationError),
    NotFound { kind: DocKind, id: String },
    /// The caller's revision is not the stored one.
    Conflict {
        kind: DocKind,
        id: String,
        expected: Option<String>,
        actual: Option<String>,
    },
    /// A document without an id cannot be stored.
    MissingId(DocKind),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::Conflict {
                kind,
                id,
                expected,
                actual,
            } => write!(
                f,
                "{kind} `{id}` revision conflict: expected {}, stored {}",
                expected.as_deref().unwrap_or("<none>"),
                actual.as_deref().unwrap_or("<none>")
            ),
            Self::MissingId(kind) => write!(f, "{kind} has no id"),
            Self::InvalidData(message) => write!(f, "invalid stored document: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<BulletValidationError> for RepoError {
    fn from(value: BulletValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Primary documents plus their sideloaded relations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindResult {
    pub collections: Vec<Collection>,
    pub bullets: Vec<Bullet>,
}

/// Persistence adapter consumed by the journal service.
pub trait DocumentStore {
    /// Finds documents of `kind` (all when `id` is `None`) together with the
    /// live documents they reference.
    fn find(&self, kind: DocKind, id: Option<&str>) -> RepoResult<FindResult>;
    /// Creates or updates a bullet and returns its new revision.
    fn save_bullet(&self, bullet: &Bullet) -> RepoResult<String>;
    /// Creates or updates a collection (ids only) and returns its new revision.
    fn save_collection(&self, collection: &Collection) -> RepoResult<String>;
    /// Tombstones a live document.
    fn delete(&self, kind: DocKind, id: &str) -> RepoResult<()>;
    /// Runs `op` so that all of its writes land together or not at all.
    fn atomically<T, E, F>(&self, op: F) -> Result<T, E>
    where
        Self: Sized,
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RepoError>;
}

/// SQLite-backed document store.
pub struct SqliteDocumentStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDocumentStore<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Constructs a store after checking the connection carries the schema.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'documents'
            );",
            [],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::InvalidData(
                "connection is not migrated: `documents` table missing".to_string(),
            ));
        }
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    fn load_live<T>(
        &self,
        kind: DocKind,
        ids: Option<&[String]>,
        decode: fn(&Row<'_>) -> RepoResult<T>,
    ) -> RepoResult<Vec<T>> {
        let mut sql = String::from(
            "SELECT doc_id, rev, body FROM documents WHERE doc_type = ? AND deleted = 0",
        );
        let mut bind_values = vec![Value::Text(kind.as_str().to_string())];

        if let Some(ids) = ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(" AND doc_id IN (");
            sql.push_str(&vec!["?"; ids.len()].join(", "));
            sql.push(')');
            bind_values.extend(ids.iter().map(|id| Value::Text(id.clone())));
        }
        sql.push_str(" ORDER BY doc_id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(decode(row)?);
        }
        Ok(documents)
    }

    fn write_document(
        &self,
        kind: DocKind,
        id: &str,
        expected_rev: Option<&str>,
        body: serde_json::Value,
    ) -> RepoResult<String> {
        let stored = stored_revision(self.conn, kind, id)?;
        let base_rev = match (&stored, expected_rev) {
            (None, None) => None,
            (Some(stored), _) if stored.deleted => Some(stored.rev.as_str()),
            (Some(stored), Some(expected)) if stored.rev == expected => Some(stored.rev.as_str()),
            _ => {
                return Err(RepoError::Conflict {
                    kind,
                    id: id.to_string(),
                    expected: expected_rev.map(str::to_string),
                    actual: stored.as_ref().map(|stored| stored.rev.clone()),
                });
            }
        };

        let rev = next_revision(base_rev)?;
        let body = encode_body(body, id, &rev, false)?;
        let seq = next_seq(self.conn)?;
        self.conn.execute(
            "INSERT INTO documents (doc_type, doc_id, rev, deleted, seq, body)
             VALUES (?1, ?2, ?3, 0, ?4, ?5)
             ON CONFLICT (doc_type, doc_id) DO UPDATE SET
                rev = excluded.rev,
                deleted = 0,
                seq = excluded.seq,
                body = excluded.body,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![kind.as_str(), id, rev, seq, body],
        )?;

        Ok(rev)
    }
}

impl DocumentStore for SqliteDocumentStore<'_> {
    fn find(&self, kind: DocKind, id: Option<&str>) -> RepoResult<FindResult> {
        let requested = id.map(|id| vec![id.to_string()]);
        match kind {
            DocKind::Collection => {
                let collections =
                    self.load_live(kind, requested.as_deref(), decode_collection)?;
                let related: Vec<String> = collections
                    .iter()
                    .flat_map(Collection::bullet_ids)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let bullets = self.load_live(DocKind::Bullet, Some(&related), decode_bullet)?;
                Ok(FindResult {
                    collections,
                    bullets,
                })
            }
            DocKind::Bullet => {
                let bullets = self.load_live(kind, requested.as_deref(), decode_bullet)?;
                let related: Vec<String> = bullets
                    .iter()
                    .flat_map(|bullet| bullet.collections.iter().cloned())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let collections =
                    self.load_live(DocKind::Collection, Some(&related), decode_collection)?;
                Ok(FindResult {
                    collections,
                    bullets,
                })
            }
        }
    }

    fn save_bullet(&self, bullet: &Bullet) -> RepoResult<String> {
        bullet.validate()?;
        let id = bullet
            .id
            .as_deref()
            .ok_or(RepoError::MissingId(DocKind::Bullet))?;
        let body = serde_json::to_value(bullet)
            .map_err(|err| RepoError::InvalidData(format!("bullet `{id}`: {err}")))?;
        self.write_document(DocKind::Bullet, id, bullet.rev.as_deref(), body)
    }

    fn save_collection(&self, collection: &Collection) -> RepoResult<String> {
        if collection.id.is_empty() {
            return Err(RepoError::MissingId(DocKind::Collection));
        }
        let body = serde_json::to_value(collection.to_record()).map_err(|err| {
            RepoError::InvalidData(format!("collection `{}`: {err}", collection.id))
        })?;
        self.write_document(
            DocKind::Collection,
            &collection.id,
            collection.rev.as_deref(),
            body,
        )
    }

    fn delete(&self, kind: DocKind, id: &str) -> RepoResult<()> {
        let stored = match stored_revision(self.conn, kind, id)? {
            Some(stored) if !stored.deleted => stored,
            _ => {
                return Err(RepoError::NotFound {
                    kind,
                    id: id.to_string(),
                })
            }
        };

        let rev = next_revision(Some(&stored.rev))?;
        let body = encode_body(serde_json::json!({}), id, &rev, true)?;
        let seq = next_seq(self.conn)?;
        self.conn.execute(
            "UPDATE documents
             SET
                rev = ?3,
                deleted = 1,
                seq = ?4,
                body = ?5,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE doc_type = ?1 AND doc_id = ?2;",
            params![kind.as_str(), id, rev, seq, body],
        )?;
        Ok(())
    }

    fn atomically<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RepoError>,
    {
        // Savepoints nest, so atomic sections may call each other.
        self.conn
            .execute_batch("SAVEPOINT journal_write;")
            .map_err(RepoError::from)?;

        match op(self) {
            Ok(value) => {
                self.conn
                    .execute_batch("RELEASE SAVEPOINT journal_write;")
                    .map_err(RepoError::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.conn.execute_batch(
                    "ROLLBACK TO SAVEPOINT journal_write; RELEASE SAVEPOINT journal_write;",
                ) {
                    error!(
                        "event=store_rollback module=repo status=error error={}",
                        rollback_err
                    );
                }
                Err(err)
            }
        }
    }
}

/// Stored revision state of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredRevision {
    pub rev: String,
    pub deleted: bool,
}

pub(crate) fn stored_revision(
    conn: &Connection,
    kind: DocKind,
    id: &str,
) -> RepoResult<Option<StoredRevision>> {
    let stored = conn
        .query_row(
            "SELECT rev, deleted FROM documents WHERE doc_type = ?1 AND doc_id = ?2;",
            params![kind.as_str(), id],
            |row| {
                Ok(StoredRevision {
                    rev: row.get(0)?,
                    deleted: row.get::<_, i64>(1)? != 0,
                })
            },
        )
        .optional()?;
    Ok(stored)
}

/// Returns the next value of the database-wide write sequence.
pub(crate) fn next_seq(conn: &Connection) -> RepoResult<i64> {
    let seq = conn.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM documents;", [], |row| {
        row.get(0)
    })?;
    Ok(seq)
}

/// Splits a revision token into its generation number.
pub fn revision_generation(rev: &str) -> Option<u64> {
    REVISION_RE
        .captures(rev)
        .and_then(|captures| captures.get(1))
        .and_then(|generation| generation.as_str().parse().ok())
}

/// Returns whether `candidate` beats `current` under the winner rule:
/// higher generation wins, ties go to the larger token.
pub fn revision_wins(candidate: &str, current: &str) -> bool {
    let candidate_key = (revision_generation(candidate).unwrap_or(0), candidate);
    let current_key = (revision_generation(current).unwrap_or(0), current);
    candidate_key > current_key
}

fn next_revision(previous: Option<&str>) -> RepoResult<String> {
    let generation = match previous {
        None => 1,
        Some(rev) => {
            revision_generation(rev)
                .ok_or_else(|| RepoError::InvalidData(format!("malformed revision `{rev}`")))?
                + 1
        }
    };
    Ok(format!("{generation}-{}", Uuid::new_v4().simple()))
}

fn encode_body(
    mut body: serde_json::Value,
    id: &str,
    rev: &str,
    deleted: bool,
) -> RepoResult<String> {
    let object = body
        .as_object_mut()
        .ok_or_else(|| RepoError::InvalidData(format!("document `{id}` is not an object")))?;
    object.insert("id".to_string(), serde_json::Value::from(id));
    object.insert("rev".to_string(), serde_json::Value::from(rev));
    if deleted {
        object.insert("deleted".to_string(), serde_json::Value::Bool(true));
    }
    serde_json::to_string(&body).map_err(|err| RepoError::InvalidData(err.to_string()))
}

fn decode_bullet(row: &Row<'_>) -> RepoResult<Bullet> {
    let id: String = row.get("doc_id")?;
    let body: String = row.get("body")?;
    let mut bullet: Bullet = serde_json::from_str(&body)
        .map_err(|err| RepoError::InvalidData(format!("bullet `{id}`: {err}")))?;
    bullet.id = Some(id);
    bullet.rev = Some(row.get("rev")?);
    Ok(bullet)
}

fn decode_collection(row: &Row<'_>) -> RepoResult<Collection> {
    let id: String = row.get("doc_id")?;
    let body: String = row.get("body")?;
    let mut collection: Collection = serde_json::from_str(&body)
        .map_err(|err| RepoError::InvalidData(format!("collection `{id}`: {err}")))?;
    collection.id = id;
    collection.rev = Some(row.get("rev")?);
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::{revision_generation, revision_wins};

    #[test]
    fn parses_revision_generation() {
        assert_eq!(
            revision_generation("3-0123456789abcdef0123456789abcdef"),
            Some(3)
        );
        assert_eq!(revision_generation("0-0123456789abcdef0123456789abcdef"), None);
        assert_eq!(revision_generation("3-xyz"), None);
        assert_eq!(revision_generation("garbage"), None);
    }

    #[test]
    fn higher_generation_wins_then_larger_token() {
        let low = "2-ffffffffffffffffffffffffffffffff";
        let high = "10-00000000000000000000000000000000";
        assert!(revision_wins(high, low));
        assert!(!revision_wins(low, high));

        let a = "4-00000000000000000000000000000001";
        let b = "4-00000000000000000000000000000002";
        assert!(revision_wins(b, a));
        assert!(!revision_wins(a, b));
        assert!(!revision_wins(a, a));
    }
}

//! Core domain logic for the bullet journal.
//! This crate is the single source of truth for journal invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sync;

pub use config::{load_config, ConfigError, JournalConfig, LoggingConfig, SyncConfig};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use model::bullet::{Bullet, BulletEdit, BulletGlyph, BulletType, BulletValidationError};
pub use model::collection::{BulletSlot, Collection, CollectionProps, CollectionType};
pub use repo::document_repo::{
    DocKind, DocumentStore, FindResult, RepoError, RepoResult, SqliteDocumentStore,
};
pub use service::journal_service::{BulletFate, JournalError, JournalResult, JournalService};
pub use sync::remote::{MemoryRemote, RemoteError, RemoteTarget, ReplicatedDoc};
pub use sync::replicator::{ReplicationReport, Replicator, SyncError, SyncReport};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

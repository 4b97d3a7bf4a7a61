//! Repository layer: the persistence adapter behind the journal service.
//!
//! # Responsibility
//! - Define the `find`/`save`/`delete` contract by document kind.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Bullet writes enforce `Bullet::validate()` before persistence.
//! - Revision mismatches surface as `RepoError::Conflict`, never as silent
//!   overwrites.

pub mod document_repo;

//! Replication of the local journal to a remote document database.
//!
//! # Responsibility
//! - Exchange document revisions through change feeds in both directions.
//! - Resolve concurrent edits with a deterministic winner rule.
//!
//! # Invariants
//! - Transport is the remote target's concern; this module never opens
//!   network connections itself.

pub mod remote;
pub mod replicator;

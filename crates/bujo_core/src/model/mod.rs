//! Journal domain model: bullets and the collections that group them.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Keep pure, storage-free mutations next to the data they change.
//!
//! # Invariants
//! - Collection/Bullet membership is mirrored on both sides
//!   (`Collection::bullets` and `Bullet::collections`).
//! - Ids are timestamp-derived strings.

pub mod bullet;
pub mod collection;
pub mod id;

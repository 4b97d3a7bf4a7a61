//! Journal use-case service.
//!
//! # Responsibility
//! - Link, move and unlink bullets across collections.
//! - Persist both sides of every membership change together.
//! - Fetch and rehydrate collections, synthesizing missing ones on demand.
//!
//! # Invariants
//! - A bullet is listed by a collection iff the bullet lists that collection.
//! - Every multi-document change runs inside one store transaction; on error
//!   the caller's in-memory values are restored as well.
//! - A bullet that no collection references anymore is deleted, not saved.
//! - Only saved generic collections can be deleted.

use crate::model::bullet::{Bullet, BulletValidationError};
use crate::model::collection::{Collection, CollectionProps, CollectionType};
use crate::model::id::start_of_day;
use crate::repo::document_repo::{DocKind, DocumentStore, FindResult, RepoError};
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type JournalResult<T> = Result<T, JournalError>;

/// Service error for journal use-cases.
#[derive(Debug)]
pub enum JournalError {
    /// Persistence-layer failure.
    Repo(RepoError),
    /// Rejected bullet state.
    Validation(BulletValidationError),
    /// A collection lists a bullet that does not list the collection back.
    ///
    /// The mirrored membership lists are corrupt; callers must not retry.
    BrokenLink {
        collection_id: String,
        bullet_id: String,
    },
}

impl Display for JournalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::BrokenLink {
                collection_id,
                bullet_id,
            } => write!(
                f,
                "journal database is broken: collection `{collection_id}` lists bullet \
                 `{bullet_id}`, which does not list the collection back"
            ),
        }
    }
}

impl Error for JournalError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::BrokenLink { .. } => None,
        }
    }
}

impl From<RepoError> for JournalError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl From<BulletValidationError> for JournalError {
    fn from(value: BulletValidationError) -> Self {
        Self::Validation(value)
    }
}

/// What happened to a bullet when it was unlinked from a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulletFate {
    /// The collection did not list the bullet; nothing changed.
    NotMember,
    /// Other collections still reference the bullet; it was saved.
    Saved,
    /// That was its last collection; the bullet was deleted.
    Deleted,
}

/// Journal service facade over a document store.
pub struct JournalService<S: DocumentStore> {
    store: S,
}

impl<S: DocumentStore> JournalService<S> {
    /// Creates a service using the provided store implementation.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates or updates a bullet and records its new revision.
    ///
    /// A bullet without id gets one first.
    pub fn save_bullet(&self, bullet: &mut Bullet) -> JournalResult<()> {
        bullet.ensure_id();
        match self.store.save_bullet(bullet) {
            Ok(rev) => {
                debug!(
                    "event=bullet_save module=service status=ok bullet_id={} rev={}",
                    bullet.id.as_deref().unwrap_or("-"),
                    rev
                );
                bullet.rev = Some(rev);
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=bullet_save module=service status=error bullet_id={} error={}",
                    bullet.id.as_deref().unwrap_or("-"),
                    err
                );
                Err(err.into())
            }
        }
    }

    /// Deletes the stored bullet. Bullets that were never saved are a no-op.
    pub fn delete_bullet(&self, bullet: &mut Bullet) -> JournalResult<()> {
        let Some(bullet_id) = bullet.id.clone() else {
            return Ok(());
        };
        if bullet.rev.is_none() {
            return Ok(());
        }

        match self.store.delete(DocKind::Bullet, &bullet_id) {
            Ok(()) => {
                info!(
                    "event=bullet_delete module=service status=ok bullet_id={}",
                    bullet_id
                );
                bullet.rev = None;
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=bullet_delete module=service status=error bullet_id={} error={}",
                    bullet_id, err
                );
                Err(err.into())
            }
        }
    }

    /// Writes the id-only collection document.
    ///
    /// Rehydrated bullets stay in place on the live value; only `rev` changes.
    pub fn save_collection(&self, collection: &mut Collection) -> JournalResult<()> {
        match self.store.save_collection(collection) {
            Ok(rev) => {
                debug!(
                    "event=collection_save module=service status=ok collection_id={} bullets={} rev={}",
                    collection.id,
                    collection.bullets.len(),
                    rev
                );
                collection.rev = Some(rev);
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=collection_save module=service status=error collection_id={} error={}",
                    collection.id, err
                );
                Err(err.into())
            }
        }
    }

    /// Loads one live bullet by id.
    pub fn load_bullet(&self, bullet_id: &str) -> JournalResult<Option<Bullet>> {
        let result = self.store.find(DocKind::Bullet, Some(bullet_id))?;
        Ok(result
            .bullets
            .into_iter()
            .find(|bullet| bullet.id.as_deref() == Some(bullet_id)))
    }

    /// Links `bullet` into `collection` and persists both.
    ///
    /// # Contract
    /// - Assigns the bullet id when absent.
    /// - Back-fills `bullet.date` from a date-like collection title.
    /// - Repeated calls do not duplicate membership on either side.
    pub fn add_bullet(&self, collection: &mut Collection, bullet: &mut Bullet) -> JournalResult<()> {
        let snapshot = (collection.clone(), bullet.clone());
        let result = self.store.atomically(|_| -> JournalResult<()> {
            bullet.ensure_id();
            bullet.link_collection(&collection.id);
            backfill_date(collection, bullet);
            self.save_bullet(bullet)?;
            collection.upsert_loaded(bullet.clone());
            self.save_collection(collection)
        });
        restore_on_err(result, collection, bullet, snapshot)
    }

    /// Links a bullet moved in from elsewhere.
    ///
    /// Returns `false` without writing when the collection already lists the
    /// bullet. Moving onto a `month-cal` collection also links the bullet to
    /// the `day` collection of its date, creating that day when needed.
    pub fn add_moved_bullet(
        &self,
        collection: &mut Collection,
        bullet: &mut Bullet,
    ) -> JournalResult<bool> {
        let bullet_id = bullet.ensure_id().to_string();
        if collection.contains_bullet(&bullet_id) {
            debug!(
                "event=bullet_move module=service status=skipped reason=already_linked collection_id={} bullet_id={}",
                collection.id, bullet_id
            );
            return Ok(false);
        }

        let snapshot = (collection.clone(), bullet.clone());
        let result = self.store.atomically(|_| -> JournalResult<bool> {
            bullet.link_collection(&collection.id);
            backfill_date(collection, bullet);
            self.save_bullet(bullet)?;
            collection.upsert_loaded(bullet.clone());
            self.save_collection(collection)?;

            if collection.kind == CollectionType::MonthCal {
                self.link_calendar_day(bullet)?;
                collection.upsert_loaded(bullet.clone());
            }
            Ok(true)
        });
        restore_on_err(result, collection, bullet, snapshot)
    }

    /// Unlinks `bullet` from `collection` and saves the collection.
    ///
    /// # Errors
    /// - `JournalError::BrokenLink` when the collection lists the bullet but
    ///   the bullet does not list the collection. Nothing is written.
    pub fn remove_bullet(
        &self,
        collection: &mut Collection,
        bullet: &mut Bullet,
    ) -> JournalResult<BulletFate> {
        let snapshot = (collection.clone(), bullet.clone());
        let result = self.store.atomically(|_| -> JournalResult<BulletFate> {
            let fate = self.unlink(collection, bullet)?;
            self.save_collection(collection)?;
            Ok(fate)
        });
        restore_on_err(result, collection, bullet, snapshot)
    }

    /// Like [`JournalService::remove_bullet`] but leaves the collection
    /// document untouched; used while the collection itself is being deleted.
    pub fn remove_bullet_without_save(
        &self,
        collection: &mut Collection,
        bullet: &mut Bullet,
    ) -> JournalResult<BulletFate> {
        let snapshot = (collection.clone(), bullet.clone());
        let result = self
            .store
            .atomically(|_| -> JournalResult<BulletFate> { self.unlink(collection, bullet) });
        restore_on_err(result, collection, bullet, snapshot)
    }

    /// Deletes a saved generic collection, unlinking every member first.
    ///
    /// Returns `Ok(false)` without writing for unsaved or non-generic
    /// collections.
    pub fn delete_collection(&self, collection: &mut Collection) -> JournalResult<bool> {
        if !collection.is_saved() || collection.kind != CollectionType::Generic {
            debug!(
                "event=collection_delete module=service status=skipped collection_id={} type={} saved={}",
                collection.id,
                collection.kind,
                collection.is_saved()
            );
            return Ok(false);
        }

        let snapshot = collection.clone();
        let result = self.store.atomically(|_| -> JournalResult<bool> {
            for bullet_id in collection.bullet_ids() {
                // Stored copies carry the current revisions.
                let Some(mut bullet) = self.load_bullet(&bullet_id)? else {
                    warn!(
                        "event=bullet_pruned module=service status=ok collection_id={} bullet_id={}",
                        collection.id, bullet_id
                    );
                    collection.remove_slot(&bullet_id);
                    continue;
                };
                self.unlink(collection, &mut bullet)?;
            }
            self.store.delete(DocKind::Collection, &collection.id)?;
            collection.rev = None;
            Ok(true)
        });

        match &result {
            Ok(_) => info!(
                "event=collection_delete module=service status=ok collection_id={}",
                snapshot.id
            ),
            Err(err) => {
                error!(
                    "event=collection_delete module=service status=error collection_id={} error={}",
                    snapshot.id, err
                );
                *collection = snapshot;
            }
        }
        result
    }

    /// Replaces `collection` with its canonical stored state.
    pub fn update_collection(&self, collection: &mut Collection) -> JournalResult<()> {
        let props = CollectionProps::from(&*collection);
        if let Some(fresh) = self.find_or_return(&props)?.into_iter().next() {
            *collection = fresh;
        }
        Ok(())
    }

    /// Finds collections by `props.id` (all when unset) and rehydrates them.
    ///
    /// Falls back to one unsaved collection built from `props` when nothing
    /// is stored.
    pub fn find_or_return(&self, props: &CollectionProps) -> JournalResult<Vec<Collection>> {
        let mut result = self.store.find(DocKind::Collection, props.id.as_deref())?;
        if let Some(id) = props.id.as_deref() {
            if result.collections.len() > 1 {
                result.collections.retain(|collection| collection.id == id);
            }
        }

        let collections = self.rehydrate(result);
        if collections.is_empty() {
            return Ok(vec![Collection::from_props(props)]);
        }
        Ok(collections)
    }

    /// Fetches every collection, rehydrated, keeping those matching `props`.
    ///
    /// Falls back to one unsaved collection built from `props` when nothing
    /// matches.
    pub fn fetch_all(&self, props: Option<&CollectionProps>) -> JournalResult<Vec<Collection>> {
        let result = self.store.find(DocKind::Collection, None)?;
        let mut collections = self.rehydrate(result);
        if let Some(props) = props {
            collections.retain(|collection| props.matches(collection));
        }

        if collections.is_empty() {
            let fallback = props.cloned().unwrap_or_default();
            return Ok(vec![Collection::from_props(&fallback)]);
        }
        Ok(collections)
    }

    fn unlink(&self, collection: &mut Collection, bullet: &mut Bullet) -> JournalResult<BulletFate> {
        let Some(bullet_id) = bullet.id.clone() else {
            return Ok(BulletFate::NotMember);
        };
        if !collection.contains_bullet(&bullet_id) {
            return Ok(BulletFate::NotMember);
        }
        if !bullet.belongs_to(&collection.id) {
            error!(
                "event=broken_link module=service status=error collection_id={} bullet_id={}",
                collection.id, bullet_id
            );
            return Err(JournalError::BrokenLink {
                collection_id: collection.id.clone(),
                bullet_id,
            });
        }

        collection.remove_slot(&bullet_id);
        bullet.unlink_collection(&collection.id);
        if bullet.collections.is_empty() {
            self.delete_bullet(bullet)?;
            Ok(BulletFate::Deleted)
        } else {
            self.save_bullet(bullet)?;
            Ok(BulletFate::Saved)
        }
    }

    fn link_calendar_day(&self, bullet: &mut Bullet) -> JournalResult<()> {
        let Some(day_title) = bullet.date.as_deref().and_then(start_of_day) else {
            warn!(
                "event=calendar_link module=service status=skipped reason=no_date bullet_id={}",
                bullet.id.as_deref().unwrap_or("-")
            );
            return Ok(());
        };

        let props = CollectionProps::new()
            .title(day_title)
            .kind(CollectionType::Day);
        // A new day gets a generated id: month collections may be keyed by
        // the same start-of-day timestamp.
        let mut day = self
            .fetch_all(Some(&props))?
            .into_iter()
            .next()
            .unwrap_or_else(|| Collection::from_props(&props));
        self.add_moved_bullet(&mut day, bullet)?;
        Ok(())
    }

    /// Resolves member bullets and drops empty calendar collections.
    ///
    /// Calendar collections (every type but `generic`) are recreated on
    /// demand, so an empty one is deleted from storage instead of returned.
    fn rehydrate(&self, result: FindResult) -> Vec<Collection> {
        let FindResult {
            collections,
            bullets,
        } = result;

        let mut hydrated = Vec::with_capacity(collections.len());
        for mut collection in collections {
            if collection.is_empty_calendar() {
                match self.store.delete(DocKind::Collection, &collection.id) {
                    Ok(()) => info!(
                        "event=collection_prune module=service status=ok collection_id={} type={}",
                        collection.id, collection.kind
                    ),
                    Err(err) => warn!(
                        "event=collection_prune module=service status=error collection_id={} error={}",
                        collection.id, err
                    ),
                }
                continue;
            }
            collection.deserialize_bullets(&bullets);
            hydrated.push(collection);
        }
        hydrated
    }
}

fn backfill_date(collection: &Collection, bullet: &mut Bullet) {
    if bullet.date.is_none() && collection.title_date().is_some() {
        bullet.date = Some(collection.title.clone());
    }
}

fn restore_on_err<T>(
    result: JournalResult<T>,
    collection: &mut Collection,
    bullet: &mut Bullet,
    snapshot: (Collection, Bullet),
) -> JournalResult<T> {
    if result.is_err() {
        let (collection_before, bullet_before) = snapshot;
        *collection = collection_before;
        *bullet = bullet_before;
    }
    result
}

//! Collection domain model.
//!
//! # Responsibility
//! - Define named, ordered groupings of bullets (days, months, lists).
//! - Convert between the persisted id list and in-memory bullet values.
//!
//! # Invariants
//! - The persisted shape stores bullet ids only.
//! - A collection lists each bullet at most once.
//! - Unresolvable bullet ids are pruned when rehydrating.

use crate::model::bullet::Bullet;
use crate::model::id::{generate_id, parse_date_title};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Collection category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollectionType {
    Day,
    Month,
    /// Calendar view of a month; bullets moved here also land on their day.
    MonthCal,
    Future,
    /// User-created list.
    Generic,
}

impl CollectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Month => "month",
            Self::MonthCal => "month-cal",
            Self::Future => "future",
            Self::Generic => "generic",
        }
    }
}

impl Display for CollectionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of `Collection::bullets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulletSlot {
    /// Persisted reference.
    Id(String),
    /// Rehydrated bullet.
    Loaded(Bullet),
}

impl BulletSlot {
    /// Returns the referenced bullet id, if the slot has one.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Id(id) => Some(id.as_str()),
            Self::Loaded(bullet) => bullet.id.as_deref(),
        }
    }

    pub fn as_bullet(&self) -> Option<&Bullet> {
        match self {
            Self::Id(_) => None,
            Self::Loaded(bullet) => Some(bullet),
        }
    }
}

/// Lookup/synthesis attributes for collections.
///
/// Unset attributes match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionProps {
    pub id: Option<String>,
    pub title: Option<String>,
    pub kind: Option<CollectionType>,
}

impl CollectionProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn kind(mut self, kind: CollectionType) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Returns whether every set attribute equals the collection's value.
    pub fn matches(&self, collection: &Collection) -> bool {
        self.id.as_deref().map_or(true, |id| collection.id == id)
            && self
                .title
                .as_deref()
                .map_or(true, |title| collection.title == title)
            && self.kind.map_or(true, |kind| collection.kind == kind)
    }
}

impl From<&Collection> for CollectionProps {
    fn from(value: &Collection) -> Self {
        Self {
            id: Some(value.id.clone()),
            title: Some(value.title.clone()),
            kind: Some(value.kind),
        }
    }
}

/// Persisted collection document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub kind: CollectionType,
    #[serde(default)]
    pub bullets: Vec<String>,
}

/// A named, ordered grouping of bullets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "CollectionRecord", from = "CollectionRecord")]
pub struct Collection {
    pub id: String,
    /// Revision token of the stored document; `None` until first save.
    pub rev: Option<String>,
    pub title: String,
    pub kind: CollectionType,
    pub bullets: Vec<BulletSlot>,
}

impl Collection {
    /// Creates an unsaved, empty collection with a generated id.
    pub fn new(title: impl Into<String>, kind: CollectionType) -> Self {
        Self {
            id: generate_id(),
            rev: None,
            title: title.into(),
            kind,
            bullets: Vec::new(),
        }
    }

    pub fn generic(title: impl Into<String>) -> Self {
        Self::new(title, CollectionType::Generic)
    }

    /// Synthesizes an unsaved collection from lookup attributes.
    ///
    /// Missing id is generated, missing title falls back to the id, and
    /// missing type means `generic`.
    pub fn from_props(props: &CollectionProps) -> Self {
        let id = props.id.clone().unwrap_or_else(generate_id);
        let title = props.title.clone().unwrap_or_else(|| id.clone());
        Self {
            id,
            rev: None,
            title,
            kind: props.kind.unwrap_or(CollectionType::Generic),
            bullets: Vec::new(),
        }
    }

    /// Returns whether this collection has been persisted.
    pub fn is_saved(&self) -> bool {
        self.rev.is_some()
    }

    /// Returns whether this is an empty generic collection, which a user
    /// may delete without losing bullets.
    pub fn is_deletion_eligible(&self) -> bool {
        self.kind == CollectionType::Generic && self.bullets.is_empty()
    }

    /// Returns whether this is a calendar collection (any type but
    /// `generic`) without bullets. Those are recreated on demand.
    pub fn is_empty_calendar(&self) -> bool {
        self.kind != CollectionType::Generic && self.bullets.is_empty()
    }

    /// Returns the title as a date when it denotes one.
    pub fn title_date(&self) -> Option<DateTime<Utc>> {
        parse_date_title(&self.title)
    }

    /// Resolves stored ids against `pool`.
    ///
    /// Ids missing from the pool are dropped from the list and logged.
    /// Already loaded slots are kept as they are.
    pub fn deserialize_bullets(&mut self, pool: &[Bullet]) -> &mut Self {
        let collection_id = self.id.clone();
        self.bullets = std::mem::take(&mut self.bullets)
            .into_iter()
            .filter_map(|slot| {
                let bullet_id = match slot {
                    BulletSlot::Loaded(bullet) => return Some(BulletSlot::Loaded(bullet)),
                    BulletSlot::Id(bullet_id) => bullet_id,
                };
                match pool
                    .iter()
                    .find(|bullet| bullet.id.as_deref() == Some(bullet_id.as_str()))
                {
                    Some(bullet) => Some(BulletSlot::Loaded(bullet.clone())),
                    None => {
                        warn!(
                            "event=bullet_pruned module=model status=ok collection_id={} bullet_id={}",
                            collection_id, bullet_id
                        );
                        None
                    }
                }
            })
            .collect();
        self
    }

    /// Converts every slot to its bare id.
    ///
    /// Loaded bullets without an id have nothing to persist and are dropped.
    pub fn serialize_bullets(&mut self) -> &mut Self {
        self.bullets = std::mem::take(&mut self.bullets)
            .into_iter()
            .filter_map(|slot| match slot {
                BulletSlot::Id(id) => Some(BulletSlot::Id(id)),
                BulletSlot::Loaded(bullet) => bullet.id.map(BulletSlot::Id),
            })
            .collect();
        self
    }

    /// Returns the persisted id list.
    pub fn bullet_ids(&self) -> Vec<String> {
        self.bullets
            .iter()
            .filter_map(|slot| slot.id().map(str::to_string))
            .collect()
    }

    /// Iterates over rehydrated bullets.
    pub fn loaded_bullets(&self) -> impl Iterator<Item = &Bullet> {
        self.bullets.iter().filter_map(BulletSlot::as_bullet)
    }

    pub fn contains_bullet(&self, bullet_id: &str) -> bool {
        self.position_of(bullet_id).is_some()
    }

    pub fn position_of(&self, bullet_id: &str) -> Option<usize> {
        self.bullets
            .iter()
            .position(|slot| slot.id() == Some(bullet_id))
    }

    /// Stores `bullet` in its slot, appending a slot when it is not listed yet.
    pub fn upsert_loaded(&mut self, bullet: Bullet) {
        let position = bullet
            .id
            .as_deref()
            .and_then(|bullet_id| self.position_of(bullet_id));
        match position {
            Some(index) => self.bullets[index] = BulletSlot::Loaded(bullet),
            None => self.bullets.push(BulletSlot::Loaded(bullet)),
        }
    }

    /// Removes the slot for `bullet_id`. Returns `false` when it was not listed.
    pub fn remove_slot(&mut self, bullet_id: &str) -> bool {
        match self.position_of(bullet_id) {
            Some(index) => {
                self.bullets.remove(index);
                true
            }
            None => false,
        }
    }

    /// Builds the id-only document written to storage.
    pub fn to_record(&self) -> CollectionRecord {
        CollectionRecord {
            id: self.id.clone(),
            rev: self.rev.clone(),
            title: self.title.clone(),
            kind: self.kind,
            bullets: self.bullet_ids(),
        }
    }
}

impl From<CollectionRecord> for Collection {
    fn from(value: CollectionRecord) -> Self {
        Self {
            id: value.id,
            rev: value.rev,
            title: value.title,
            kind: value.kind,
            bullets: value.bullets.into_iter().map(BulletSlot::Id).collect(),
        }
    }
}

impl From<Collection> for CollectionRecord {
    fn from(value: Collection) -> Self {
        value.to_record()
    }
}

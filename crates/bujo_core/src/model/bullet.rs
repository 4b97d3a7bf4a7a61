//! Bullet domain model.
//!
//! # Responsibility
//! - Define the single journal entry record (task, event, note).
//! - Provide the type-transition function and the done/strike toggles.
//!
//! # Invariants
//! - `done` may only be `true` when `kind == BulletType::Task`.
//! - `collections` never holds the same collection id twice.
//! - Re-typing keeps `id`, `rev`, `text`, `date` and `collections`.

use crate::model::id::generate_id;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Journal entry variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BulletType {
    /// Actionable item that can be marked done.
    Task,
    /// Something that happens on a date.
    Event,
    /// Free-form note.
    Note,
}

impl BulletType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "Task",
            Self::Event => "Event",
            Self::Note => "Note",
        }
    }
}

impl Display for BulletType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display label of a bullet. `Done` is derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulletGlyph {
    Task,
    Event,
    Note,
    Done,
}

/// Edit commands a front end can apply to a bullet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulletEdit {
    MakeTask,
    MakeEvent,
    MakeNote,
    ToggleDone,
    ToggleStrike,
}

/// Rejected bullet mutation or invalid bullet state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulletValidationError {
    /// `toggle_done` was called on a bullet that is not a task.
    NotATask { kind: BulletType },
    /// A non-task bullet carries `done = true`.
    DoneOnNonTask { kind: BulletType },
    /// `collections` lists the same collection more than once.
    DuplicateCollection(String),
}

impl Display for BulletValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotATask { kind } => write!(f, "only tasks can be marked done, got {kind}"),
            Self::DoneOnNonTask { kind } => write!(f, "{kind} bullet cannot be done"),
            Self::DuplicateCollection(id) => {
                write!(f, "bullet references collection `{id}` more than once")
            }
        }
    }
}

impl Error for BulletValidationError {}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bullet {
    /// Timestamp-derived id; assigned when first linked to a collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Revision token of the stored document; `None` until first save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "type")]
    pub kind: BulletType,
    #[serde(default)]
    pub text: String,
    /// Calendar date the entry belongs to, usually a collection title.
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub struck: bool,
    /// Ids of every collection that lists this bullet.
    #[serde(default)]
    pub collections: Vec<String>,
}

impl Bullet {
    /// Creates an unsaved, unlinked bullet without an id.
    pub fn new(kind: BulletType, text: impl Into<String>) -> Self {
        Self {
            id: None,
            rev: None,
            kind,
            text: text.into(),
            date: None,
            done: false,
            struck: false,
            collections: Vec::new(),
        }
    }

    pub fn task(text: impl Into<String>) -> Self {
        Self::new(BulletType::Task, text)
    }

    pub fn event(text: impl Into<String>) -> Self {
        Self::new(BulletType::Event, text)
    }

    pub fn note(text: impl Into<String>) -> Self {
        Self::new(BulletType::Note, text)
    }

    /// Returns the display label, mapping finished tasks to `Done`.
    pub fn glyph(&self) -> BulletGlyph {
        match self.kind {
            BulletType::Task if self.done => BulletGlyph::Done,
            BulletType::Task => BulletGlyph::Task,
            BulletType::Event => BulletGlyph::Event,
            BulletType::Note => BulletGlyph::Note,
        }
    }

    /// Changes the bullet type in place.
    ///
    /// Shared fields survive; `done` and `struck` start over as `false`.
    pub fn retype(&mut self, kind: BulletType) {
        self.kind = kind;
        self.done = false;
        self.struck = false;
    }

    /// Consuming form of [`Bullet::retype`].
    pub fn into_kind(mut self, kind: BulletType) -> Self {
        self.retype(kind);
        self
    }

    /// Flips `done`. Only tasks can be done; other types are left untouched.
    pub fn toggle_done(&mut self) -> Result<(), BulletValidationError> {
        if self.kind != BulletType::Task {
            return Err(BulletValidationError::NotATask { kind: self.kind });
        }
        self.done = !self.done;
        Ok(())
    }

    pub fn toggle_strike(&mut self) {
        self.struck = !self.struck;
    }

    /// Applies one edit command.
    ///
    /// `ToggleDone` on a non-task is ignored, matching how front ends only
    /// offer it for tasks.
    pub fn apply_edit(&mut self, edit: BulletEdit) {
        match edit {
            BulletEdit::MakeTask => self.retype(BulletType::Task),
            BulletEdit::MakeEvent => self.retype(BulletType::Event),
            BulletEdit::MakeNote => self.retype(BulletType::Note),
            BulletEdit::ToggleDone if self.kind == BulletType::Task => self.done = !self.done,
            BulletEdit::ToggleDone => {}
            BulletEdit::ToggleStrike => self.toggle_strike(),
        }
    }

    /// Assigns a generated id when absent and returns the id.
    pub fn ensure_id(&mut self) -> &str {
        self.id.get_or_insert_with(generate_id).as_str()
    }

    /// Returns whether this bullet claims membership in `collection_id`.
    pub fn belongs_to(&self, collection_id: &str) -> bool {
        self.collections.iter().any(|id| id == collection_id)
    }

    /// Records membership in a collection. Returns `false` when already linked.
    pub fn link_collection(&mut self, collection_id: &str) -> bool {
        if self.belongs_to(collection_id) {
            return false;
        }
        self.collections.push(collection_id.to_string());
        true
    }

    /// Drops membership in a collection. Returns `false` when it was not linked.
    pub fn unlink_collection(&mut self, collection_id: &str) -> bool {
        let before = self.collections.len();
        self.collections.retain(|id| id != collection_id);
        self.collections.len() != before
    }

    /// Checks state invariants before persistence.
    pub fn validate(&self) -> Result<(), BulletValidationError> {
        if self.done && self.kind != BulletType::Task {
            return Err(BulletValidationError::DoneOnNonTask { kind: self.kind });
        }
        for (index, id) in self.collections.iter().enumerate() {
            if self.collections[..index].contains(id) {
                return Err(BulletValidationError::DuplicateCollection(id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Bullet, BulletEdit, BulletGlyph, BulletType, BulletValidationError};

    #[test]
    fn retype_preserves_shared_fields_and_resets_flags() {
        let mut bullet = Bullet::task("call plumber");
        bullet.id = Some("2024-01-01T10:00:00.000Z".to_string());
        bullet.rev = Some("1-abc".to_string());
        bullet.date = Some("2024-01-01".to_string());
        bullet.collections.push("inbox".to_string());
        bullet.toggle_done().unwrap();
        bullet.toggle_strike();

        let event = bullet.clone().into_kind(BulletType::Event);
        assert_eq!(event.kind, BulletType::Event);
        assert_eq!(event.id, bullet.id);
        assert_eq!(event.rev, bullet.rev);
        assert_eq!(event.text, "call plumber");
        assert_eq!(event.date, bullet.date);
        assert_eq!(event.collections, vec!["inbox".to_string()]);
        assert!(!event.done);
        assert!(!event.struck);
    }

    #[test]
    fn toggle_done_only_applies_to_tasks() {
        let mut task = Bullet::task("ship it");
        task.toggle_done().unwrap();
        assert!(task.done);
        assert_eq!(task.glyph(), BulletGlyph::Done);
        task.toggle_done().unwrap();
        assert!(!task.done);

        let mut note = Bullet::note("idea");
        let err = note.toggle_done().unwrap_err();
        assert_eq!(
            err,
            BulletValidationError::NotATask {
                kind: BulletType::Note
            }
        );
        assert!(!note.done);
    }

    #[test]
    fn toggle_strike_applies_to_every_type() {
        for mut bullet in [Bullet::task("a"), Bullet::event("b"), Bullet::note("c")] {
            bullet.toggle_strike();
            assert!(bullet.struck);
        }
    }

    #[test]
    fn apply_edit_ignores_done_toggle_on_events() {
        let mut bullet = Bullet::event("standup");
        bullet.apply_edit(BulletEdit::ToggleDone);
        assert!(!bullet.done);

        bullet.apply_edit(BulletEdit::MakeTask);
        bullet.apply_edit(BulletEdit::ToggleDone);
        assert_eq!(bullet.glyph(), BulletGlyph::Done);
        bullet.apply_edit(BulletEdit::ToggleDone);
        assert_eq!(bullet.glyph(), BulletGlyph::Task);

        let mut note = Bullet::note("idea");
        note.apply_edit(BulletEdit::ToggleDone);
        assert!(!note.done);
        assert!(note.validate().is_ok());
    }

    #[test]
    fn ensure_id_is_stable_once_assigned() {
        let mut bullet = Bullet::note("n");
        let first = bullet.ensure_id().to_string();
        let second = bullet.ensure_id().to_string();
        assert_eq!(first, second);
    }

    #[test]
    fn link_and_unlink_keep_set_semantics() {
        let mut bullet = Bullet::note("n");
        assert!(bullet.link_collection("a"));
        assert!(!bullet.link_collection("a"));
        assert!(bullet.link_collection("b"));
        assert_eq!(bullet.collections, vec!["a".to_string(), "b".to_string()]);
        assert!(bullet.unlink_collection("a"));
        assert!(!bullet.unlink_collection("a"));
        assert_eq!(bullet.collections, vec!["b".to_string()]);
    }

    #[test]
    fn validate_rejects_done_notes_and_duplicate_links() {
        let mut note = Bullet::note("n");
        note.done = true;
        assert!(matches!(
            note.validate(),
            Err(BulletValidationError::DoneOnNonTask { .. })
        ));

        let mut task = Bullet::task("t");
        task.collections = vec!["a".to_string(), "a".to_string()];
        assert_eq!(
            task.validate(),
            Err(BulletValidationError::DuplicateCollection("a".to_string()))
        );
    }

    #[test]
    fn serializes_type_under_type_key() {
        let bullet = Bullet::task("buy milk");
        let value = serde_json::to_value(&bullet).unwrap();
        assert_eq!(value["type"], "Task");
        assert!(value.get("id").is_none());
        assert_eq!(value["collections"], serde_json::json!([]));
    }
}

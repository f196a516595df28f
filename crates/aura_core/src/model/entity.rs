//! Entity domain model.
//!
//! # Responsibility
//! - Define the canonical record shared by list/task/note/reminder/idea
//!   projections.
//! - Provide lifecycle helpers for soft-delete and completion state.
//!
//! # Invariants
//! - `uuid` is stable and never reused for another entity.
//! - `meta.deleted` is the source of truth for tombstone state.
//! - A child's `owner` always equals its parent's `owner`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for every persisted entity.
///
/// Kept as a type alias to make semantic intent explicit in signatures.
pub type EntityId = Uuid;

/// Owning user identifier, as assigned by the messaging transport.
pub type OwnerId = i64;

/// Unified category for all entity projections.
///
/// One physical table stores every kind; business logic receives a typed
/// view instead of interpreting raw metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Container of tasks.
    List,
    /// Actionable item under a list.
    Task,
    /// Free-form text record.
    Note,
    /// Time-sensitive record.
    Reminder,
    /// Unstructured capture.
    Idea,
}

impl EntityKind {
    /// Stable database tag for this kind.
    pub fn as_db(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Task => "task",
            Self::Note => "note",
            Self::Reminder => "reminder",
            Self::Idea => "idea",
        }
    }

    /// Parses a database tag back into a kind.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "list" => Some(Self::List),
            "task" => Some(Self::Task),
            "note" => Some(Self::Note),
            "reminder" => Some(Self::Reminder),
            "idea" => Some(Self::Idea),
            _ => None,
        }
    }

    /// All kinds, in stable order.
    pub fn all() -> [Self; 5] {
        [Self::List, Self::Task, Self::Note, Self::Reminder, Self::Idea]
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db())
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Typed view over the open-ended metadata column.
///
/// Fields the core interprets are lifted into typed booleans; everything
/// else round-trips unchanged through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityMeta {
    /// Task completion flag.
    #[serde(default, skip_serializing_if = "is_false")]
    pub done: bool,
    /// Soft-delete tombstone.
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    /// Uninterpreted attributes preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EntityMeta {
    /// Parses the persisted JSON column. `None`/blank parses to default.
    pub fn from_column(value: Option<&str>) -> Option<Self> {
        match value {
            None => Some(Self::default()),
            Some(text) if text.trim().is_empty() => Some(Self::default()),
            Some(text) => serde_json::from_str(text).ok(),
        }
    }

    /// Serializes for the JSON column. Empty metadata persists as NULL.
    pub fn to_column(&self) -> Option<String> {
        if *self == Self::default() {
            return None;
        }
        serde_json::to_string(self).ok()
    }
}

/// Canonical persisted record for every supported kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable global ID used for linking and auditing.
    pub uuid: EntityId,
    /// Owning user. Immutable after create.
    pub owner: OwnerId,
    /// Serialized as `kind` in snapshots, `kind` column in storage.
    pub kind: EntityKind,
    /// Display name. Required for lists and tasks.
    pub title: Option<String>,
    /// Free text body.
    pub content: Option<String>,
    /// Optional container reference. Same-owner scoping, not ownership.
    pub parent_uuid: Option<EntityId>,
    /// Typed metadata view.
    pub meta: EntityMeta,
    /// Epoch ms, store-assigned, immutable.
    pub created_at: i64,
    /// Epoch ms, maintained by the store on every mutation.
    pub updated_at: i64,
}

impl Entity {
    /// Marks this entity as softly deleted (tombstoned).
    pub fn soft_delete(&mut self) {
        self.meta.deleted = true;
    }

    /// Clears the soft-delete flag.
    pub fn restore(&mut self) {
        self.meta.deleted = false;
    }

    /// Returns whether this entity should be considered visible/active.
    pub fn is_active(&self) -> bool {
        !self.meta.deleted
    }

    /// Returns whether this entity is a completed task.
    pub fn is_done(&self) -> bool {
        self.meta.done
    }
}

/// Validation failures for a record about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityValidationError {
    /// Title is required for this kind but missing.
    MissingTitle(EntityKind),
    /// Title is present but blank after trimming.
    BlankTitle,
}

impl Display for EntityValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTitle(kind) => write!(f, "entity kind `{kind}` requires a title"),
            Self::BlankTitle => write!(f, "entity title must not be blank"),
        }
    }
}

impl Error for EntityValidationError {}

/// Request model for creating one entity.
///
/// The store assigns `uuid` and timestamps; callers never supply them.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub owner: OwnerId,
    pub kind: EntityKind,
    pub title: Option<String>,
    pub content: Option<String>,
    pub parent_uuid: Option<EntityId>,
    pub meta: EntityMeta,
}

impl NewEntity {
    /// Builds a root-level list record.
    pub fn list(owner: OwnerId, title: impl Into<String>) -> Self {
        Self {
            owner,
            kind: EntityKind::List,
            title: Some(title.into()),
            content: None,
            parent_uuid: None,
            meta: EntityMeta::default(),
        }
    }

    /// Builds a task record under one container.
    pub fn task(owner: OwnerId, title: impl Into<String>, parent_uuid: EntityId) -> Self {
        Self {
            owner,
            kind: EntityKind::Task,
            title: Some(title.into()),
            content: None,
            parent_uuid: Some(parent_uuid),
            meta: EntityMeta::default(),
        }
    }

    /// Validates shape before persistence.
    ///
    /// # Invariants
    /// - Lists and tasks must carry a title.
    /// - A present title must be non-blank after trimming.
    pub fn validate(&self) -> Result<(), EntityValidationError> {
        match &self.title {
            Some(title) if title.trim().is_empty() => Err(EntityValidationError::BlankTitle),
            Some(_) => Ok(()),
            None => match self.kind {
                EntityKind::List | EntityKind::Task => {
                    Err(EntityValidationError::MissingTitle(self.kind))
                }
                _ => Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityKind, EntityMeta, EntityValidationError, NewEntity};

    #[test]
    fn meta_round_trips_extra_fields() {
        let meta = EntityMeta::from_column(Some(r#"{"done":true,"priority":"high"}"#)).unwrap();
        assert!(meta.done);
        assert!(!meta.deleted);
        assert_eq!(
            meta.extra.get("priority").and_then(|v| v.as_str()),
            Some("high")
        );

        let column = meta.to_column().unwrap();
        let reparsed = EntityMeta::from_column(Some(&column)).unwrap();
        assert_eq!(reparsed, meta);
    }

    #[test]
    fn default_meta_persists_as_null() {
        assert_eq!(EntityMeta::default().to_column(), None);
        assert_eq!(EntityMeta::from_column(None), Some(EntityMeta::default()));
    }

    #[test]
    fn list_requires_title() {
        let mut record = NewEntity::list(7, "Покупки");
        record.validate().unwrap();

        record.title = None;
        assert_eq!(
            record.validate().unwrap_err(),
            EntityValidationError::MissingTitle(EntityKind::List)
        );

        record.title = Some("   ".to_string());
        assert_eq!(
            record.validate().unwrap_err(),
            EntityValidationError::BlankTitle
        );
    }
}

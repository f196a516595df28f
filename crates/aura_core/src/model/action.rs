//! Typed action vocabulary and conversation context.
//!
//! # Responsibility
//! - Define the closed set of intents the router can apply.
//! - Define the caller-supplied conversation context shape.
//!
//! # Invariants
//! - Actions are transient: extracted per utterance, consumed exactly
//!   once by resolution, never persisted.
//! - String fields are already trimmed and non-blank when an `Action`
//!   exists (the schema validator enforces this).

use crate::model::entity::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One user-intent unit, as produced by the schema validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Create a list, optionally seeding tasks into it.
    Create { list: String, tasks: Vec<String> },
    /// Add one or more tasks to a list.
    AddTask { list: String, tasks: Vec<String> },
    /// Show the active tasks of one list.
    ShowTasks { list: String },
    /// Show all active lists.
    ShowLists,
    /// Show every active task across lists.
    ShowAllTasks,
    /// Mark one task as completed. A missing `list` falls back to the
    /// most recently referenced list from the conversation context.
    MarkDone { list: Option<String>, title: String },
    /// Replace a task's title.
    UpdateTask {
        list: String,
        title: String,
        new_title: String,
    },
    /// Soft-delete one task.
    DeleteTask { list: String, title: String },
    /// Soft-delete one list.
    DeleteList { list: String },
    /// Restore a soft-deleted task into its list.
    RestoreTask { list: String, title: String },
    /// Move a task from one list to another.
    MoveEntity {
        title: String,
        from_list: String,
        to_list: String,
    },
    /// Rename a list.
    RenameList { list: String, new_title: String },
    /// Search active tasks by title containment.
    SearchEntity { pattern: String },
    /// Ask the user a follow-up question. Carries no store mutation.
    Clarify {
        question: String,
        pending: Option<String>,
    },
    /// Plain conversational reply. Carries no store mutation.
    Say { text: String },
}

impl Action {
    /// Wire-format name of this action kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::AddTask { .. } => "add_task",
            Self::ShowTasks { .. } => "show_tasks",
            Self::ShowLists => "show_lists",
            Self::ShowAllTasks => "show_all_tasks",
            Self::MarkDone { .. } => "mark_done",
            Self::UpdateTask { .. } => "update_task",
            Self::DeleteTask { .. } => "delete_task",
            Self::DeleteList { .. } => "delete_list",
            Self::RestoreTask { .. } => "restore_task",
            Self::MoveEntity { .. } => "move_entity",
            Self::RenameList { .. } => "rename_list",
            Self::SearchEntity { .. } => "search_entity",
            Self::Clarify { .. } => "clarify",
            Self::Say { .. } => "say",
        }
    }

    /// Whether applying this action mutates the entity store.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Self::ShowTasks { .. }
                | Self::ShowLists
                | Self::ShowAllTasks
                | Self::SearchEntity { .. }
                | Self::Clarify { .. }
                | Self::Say { .. }
        )
    }
}

/// Per-owner conversation context, supplied fresh by the caller on every
/// invocation.
///
/// The core never reads ambient session state; a restart upstream may
/// legitimately hand in an empty context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Most recently referenced list title, if any.
    pub last_list: Option<String>,
    /// Short rolling history of prior user turns, oldest first.
    pub history: Vec<String>,
    /// Active entity counts per kind (the user's entity summary).
    pub kind_counts: BTreeMap<EntityKind, u64>,
}

impl ConversationContext {
    /// Compact JSON used inside the model prompt.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

//! Candidate-payload validator for the closed action vocabulary.
//!
//! # Responsibility
//! - Enforce per-kind required fields and string hygiene.
//! - Reject unknown action kinds loudly so prompt regressions are
//!   diagnosable from logs.
//!
//! # Invariants
//! - Every string reaching an `Action` is trimmed and non-blank.
//! - Unknown kinds are an error, never silently dropped.

use crate::model::action::Action;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Structural validation failures for one candidate payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Payload is not a JSON object.
    NotAnObject,
    /// `action` names a kind outside the closed vocabulary.
    UnknownAction(String),
    /// A required field is absent.
    MissingField {
        action: &'static str,
        field: &'static str,
    },
    /// A required field is present but blank after trimming.
    EmptyField {
        action: &'static str,
        field: &'static str,
    },
    /// A field has the wrong JSON type.
    InvalidField {
        action: &'static str,
        field: &'static str,
        expected: &'static str,
    },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "action payload must be a JSON object"),
            Self::UnknownAction(name) => write!(f, "unknown action kind `{name}`"),
            Self::MissingField { action, field } => {
                write!(f, "action `{action}` requires field `{field}`")
            }
            Self::EmptyField { action, field } => {
                write!(f, "action `{action}` field `{field}` is blank")
            }
            Self::InvalidField {
                action,
                field,
                expected,
            } => write!(
                f,
                "action `{action}` field `{field}` must be {expected}"
            ),
        }
    }
}

impl Error for SchemaError {}

/// Validates one candidate payload into a typed `Action`.
///
/// # Contract
/// - Accepts the kind under `action` (preferred) or `kind`.
/// - Trims every string field; blank required fields fail with
///   `EmptyField` naming the field.
/// - Performs no store access.
pub fn validate_payload(payload: &Value) -> SchemaResult<Action> {
    let obj = payload.as_object().ok_or(SchemaError::NotAnObject)?;

    let kind = obj
        .get("action")
        .or_else(|| obj.get("kind"))
        .and_then(Value::as_str)
        .map(|value| value.trim().to_lowercase())
        .ok_or(SchemaError::MissingField {
            action: "?",
            field: "action",
        })?;

    match kind.as_str() {
        "create" => Ok(Action::Create {
            list: require_str(obj, "create", "list")?,
            tasks: optional_str_list(obj, "create", "tasks")?,
        }),
        "add_task" => Ok(Action::AddTask {
            list: require_str(obj, "add_task", "list")?,
            tasks: require_str_list(obj, "add_task", "tasks")?,
        }),
        "show_tasks" => Ok(Action::ShowTasks {
            list: require_str(obj, "show_tasks", "list")?,
        }),
        "show_lists" => Ok(Action::ShowLists),
        "show_all_tasks" => Ok(Action::ShowAllTasks),
        "mark_done" => Ok(Action::MarkDone {
            list: optional_str(obj, "mark_done", "list")?,
            title: require_str(obj, "mark_done", "title")?,
        }),
        "update_task" => Ok(Action::UpdateTask {
            list: require_str(obj, "update_task", "list")?,
            title: require_str(obj, "update_task", "title")?,
            new_title: require_str_or_meta(obj, "update_task", "new_title")?,
        }),
        "delete_task" => Ok(Action::DeleteTask {
            list: require_str(obj, "delete_task", "list")?,
            title: require_str(obj, "delete_task", "title")?,
        }),
        "delete_list" => Ok(Action::DeleteList {
            list: require_str(obj, "delete_list", "list")?,
        }),
        "restore_task" => Ok(Action::RestoreTask {
            list: require_str(obj, "restore_task", "list")?,
            title: require_str(obj, "restore_task", "title")?,
        }),
        "move_entity" => Ok(Action::MoveEntity {
            title: require_str(obj, "move_entity", "title")?,
            from_list: require_str(obj, "move_entity", "list")?,
            to_list: require_str(obj, "move_entity", "to_list")?,
        }),
        "rename_list" => Ok(Action::RenameList {
            list: require_str(obj, "rename_list", "list")?,
            new_title: require_str(obj, "rename_list", "title")?,
        }),
        "search_entity" => Ok(Action::SearchEntity {
            pattern: require_str_or_meta(obj, "search_entity", "pattern")?,
        }),
        "clarify" => Ok(Action::Clarify {
            question: require_str_or_meta(obj, "clarify", "question")?,
            pending: optional_meta_str(obj, "clarify", "pending")?,
        }),
        "say" => Ok(Action::Say {
            text: require_str(obj, "say", "text")?,
        }),
        other => Err(SchemaError::UnknownAction(other.to_string())),
    }
}

fn field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get(name).filter(|value| !value.is_null())
}

fn meta_field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get("meta")
        .and_then(Value::as_object)
        .and_then(|meta| meta.get(name))
        .filter(|value| !value.is_null())
}

fn str_value(
    value: &Value,
    action: &'static str,
    name: &'static str,
) -> SchemaResult<String> {
    let text = value.as_str().ok_or(SchemaError::InvalidField {
        action,
        field: name,
        expected: "a string",
    })?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SchemaError::EmptyField {
            action,
            field: name,
        });
    }
    Ok(trimmed.to_string())
}

fn require_str(
    obj: &Map<String, Value>,
    action: &'static str,
    name: &'static str,
) -> SchemaResult<String> {
    let value = field(obj, name).ok_or(SchemaError::MissingField {
        action,
        field: name,
    })?;
    str_value(value, action, name)
}

/// Looks up a required string at top level first, then under `meta`.
/// The model emits `new_title`, `question`, `pattern` and `pending` in
/// either place depending on the prompt example it followed.
fn require_str_or_meta(
    obj: &Map<String, Value>,
    action: &'static str,
    name: &'static str,
) -> SchemaResult<String> {
    let value = field(obj, name)
        .or_else(|| meta_field(obj, name))
        .ok_or(SchemaError::MissingField {
            action,
            field: name,
        })?;
    str_value(value, action, name)
}

fn optional_str(
    obj: &Map<String, Value>,
    action: &'static str,
    name: &'static str,
) -> SchemaResult<Option<String>> {
    match field(obj, name) {
        None => Ok(None),
        Some(value) => str_value(value, action, name).map(Some),
    }
}

fn optional_meta_str(
    obj: &Map<String, Value>,
    action: &'static str,
    name: &'static str,
) -> SchemaResult<Option<String>> {
    match field(obj, name).or_else(|| meta_field(obj, name)) {
        None => Ok(None),
        Some(value) => str_value(value, action, name).map(Some),
    }
}

fn str_list_value(
    value: &Value,
    action: &'static str,
    name: &'static str,
) -> SchemaResult<Vec<String>> {
    let items = match value {
        // A single string counts as a one-element list.
        Value::String(_) => std::slice::from_ref(value),
        Value::Array(items) => items.as_slice(),
        _ => {
            return Err(SchemaError::InvalidField {
                action,
                field: name,
                expected: "a string or an array of strings",
            });
        }
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let text = item.as_str().ok_or(SchemaError::InvalidField {
            action,
            field: name,
            expected: "a string or an array of strings",
        })?;
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
    }

    if out.is_empty() {
        return Err(SchemaError::EmptyField {
            action,
            field: name,
        });
    }
    Ok(out)
}

fn require_str_list(
    obj: &Map<String, Value>,
    action: &'static str,
    name: &'static str,
) -> SchemaResult<Vec<String>> {
    let value = field(obj, name).ok_or(SchemaError::MissingField {
        action,
        field: name,
    })?;
    str_list_value(value, action, name)
}

fn optional_str_list(
    obj: &Map<String, Value>,
    action: &'static str,
    name: &'static str,
) -> SchemaResult<Vec<String>> {
    match field(obj, name) {
        None => Ok(Vec::new()),
        Some(value) => str_list_value(value, action, name),
    }
}

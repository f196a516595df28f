//! Tolerant JSON extraction from free-form model output.
//!
//! # Responsibility
//! - Find balanced top-level JSON object spans in raw text and parse each
//!   span independently.
//! - Normalize wrapper shapes and synonym action names into flat
//!   candidate payloads.
//!
//! # Invariants
//! - Extraction order matches order of appearance in the raw text.
//! - One malformed span never aborts extraction of its neighbors.

use log::warn;
use serde_json::{Map, Value};

/// Action-name synonyms the model is known to emit, mapped to canonical
/// vocabulary names. Recovered from production model transcripts.
const ACTION_SYNONYMS: &[(&str, &str)] = &[
    ("add_note", "add_task"),
    ("add_notes", "add_task"),
    ("add_reminder", "add_task"),
    ("add_reminders", "add_task"),
    ("create_note", "add_task"),
    ("create_notes", "add_task"),
    ("create_reminder", "add_task"),
    ("create_reminders", "add_task"),
    ("complete_note", "mark_done"),
    ("complete_notes", "mark_done"),
    ("complete_reminder", "mark_done"),
    ("complete_reminders", "mark_done"),
    ("finish_note", "mark_done"),
    ("finish_reminder", "mark_done"),
    ("delete_note", "delete_task"),
    ("delete_notes", "delete_task"),
    ("delete_reminder", "delete_task"),
    ("delete_reminders", "delete_task"),
    ("remove_note", "delete_task"),
    ("remove_reminder", "delete_task"),
    ("restore_note", "restore_task"),
    ("restore_notes", "restore_task"),
    ("restore_reminder", "restore_task"),
    ("restore_reminders", "restore_task"),
    ("update_note", "update_task"),
    ("update_reminder", "update_task"),
    ("move_note", "move_entity"),
    ("move_reminder", "move_entity"),
    ("show_notes", "show_tasks"),
    ("show_reminders", "show_tasks"),
    ("list_notes", "show_tasks"),
    ("list_reminders", "show_tasks"),
];

/// Extracts every syntactically valid top-level JSON object from raw
/// model text, in order of appearance.
///
/// # Contract
/// - A response that parses whole as a JSON array contributes its object
///   elements in order; a whole-response object contributes itself.
/// - Otherwise the text is scanned for balanced `{...}` spans (string
///   literals and escapes respected); spans that fail to parse are
///   skipped with a warning, never aborting the scan.
pub fn extract_json_objects(raw: &str) -> Vec<Map<String, Value>> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        match value {
            Value::Object(obj) => return vec![obj],
            Value::Array(items) => {
                let objects: Vec<Map<String, Value>> = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(obj) => Some(obj),
                        _ => None,
                    })
                    .collect();
                if !objects.is_empty() {
                    return objects;
                }
            }
            _ => {}
        }
    }

    let mut out = Vec::new();
    for span in balanced_object_spans(raw) {
        match serde_json::from_str::<Value>(span) {
            Ok(Value::Object(obj)) => out.push(obj),
            Ok(_) => {}
            Err(err) => {
                warn!(
                    "event=json_extract module=interpreter status=skip error={} span_len={}",
                    err,
                    span.len()
                );
            }
        }
    }
    out
}

/// Yields each balanced top-level `{...}` span of `text`.
///
/// The scanner tracks JSON string literals and escape sequences so braces
/// inside strings do not affect nesting depth. An unterminated span at
/// end of input is dropped.
fn balanced_object_spans(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (index, &byte) in bytes.iter().enumerate() {
        if start.is_none() {
            if byte == b'{' {
                start = Some(index);
                depth = 1;
                in_string = false;
                escaped = false;
            }
            continue;
        }

        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let begin = start.take().unwrap_or(index);
                    spans.push(&text[begin..=index]);
                }
            }
            _ => {}
        }
    }

    spans
}

/// Flattens wrapper shapes and canonicalizes action names.
///
/// # Contract
/// - `{"actions": [...], "ui_text": "..."}` contributes its inner
///   objects in order, then a trailing `say` action for a non-blank
///   `ui_text`.
/// - Action names are lowercased; known synonyms map to canonical kinds
///   so the validator sees a stable vocabulary.
pub fn normalize_payloads(objects: Vec<Map<String, Value>>) -> Vec<Value> {
    let mut out = Vec::new();
    for obj in objects {
        if let Some(Value::Array(inner)) = obj.get("actions") {
            for item in inner {
                if let Value::Object(inner_obj) = item {
                    out.push(Value::Object(canonicalize(inner_obj.clone())));
                }
            }
            if let Some(ui_text) = obj.get("ui_text").and_then(Value::as_str) {
                let trimmed = ui_text.trim();
                if !trimmed.is_empty() {
                    let mut say = Map::new();
                    say.insert("action".to_string(), Value::String("say".to_string()));
                    say.insert("text".to_string(), Value::String(trimmed.to_string()));
                    out.push(Value::Object(say));
                }
            }
            continue;
        }
        out.push(Value::Object(canonicalize(obj)));
    }
    out
}

fn canonicalize(mut obj: Map<String, Value>) -> Map<String, Value> {
    let name = obj
        .get("action")
        .or_else(|| obj.get("kind"))
        .and_then(Value::as_str)
        .map(|value| value.trim().to_lowercase());

    if let Some(name) = name {
        let canonical = ACTION_SYNONYMS
            .iter()
            .find(|(synonym, _)| *synonym == name)
            .map(|(_, target)| (*target).to_string())
            .unwrap_or(name);
        obj.insert("action".to_string(), Value::String(canonical));
    }
    obj
}

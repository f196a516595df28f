//! Semantic interpreter: utterance plus context to candidate payloads.
//!
//! # Responsibility
//! - Drive exactly one model completion per utterance (one bounded
//!   retry on transport failure only).
//! - Extract ordered candidate action payloads from free-form output.
//!
//! # Invariants
//! - Conversation context is supplied by the caller on every call; this
//!   component holds no per-owner state.
//! - Zero extractable payloads is a recoverable outcome, not a crash.

pub mod extract;
pub mod provider;

use crate::model::action::ConversationContext;
use extract::{extract_json_objects, normalize_payloads};
use log::{info, warn};
use provider::{ModelProvider, ProviderError};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

const MAX_RAW_LOG_CHARS: usize = 400;

pub type InterpretResult<T> = Result<T, InterpretError>;

/// Interpretation failures.
#[derive(Debug)]
pub enum InterpretError {
    /// The model endpoint could not be reached or answered with an
    /// error. Transient; surfaced to the user as "try again".
    ModelUnavailable(String),
    /// The model answered, but no JSON payload was extractable. Carries
    /// the raw text so the caller can degrade to a conversational reply.
    NoExtractableAction { raw: String },
}

impl Display for InterpretError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelUnavailable(message) => write!(f, "model unavailable: {message}"),
            Self::NoExtractableAction { .. } => {
                write!(f, "model output carries no extractable action")
            }
        }
    }
}

impl Error for InterpretError {}

/// System prompt skeleton. The placeholder is replaced with the
/// caller-supplied conversation context as compact JSON.
const SYSTEM_PROMPT: &str = "\
You are the action planner of a personal assistant that manages the \
user's lists, tasks, notes, reminders and ideas. Answer with one JSON \
object per intended action (or a JSON array of objects), and nothing \
that is not JSON. Each object carries an `action` field with one of: \
create, add_task, show_tasks, show_lists, show_all_tasks, mark_done, \
update_task, delete_task, delete_list, restore_task, move_entity, \
rename_list, search_entity, clarify, say. Use `list`, `title`, `tasks`, \
`to_list`, `new_title`, `pattern`, `question`, `text` fields as \
appropriate. Keep titles in the user's language. When several tasks are \
completed in one message, emit one mark_done object per task, wrapped \
as {\"actions\": [...], \"ui_text\": \"...\"}. If the request is \
small talk, answer with a `say` action; if it is unclear, answer with \
a `clarify` action. Conversation context: ";

/// Semantic interpreter over a pluggable model provider.
pub struct Interpreter<P: ModelProvider> {
    provider: P,
}

impl<P: ModelProvider> Interpreter<P> {
    /// Creates an interpreter using the provided completion backend.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Interprets one utterance into ordered candidate payloads.
    ///
    /// # Contract
    /// - Invokes the model once; a single retry is attempted only on
    ///   transport-level failure, never on endpoint errors.
    /// - Returns payloads in their order of appearance in the raw
    ///   output.
    pub fn interpret(
        &self,
        utterance: &str,
        context: &ConversationContext,
    ) -> InterpretResult<Vec<Value>> {
        let system_prompt = format!("{SYSTEM_PROMPT}{}", context.to_prompt_json());

        let raw = match self.provider.complete(&system_prompt, utterance) {
            Ok(raw) => raw,
            Err(ProviderError::Transport(first)) => {
                warn!(
                    "event=model_call module=interpreter status=retry provider={} error={}",
                    self.provider.name(),
                    first
                );
                self.provider
                    .complete(&system_prompt, utterance)
                    .map_err(|err| InterpretError::ModelUnavailable(err.to_string()))?
            }
            Err(err @ ProviderError::Api(_)) => {
                return Err(InterpretError::ModelUnavailable(err.to_string()));
            }
        };

        info!(
            "event=model_call module=interpreter status=ok provider={} raw_len={} raw_head={}",
            self.provider.name(),
            raw.len(),
            sanitize_for_log(&raw)
        );

        let payloads = normalize_payloads(extract_json_objects(&raw));
        if payloads.is_empty() {
            return Err(InterpretError::NoExtractableAction { raw });
        }
        Ok(payloads)
    }
}

fn sanitize_for_log(value: &str) -> String {
    let normalized = value.replace(['\n', '\r'], " ");
    let mut truncated = normalized.chars().take(MAX_RAW_LOG_CHARS).collect::<String>();
    if normalized.chars().count() > MAX_RAW_LOG_CHARS {
        truncated.push_str("...");
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::provider::{ModelProvider, ProviderError};
    use super::{InterpretError, Interpreter};
    use crate::model::action::ConversationContext;
    use std::cell::RefCell;

    struct ScriptedProvider {
        responses: RefCell<Vec<Result<String, ProviderError>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                responses: RefCell::new(responses),
            }
        }
    }

    impl ModelProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn complete(&self, _system: &str, _utterance: &str) -> Result<String, ProviderError> {
            self.responses.borrow_mut().remove(0)
        }
    }

    #[test]
    fn transport_failure_is_retried_once() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Transport("connect timed out".to_string())),
            Ok(r#"{"action":"say","text":"привет"}"#.to_string()),
        ]);
        let interpreter = Interpreter::new(provider);

        let payloads = interpreter
            .interpret("привет", &ConversationContext::default())
            .unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["action"], "say");
    }

    #[test]
    fn second_transport_failure_is_model_unavailable() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::Transport("reset".to_string())),
            Err(ProviderError::Transport("reset".to_string())),
        ]);
        let interpreter = Interpreter::new(provider);

        let err = interpreter
            .interpret("привет", &ConversationContext::default())
            .unwrap_err();
        assert!(matches!(err, InterpretError::ModelUnavailable(_)));
    }

    #[test]
    fn endpoint_failure_is_not_retried() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Api(
            "rate limited".to_string(),
        ))]);
        let interpreter = Interpreter::new(provider);

        let err = interpreter
            .interpret("привет", &ConversationContext::default())
            .unwrap_err();
        assert!(matches!(err, InterpretError::ModelUnavailable(_)));
    }

    #[test]
    fn prose_only_answer_degrades_to_no_extractable_action() {
        let provider =
            ScriptedProvider::new(vec![Ok("Конечно, сейчас помогу!".to_string())]);
        let interpreter = Interpreter::new(provider);

        let err = interpreter
            .interpret("помоги", &ConversationContext::default())
            .unwrap_err();
        assert!(
            matches!(err, InterpretError::NoExtractableAction { raw } if raw.contains("помогу"))
        );
    }
}

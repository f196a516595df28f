//! Semantic router: utterance to committed mutations.
//!
//! # Responsibility
//! - Drive the full pipeline: interpret, validate, resolve, apply.
//! - Produce a structured per-action report the presentation layer can
//!   render without re-querying business logic.
//!
//! # Invariants
//! - Validation and resolution failures are recovered locally into
//!   report entries; only model unavailability and storage transport
//!   failures abort the utterance.
//! - Store-level constraint violations surface verbatim as nameable
//!   report entries, never as a generic crash.

use crate::action::schema::validate_payload;
use crate::interpreter::provider::ModelProvider;
use crate::interpreter::{InterpretError, Interpreter};
use crate::model::action::{Action, ConversationContext};
use crate::model::entity::{Entity, EntityId, EntityKind, NewEntity, OwnerId};
use crate::repo::entity_repo::{
    ConstraintViolation, EntityRepository, FieldChanges, RepoError,
};
use crate::resolve::{ContainerTarget, ResolutionEngine, ResolutionOutcome, ResolvedAction};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RouterResult<T> = Result<T, RouterError>;

/// Failures that abort the whole utterance.
#[derive(Debug)]
pub enum RouterError {
    /// Upstream model dependency failure. Transient; the user is asked
    /// to try again.
    ModelUnavailable(String),
    /// Storage transport failure outside the error taxonomy the report
    /// carries.
    Store(RepoError),
}

impl Display for RouterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelUnavailable(message) => write!(f, "model unavailable: {message}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RouterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ModelUnavailable(_) => None,
            Self::Store(err) => Some(err),
        }
    }
}

impl From<RepoError> for RouterError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

/// What happened to one entity while applying an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Created,
    Updated,
    Done,
    SoftDeleted,
    Restored,
    Moved,
}

/// Before/after snapshot of one changed entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityChange {
    pub op: ChangeOp,
    pub before: Option<Entity>,
    pub after: Option<Entity>,
}

/// Sibling state handed to the presentation layer for recap display.
#[derive(Debug, Clone, PartialEq)]
pub enum Recap {
    /// Remaining active lists.
    Lists(Vec<Entity>),
    /// One container and its active tasks.
    Tasks { list: Entity, tasks: Vec<Entity> },
    /// (container title, task) pairs across lists.
    TaskMatches(Vec<(String, Entity)>),
    /// Nothing to recap.
    None,
}

/// Outcome of one action, in presentation-ready form.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Mutation committed.
    Applied {
        changed: Vec<EntityChange>,
        recap: Recap,
    },
    /// Query answered.
    Listing(Recap),
    /// The action asks the user a follow-up question.
    Clarification {
        question: String,
        pending: Option<String>,
    },
    /// Plain conversational reply.
    Reply { text: String },
    /// More than one entity matched a reference.
    Ambiguous {
        reference: String,
        kind: EntityKind,
        candidates: Vec<Entity>,
    },
    /// No entity matched a reference.
    NotFound {
        reference: String,
        kind: EntityKind,
    },
    /// The store rejected the mutation; nothing was applied.
    Rejected { violation: ConstraintViolation },
    /// The move would make the entity its own ancestor.
    CycleRejected {
        entity: EntityId,
        destination: EntityId,
    },
    /// The payload failed schema validation. The user sees a generic
    /// misunderstanding reply; the detail is for diagnostics.
    Invalid { detail: String },
}

/// One report entry per extracted action, in extraction order.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionReport {
    /// Wire-format action kind, or `invalid` for unvalidatable payloads.
    pub kind: String,
    pub outcome: ActionOutcome,
}

/// Structured handoff for the presentation collaborator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteReport {
    pub outcomes: Vec<ActionReport>,
}

impl RouteReport {
    /// Container title most recently touched by an applied or listed
    /// action, for the caller's `last_list` context maintenance.
    pub fn last_list(&self) -> Option<&str> {
        self.outcomes.iter().rev().find_map(|report| {
            let recap = match &report.outcome {
                ActionOutcome::Applied { recap, .. } => recap,
                ActionOutcome::Listing(recap) => recap,
                _ => return None,
            };
            match recap {
                Recap::Tasks { list, .. } => list.title.as_deref(),
                _ => None,
            }
        })
    }
}

/// Utterance-level orchestration facade.
pub struct SemanticRouter<'repo, R: EntityRepository, P: ModelProvider> {
    repo: &'repo R,
    interpreter: Interpreter<P>,
}

impl<'repo, R: EntityRepository, P: ModelProvider> SemanticRouter<'repo, R, P> {
    /// Creates a router over one store and one interpreter.
    pub fn new(repo: &'repo R, interpreter: Interpreter<P>) -> Self {
        Self { repo, interpreter }
    }

    /// Routes one utterance end to end.
    ///
    /// # Contract
    /// - Each extracted payload is validated, resolved and applied
    ///   independently; a failing payload never blocks its successors.
    /// - A model answer with no extractable JSON degrades to a single
    ///   `say` reply carrying the raw text.
    pub fn route(
        &self,
        utterance: &str,
        owner: OwnerId,
        context: &ConversationContext,
    ) -> RouterResult<RouteReport> {
        let payloads = match self.interpreter.interpret(utterance, context) {
            Ok(payloads) => payloads,
            Err(InterpretError::ModelUnavailable(message)) => {
                return Err(RouterError::ModelUnavailable(message));
            }
            Err(InterpretError::NoExtractableAction { raw }) => {
                info!(
                    "event=route module=router status=fallback owner={owner} reason=no_extractable_action"
                );
                return Ok(RouteReport {
                    outcomes: vec![ActionReport {
                        kind: "say".to_string(),
                        outcome: ActionOutcome::Reply {
                            text: raw.trim().to_string(),
                        },
                    }],
                });
            }
        };

        let mut outcomes = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            match validate_payload(payload) {
                Ok(action) => {
                    let kind = action.kind_name().to_string();
                    let outcome = self.apply(&action, owner, context)?;
                    info!(
                        "event=route_action module=router status=ok owner={owner} action={kind}"
                    );
                    outcomes.push(ActionReport { kind, outcome });
                }
                Err(err) => {
                    warn!(
                        "event=route_action module=router status=invalid owner={owner} error={err}"
                    );
                    outcomes.push(ActionReport {
                        kind: "invalid".to_string(),
                        outcome: ActionOutcome::Invalid {
                            detail: err.to_string(),
                        },
                    });
                }
            }
        }

        Ok(RouteReport { outcomes })
    }

    fn apply(
        &self,
        action: &Action,
        owner: OwnerId,
        context: &ConversationContext,
    ) -> RouterResult<ActionOutcome> {
        let engine = ResolutionEngine::new(self.repo);
        match engine.resolve(action, owner, context)? {
            ResolutionOutcome::Resolved(resolved) => self.apply_resolved(resolved, owner),
            ResolutionOutcome::AmbiguousMatch {
                reference,
                kind,
                candidates,
            } => Ok(ActionOutcome::Ambiguous {
                reference,
                kind,
                candidates,
            }),
            ResolutionOutcome::NotFound { reference, kind } => {
                Ok(ActionOutcome::NotFound { reference, kind })
            }
            ResolutionOutcome::ClarificationNeeded(Action::Clarify { question, pending }) => {
                Ok(ActionOutcome::Clarification { question, pending })
            }
            ResolutionOutcome::ClarificationNeeded(Action::Say { text }) => {
                Ok(ActionOutcome::Reply { text })
            }
            ResolutionOutcome::ClarificationNeeded(other) => Ok(ActionOutcome::Invalid {
                detail: format!(
                    "action `{}` resolved as conversational unexpectedly",
                    other.kind_name()
                ),
            }),
            ResolutionOutcome::CycleRejected {
                entity,
                destination,
            } => Ok(ActionOutcome::CycleRejected {
                entity,
                destination,
            }),
        }
    }

    fn apply_resolved(
        &self,
        resolved: ResolvedAction,
        owner: OwnerId,
    ) -> RouterResult<ActionOutcome> {
        match resolved {
            ResolvedAction::Create { title, tasks } => {
                let list = match self.repo.create(&NewEntity::list(owner, title)) {
                    Ok(list) => list,
                    Err(err) => return recovered(err, EntityKind::List),
                };
                let mut changed = vec![created(&list)];
                changed.extend(self.seed_tasks(owner, &list, &tasks)?);
                let recap = if tasks.is_empty() {
                    Recap::Lists(self.repo.list_roots(owner, EntityKind::List)?)
                } else {
                    self.tasks_recap(owner, list)?
                };
                Ok(ActionOutcome::Applied { changed, recap })
            }
            ResolvedAction::AddTask { list, tasks } => {
                let mut changed = Vec::new();
                let container = match list {
                    ContainerTarget::Existing(entity) => entity,
                    ContainerTarget::CreateMissing(title) => {
                        match self.repo.create(&NewEntity::list(owner, title.as_str())) {
                            Ok(entity) => {
                                changed.push(created(&entity));
                                entity
                            }
                            // A concurrent writer may have created the
                            // list between resolution and now.
                            Err(RepoError::Constraint(ConstraintViolation::DuplicateTitle {
                                ..
                            })) => self
                                .repo
                                .get(owner, EntityKind::List, &title, None)?
                                .ok_or(RouterError::Store(RepoError::Constraint(
                                    ConstraintViolation::DuplicateTitle {
                                        kind: EntityKind::List,
                                        title,
                                    },
                                )))?,
                            Err(err) => return recovered(err, EntityKind::List),
                        }
                    }
                };

                changed.extend(self.seed_tasks(owner, &container, &tasks)?);
                if changed.is_empty() {
                    return Ok(ActionOutcome::Rejected {
                        violation: ConstraintViolation::DuplicateTitle {
                            kind: EntityKind::Task,
                            title: tasks.first().cloned().unwrap_or_default(),
                        },
                    });
                }
                let recap = self.tasks_recap(owner, container)?;
                Ok(ActionOutcome::Applied { changed, recap })
            }
            ResolvedAction::ShowTasks { list } => {
                Ok(ActionOutcome::Listing(self.tasks_recap(owner, list)?))
            }
            ResolvedAction::ShowLists => Ok(ActionOutcome::Listing(Recap::Lists(
                self.repo.list_roots(owner, EntityKind::List)?,
            ))),
            ResolvedAction::ShowAllTasks => {
                let mut matches = Vec::new();
                for list in self.repo.list_roots(owner, EntityKind::List)? {
                    let container_title = list.title.clone().unwrap_or_default();
                    for task in self.repo.list_children(list.uuid, owner, false)? {
                        if task.kind == EntityKind::Task {
                            matches.push((container_title.clone(), task));
                        }
                    }
                }
                Ok(ActionOutcome::Listing(Recap::TaskMatches(matches)))
            }
            ResolvedAction::MarkDone { list, task } => {
                let mut meta = task.meta.clone();
                meta.done = true;
                let changes = FieldChanges {
                    meta: Some(meta),
                    ..FieldChanges::default()
                };
                match self.repo.update(task.uuid, owner, &changes) {
                    Ok(after) => Ok(ActionOutcome::Applied {
                        changed: vec![EntityChange {
                            op: ChangeOp::Done,
                            before: Some(task),
                            after: Some(after),
                        }],
                        recap: self.tasks_recap(owner, list)?,
                    }),
                    Err(err) => recovered(err, EntityKind::Task),
                }
            }
            ResolvedAction::UpdateTask {
                list,
                task,
                new_title,
            } => {
                let changes = FieldChanges {
                    title: Some(new_title),
                    ..FieldChanges::default()
                };
                match self.repo.update(task.uuid, owner, &changes) {
                    Ok(after) => Ok(ActionOutcome::Applied {
                        changed: vec![EntityChange {
                            op: ChangeOp::Updated,
                            before: Some(task),
                            after: Some(after),
                        }],
                        recap: self.tasks_recap(owner, list)?,
                    }),
                    Err(err) => recovered(err, EntityKind::Task),
                }
            }
            ResolvedAction::DeleteTask { list, task } => {
                match self.repo.soft_delete(task.uuid, owner) {
                    Ok(after) => Ok(ActionOutcome::Applied {
                        changed: vec![EntityChange {
                            op: ChangeOp::SoftDeleted,
                            before: Some(task),
                            after: Some(after),
                        }],
                        recap: self.tasks_recap(owner, list)?,
                    }),
                    Err(err) => recovered(err, EntityKind::Task),
                }
            }
            ResolvedAction::DeleteList { list } => {
                match self.repo.soft_delete(list.uuid, owner) {
                    Ok(after) => Ok(ActionOutcome::Applied {
                        changed: vec![EntityChange {
                            op: ChangeOp::SoftDeleted,
                            before: Some(list),
                            after: Some(after),
                        }],
                        recap: Recap::Lists(self.repo.list_roots(owner, EntityKind::List)?),
                    }),
                    Err(err) => recovered(err, EntityKind::List),
                }
            }
            ResolvedAction::RestoreTask { list, task } => {
                match self.repo.restore(task.uuid, owner) {
                    Ok(after) => Ok(ActionOutcome::Applied {
                        changed: vec![EntityChange {
                            op: ChangeOp::Restored,
                            before: Some(task),
                            after: Some(after),
                        }],
                        recap: self.tasks_recap(owner, list)?,
                    }),
                    Err(err) => recovered(err, EntityKind::Task),
                }
            }
            ResolvedAction::MoveEntity {
                task,
                from_list: _,
                to_list,
            } => match self.repo.move_entity(task.uuid, owner, to_list.uuid) {
                Ok(after) => Ok(ActionOutcome::Applied {
                    changed: vec![EntityChange {
                        op: ChangeOp::Moved,
                        before: Some(task),
                        after: Some(after),
                    }],
                    recap: self.tasks_recap(owner, to_list)?,
                }),
                Err(err) => recovered(err, EntityKind::Task),
            },
            ResolvedAction::RenameList { list, new_title } => {
                let changes = FieldChanges {
                    title: Some(new_title),
                    ..FieldChanges::default()
                };
                match self.repo.update(list.uuid, owner, &changes) {
                    Ok(after) => Ok(ActionOutcome::Applied {
                        changed: vec![EntityChange {
                            op: ChangeOp::Updated,
                            before: Some(list),
                            after: Some(after),
                        }],
                        recap: Recap::Lists(self.repo.list_roots(owner, EntityKind::List)?),
                    }),
                    Err(err) => recovered(err, EntityKind::List),
                }
            }
            ResolvedAction::SearchEntity { pattern } => Ok(ActionOutcome::Listing(
                Recap::TaskMatches(self.repo.search(owner, &pattern)?),
            )),
        }
    }

    /// Creates task rows under one container. Duplicate titles are
    /// skipped with a warning; other failures abort.
    fn seed_tasks(
        &self,
        owner: OwnerId,
        container: &Entity,
        tasks: &[String],
    ) -> RouterResult<Vec<EntityChange>> {
        let mut changed = Vec::new();
        for title in tasks {
            match self
                .repo
                .create(&NewEntity::task(owner, title.as_str(), container.uuid))
            {
                Ok(task) => changed.push(created(&task)),
                Err(RepoError::Constraint(ConstraintViolation::DuplicateTitle { .. })) => {
                    warn!(
                        "event=seed_task module=router status=skip_duplicate owner={owner} title={title}"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(changed)
    }

    fn tasks_recap(&self, owner: OwnerId, list: Entity) -> RouterResult<Recap> {
        let tasks = self
            .repo
            .list_children(list.uuid, owner, false)?
            .into_iter()
            .filter(|entity| entity.kind == EntityKind::Task)
            .collect();
        Ok(Recap::Tasks { list, tasks })
    }
}

fn created(entity: &Entity) -> EntityChange {
    EntityChange {
        op: ChangeOp::Created,
        before: None,
        after: Some(entity.clone()),
    }
}

/// Maps a store rejection into a report entry; transport failures stay
/// hard errors.
fn recovered(err: RepoError, kind: EntityKind) -> RouterResult<ActionOutcome> {
    match err {
        RepoError::Constraint(violation) => Ok(ActionOutcome::Rejected { violation }),
        RepoError::CycleDetected {
            entity,
            destination,
        } => Ok(ActionOutcome::CycleRejected {
            entity,
            destination,
        }),
        RepoError::NotFound(id) => Ok(ActionOutcome::NotFound {
            reference: id.to_string(),
            kind,
        }),
        other => Err(RouterError::Store(other)),
    }
}

//! Resolution engine: binds action references to concrete entities.
//!
//! # Responsibility
//! - Map human-readable references (list names, task titles) to entity
//!   ids through tiered matching against a store snapshot.
//! - Decide implicit-container policy and cycle safety for moves.
//!
//! # Invariants
//! - Resolution never mutates the store; it reads and reports.
//! - Tier precedence is strict: a tier that yields any candidates
//!   decides the outcome; only empty tiers fall through.

use crate::model::action::{Action, ConversationContext};
use crate::model::entity::{Entity, EntityId, EntityKind, OwnerId};
use crate::repo::entity_repo::{EntityRepository, RepoResult};
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static NON_WORD_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9a-zA-Zа-яА-ЯёЁ]+").expect("static pattern"));

/// Container reference after resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerTarget {
    /// The container exists.
    Existing(Entity),
    /// The container is missing and the action's kind permits creating
    /// it implicitly.
    CreateMissing(String),
}

impl ContainerTarget {
    /// Display title of the target container.
    pub fn title(&self) -> &str {
        match self {
            Self::Existing(entity) => entity.title.as_deref().unwrap_or_default(),
            Self::CreateMissing(title) => title,
        }
    }
}

/// Action with every reference bound to concrete store state.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedAction {
    Create {
        title: String,
        tasks: Vec<String>,
    },
    AddTask {
        list: ContainerTarget,
        tasks: Vec<String>,
    },
    ShowTasks {
        list: Entity,
    },
    ShowLists,
    ShowAllTasks,
    MarkDone {
        list: Entity,
        task: Entity,
    },
    UpdateTask {
        list: Entity,
        task: Entity,
        new_title: String,
    },
    DeleteTask {
        list: Entity,
        task: Entity,
    },
    DeleteList {
        list: Entity,
    },
    RestoreTask {
        list: Entity,
        task: Entity,
    },
    MoveEntity {
        task: Entity,
        from_list: Entity,
        to_list: Entity,
    },
    RenameList {
        list: Entity,
        new_title: String,
    },
    SearchEntity {
        pattern: String,
    },
}

/// Result of attempting to bind an action's references.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    /// Every reference bound; ready for the store.
    Resolved(ResolvedAction),
    /// More than one candidate is equally plausible. The presentation
    /// layer decides how to ask the user to disambiguate.
    AmbiguousMatch {
        reference: String,
        kind: EntityKind,
        candidates: Vec<Entity>,
    },
    /// No candidate at any tier.
    NotFound {
        reference: String,
        kind: EntityKind,
    },
    /// The action carries no store mutation (`clarify`/`say`); it is
    /// handed to the presentation collaborator as-is.
    ClarificationNeeded(Action),
    /// Moving the entity under the requested destination would make it
    /// its own ancestor.
    CycleRejected {
        entity: EntityId,
        destination: EntityId,
    },
}

/// Which task rows qualify as candidates for one action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskScope {
    /// Active rows regardless of completion.
    Active,
    /// Active rows that are not yet done (`mark_done` targets).
    Pending,
    /// Tombstoned rows (`restore_task` targets).
    Deleted,
}

enum Match {
    Unique(Entity),
    Ambiguous(Vec<Entity>),
    None,
}

/// Read-only resolver over an entity repository.
pub struct ResolutionEngine<'repo, R: EntityRepository> {
    repo: &'repo R,
}

impl<'repo, R: EntityRepository> ResolutionEngine<'repo, R> {
    /// Creates a resolver over the given store snapshot.
    pub fn new(repo: &'repo R) -> Self {
        Self { repo }
    }

    /// Binds one action's references against `owner`'s entities.
    ///
    /// # Contract
    /// - Implicit container creation is offered only for mutating
    ///   container references (`add_task` to a missing list); query
    ///   actions are strict `NotFound`.
    /// - `move_entity` destinations are verified cycle-safe before a
    ///   `Resolved` outcome is produced; the store re-checks at write
    ///   time.
    pub fn resolve(
        &self,
        action: &Action,
        owner: OwnerId,
        context: &ConversationContext,
    ) -> RepoResult<ResolutionOutcome> {
        match action {
            Action::Create { list, tasks } => {
                Ok(ResolutionOutcome::Resolved(ResolvedAction::Create {
                    title: list.clone(),
                    tasks: tasks.clone(),
                }))
            }
            Action::AddTask { list, tasks } => {
                let target = match self.find_list(owner, list)? {
                    Match::Unique(entity) => ContainerTarget::Existing(entity),
                    Match::Ambiguous(candidates) => {
                        return Ok(ambiguous(list, EntityKind::List, candidates));
                    }
                    // Referencing a missing list while adding tasks
                    // auto-creates the list.
                    Match::None => ContainerTarget::CreateMissing(list.clone()),
                };
                Ok(ResolutionOutcome::Resolved(ResolvedAction::AddTask {
                    list: target,
                    tasks: tasks.clone(),
                }))
            }
            Action::ShowTasks { list } => {
                self.resolve_list_only(owner, list, |list| ResolvedAction::ShowTasks { list })
            }
            Action::ShowLists => Ok(ResolutionOutcome::Resolved(ResolvedAction::ShowLists)),
            Action::ShowAllTasks => Ok(ResolutionOutcome::Resolved(ResolvedAction::ShowAllTasks)),
            Action::MarkDone { list, title } => {
                self.resolve_mark_done(owner, list.as_deref(), title, context)
            }
            Action::UpdateTask {
                list,
                title,
                new_title,
            } => self.resolve_in_list(owner, list, title, TaskScope::Active, |list, task| {
                ResolvedAction::UpdateTask {
                    list,
                    task,
                    new_title: new_title.clone(),
                }
            }),
            Action::DeleteTask { list, title } => {
                self.resolve_in_list(owner, list, title, TaskScope::Active, |list, task| {
                    ResolvedAction::DeleteTask { list, task }
                })
            }
            Action::DeleteList { list } => {
                self.resolve_list_only(owner, list, |list| ResolvedAction::DeleteList { list })
            }
            Action::RestoreTask { list, title } => {
                self.resolve_in_list(owner, list, title, TaskScope::Deleted, |list, task| {
                    ResolvedAction::RestoreTask { list, task }
                })
            }
            Action::MoveEntity {
                title,
                from_list,
                to_list,
            } => self.resolve_move(owner, title, from_list, to_list),
            Action::RenameList { list, new_title } => {
                self.resolve_list_only(owner, list, |list| ResolvedAction::RenameList {
                    list,
                    new_title: new_title.clone(),
                })
            }
            Action::SearchEntity { pattern } => Ok(ResolutionOutcome::Resolved(
                ResolvedAction::SearchEntity {
                    pattern: pattern.clone(),
                },
            )),
            Action::Clarify { .. } | Action::Say { .. } => {
                Ok(ResolutionOutcome::ClarificationNeeded(action.clone()))
            }
        }
    }

    fn resolve_list_only(
        &self,
        owner: OwnerId,
        reference: &str,
        build: impl FnOnce(Entity) -> ResolvedAction,
    ) -> RepoResult<ResolutionOutcome> {
        match self.find_list(owner, reference)? {
            Match::Unique(entity) => Ok(ResolutionOutcome::Resolved(build(entity))),
            Match::Ambiguous(candidates) => Ok(ambiguous(reference, EntityKind::List, candidates)),
            Match::None => Ok(not_found(reference, EntityKind::List)),
        }
    }

    fn resolve_mark_done(
        &self,
        owner: OwnerId,
        list: Option<&str>,
        title: &str,
        context: &ConversationContext,
    ) -> RepoResult<ResolutionOutcome> {
        let list_reference = list
            .map(str::to_string)
            .or_else(|| context.last_list.clone());

        if let Some(reference) = list_reference {
            return self.resolve_in_list(owner, &reference, title, TaskScope::Pending, |list, task| {
                ResolvedAction::MarkDone { list, task }
            });
        }

        // No list reference anywhere: look the task up across all lists.
        let lists = self.repo.list_roots(owner, EntityKind::List)?;
        let mut hits: Vec<(Entity, Entity)> = Vec::new();
        for list in lists {
            let tasks = self.task_candidates(owner, &list, TaskScope::Pending)?;
            if let Match::Unique(task) = match_tiered(title, &tasks) {
                hits.push((list, task));
            }
        }

        if hits.len() == 1 {
            let (list, task) = hits.remove(0);
            return Ok(ResolutionOutcome::Resolved(ResolvedAction::MarkDone {
                list,
                task,
            }));
        }
        if hits.is_empty() {
            return Ok(not_found(title, EntityKind::Task));
        }
        Ok(ResolutionOutcome::AmbiguousMatch {
            reference: title.to_string(),
            kind: EntityKind::Task,
            candidates: hits.into_iter().map(|(_, task)| task).collect(),
        })
    }

    fn resolve_move(
        &self,
        owner: OwnerId,
        title: &str,
        from_list: &str,
        to_list: &str,
    ) -> RepoResult<ResolutionOutcome> {
        let source = match self.find_list(owner, from_list)? {
            Match::Unique(entity) => entity,
            Match::Ambiguous(candidates) => {
                return Ok(ambiguous(from_list, EntityKind::List, candidates));
            }
            Match::None => return Ok(not_found(from_list, EntityKind::List)),
        };
        let destination = match self.find_list(owner, to_list)? {
            Match::Unique(entity) => entity,
            Match::Ambiguous(candidates) => {
                return Ok(ambiguous(to_list, EntityKind::List, candidates));
            }
            Match::None => return Ok(not_found(to_list, EntityKind::List)),
        };

        let tasks = self.task_candidates(owner, &source, TaskScope::Active)?;
        let task = match match_tiered(title, &tasks) {
            Match::Unique(task) => task,
            Match::Ambiguous(candidates) => {
                return Ok(ambiguous(title, EntityKind::Task, candidates));
            }
            Match::None => return Ok(not_found(title, EntityKind::Task)),
        };

        // Destination must not be the task itself or one of its own
        // descendants.
        if self.is_self_or_descendant(owner, task.uuid, destination.uuid)? {
            return Ok(ResolutionOutcome::CycleRejected {
                entity: task.uuid,
                destination: destination.uuid,
            });
        }

        Ok(ResolutionOutcome::Resolved(ResolvedAction::MoveEntity {
            task,
            from_list: source,
            to_list: destination,
        }))
    }

    /// Resolves (list, task) pairs for task-targeting actions.
    fn resolve_in_list(
        &self,
        owner: OwnerId,
        list_reference: &str,
        task_reference: &str,
        scope: TaskScope,
        build: impl FnOnce(Entity, Entity) -> ResolvedAction,
    ) -> RepoResult<ResolutionOutcome> {
        let list = match self.find_list(owner, list_reference)? {
            Match::Unique(entity) => entity,
            Match::Ambiguous(candidates) => {
                return Ok(ambiguous(list_reference, EntityKind::List, candidates));
            }
            Match::None => return Ok(not_found(list_reference, EntityKind::List)),
        };

        let tasks = self.task_candidates(owner, &list, scope)?;
        match match_tiered(task_reference, &tasks) {
            Match::Unique(task) => Ok(ResolutionOutcome::Resolved(build(list, task))),
            Match::Ambiguous(candidates) => {
                Ok(ambiguous(task_reference, EntityKind::Task, candidates))
            }
            Match::None => Ok(not_found(task_reference, EntityKind::Task)),
        }
    }

    fn find_list(&self, owner: OwnerId, reference: &str) -> RepoResult<Match> {
        let lists = self.repo.list_kind(owner, EntityKind::List)?;
        Ok(match_tiered(reference, &lists))
    }

    fn task_candidates(
        &self,
        owner: OwnerId,
        list: &Entity,
        scope: TaskScope,
    ) -> RepoResult<Vec<Entity>> {
        let children = self
            .repo
            .list_children(list.uuid, owner, matches!(scope, TaskScope::Deleted))?;
        Ok(children
            .into_iter()
            .filter(|entity| entity.kind == EntityKind::Task)
            .filter(|entity| match scope {
                TaskScope::Active => entity.is_active(),
                TaskScope::Pending => entity.is_active() && !entity.is_done(),
                TaskScope::Deleted => !entity.is_active(),
            })
            .collect())
    }

    fn is_self_or_descendant(
        &self,
        owner: OwnerId,
        entity: EntityId,
        destination: EntityId,
    ) -> RepoResult<bool> {
        let mut visited = std::collections::HashSet::new();
        let mut cursor = Some(destination);
        while let Some(current) = cursor {
            if current == entity {
                return Ok(true);
            }
            if !visited.insert(current) {
                return Ok(true);
            }
            cursor = match self.repo.get_by_id(current, owner, true)? {
                Some(node) => node.parent_uuid,
                None => None,
            };
        }
        Ok(false)
    }
}

fn ambiguous(reference: &str, kind: EntityKind, candidates: Vec<Entity>) -> ResolutionOutcome {
    ResolutionOutcome::AmbiguousMatch {
        reference: reference.to_string(),
        kind,
        candidates,
    }
}

fn not_found(reference: &str, kind: EntityKind) -> ResolutionOutcome {
    ResolutionOutcome::NotFound {
        reference: reference.to_string(),
        kind,
    }
}

/// Tiered matching over candidate titles.
///
/// Tier 1: case-insensitive exact (trimmed). Tier 2: normalized fold
/// (NFKD with combining marks stripped, lowercase, whitespace collapsed,
/// trailing punctuation removed). Tier 3: containment either way over
/// the folded forms. The first tier yielding any candidates decides the
/// outcome.
fn match_tiered(reference: &str, candidates: &[Entity]) -> Match {
    // Candidate titles are compared untrimmed here: whitespace variants
    // are distinct at this tier and only fold together at tier 2.
    let exact_needle = reference.trim().to_lowercase();
    let tier1: Vec<&Entity> = candidates
        .iter()
        .filter(|entity| {
            entity
                .title
                .as_deref()
                .is_some_and(|title| title.to_lowercase() == exact_needle)
        })
        .collect();
    if let Some(outcome) = tier_outcome(tier1) {
        return outcome;
    }

    let folded_needle = fold_reference(reference);
    if folded_needle.is_empty() {
        return Match::None;
    }
    let tier2: Vec<&Entity> = candidates
        .iter()
        .filter(|entity| {
            entity
                .title
                .as_deref()
                .is_some_and(|title| fold_reference(title) == folded_needle)
        })
        .collect();
    if let Some(outcome) = tier_outcome(tier2) {
        return outcome;
    }

    let needle_key = containment_key(reference);
    if needle_key.is_empty() {
        return Match::None;
    }
    let tier3: Vec<&Entity> = candidates
        .iter()
        .filter(|entity| {
            entity.title.as_deref().is_some_and(|title| {
                let key = containment_key(title);
                !key.is_empty() && (key.contains(&needle_key) || needle_key.contains(&key))
            })
        })
        .collect();
    tier_outcome(tier3).unwrap_or(Match::None)
}

/// Containment form for tier 3: the folded title with symbol runs
/// collapsed to single spaces.
fn containment_key(value: &str) -> String {
    NON_WORD_RUNS
        .replace_all(&fold_reference(value), " ")
        .trim()
        .to_string()
}

fn tier_outcome(matches: Vec<&Entity>) -> Option<Match> {
    match matches.len() {
        0 => None,
        1 => Some(Match::Unique(matches[0].clone())),
        _ => Some(Match::Ambiguous(
            matches.into_iter().cloned().collect(),
        )),
    }
}

/// Normalized fold used by tiers 2 and 3.
pub fn fold_reference(value: &str) -> String {
    let stripped: String = value
        .nfkd()
        .filter(|ch| !is_combining_mark(*ch))
        .collect();
    let lowered = stripped.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', ',', '!', '?', ':', ';', '«', '»', '"', '\''])
        .trim()
        .to_string()
}

use aura_core::db::open_db_in_memory;
use aura_core::{
    Action, ContainerTarget, ConversationContext, EntityKind, EntityRepository, NewEntity,
    ResolutionEngine, ResolutionOutcome, ResolvedAction, SqliteEntityRepository,
};

const OWNER: i64 = 7;

fn context() -> ConversationContext {
    ConversationContext::default()
}

#[test]
fn exact_tier_wins_over_whitespace_variant() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let exact = repo.create(&NewEntity::list(OWNER, "Работа")).unwrap();
    repo.create(&NewEntity::list(OWNER, "работа ")).unwrap();

    let engine = ResolutionEngine::new(&repo);
    let outcome = engine
        .resolve(
            &Action::ShowTasks {
                list: "Работа".to_string(),
            },
            OWNER,
            &context(),
        )
        .unwrap();

    // The case-variant matches the exact tier uniquely; the trailing
    // whitespace variant never gets a chance to make it ambiguous.
    assert!(matches!(
        outcome,
        ResolutionOutcome::Resolved(ResolvedAction::ShowTasks { list }) if list.uuid == exact.uuid
    ));
}

#[test]
fn normalized_tier_folds_marks_and_punctuation() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let list = repo.create(&NewEntity::list(OWNER, "Ёлка")).unwrap();

    let engine = ResolutionEngine::new(&repo);
    let outcome = engine
        .resolve(
            &Action::ShowTasks {
                list: "елка!".to_string(),
            },
            OWNER,
            &context(),
        )
        .unwrap();
    assert!(matches!(
        outcome,
        ResolutionOutcome::Resolved(ResolvedAction::ShowTasks { list: found })
            if found.uuid == list.uuid
    ));
}

#[test]
fn containment_tier_requires_a_unique_candidate() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let home = repo
        .create(&NewEntity::list(OWNER, "Домашние дела"))
        .unwrap();

    let engine = ResolutionEngine::new(&repo);
    let outcome = engine
        .resolve(
            &Action::ShowTasks {
                list: "домашние".to_string(),
            },
            OWNER,
            &context(),
        )
        .unwrap();
    assert!(matches!(
        outcome,
        ResolutionOutcome::Resolved(ResolvedAction::ShowTasks { list }) if list.uuid == home.uuid
    ));

    // A second list sharing the fragment turns the same query ambiguous.
    repo.create(&NewEntity::list(OWNER, "Домашние расходы"))
        .unwrap();
    let outcome = engine
        .resolve(
            &Action::ShowTasks {
                list: "домашние".to_string(),
            },
            OWNER,
            &context(),
        )
        .unwrap();
    assert!(matches!(
        outcome,
        ResolutionOutcome::AmbiguousMatch { kind: EntityKind::List, ref candidates, .. }
            if candidates.len() == 2
    ));
}

#[test]
fn queries_against_missing_lists_stay_not_found() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let engine = ResolutionEngine::new(&repo);

    let outcome = engine
        .resolve(
            &Action::ShowTasks {
                list: "Несуществующий".to_string(),
            },
            OWNER,
            &context(),
        )
        .unwrap();
    assert!(matches!(
        outcome,
        ResolutionOutcome::NotFound { kind: EntityKind::List, ref reference }
            if reference == "Несуществующий"
    ));
}

#[test]
fn add_task_to_missing_list_offers_implicit_creation() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let engine = ResolutionEngine::new(&repo);

    let outcome = engine
        .resolve(
            &Action::AddTask {
                list: "Покупки".to_string(),
                tasks: vec!["Молоко".to_string()],
            },
            OWNER,
            &context(),
        )
        .unwrap();
    assert!(matches!(
        outcome,
        ResolutionOutcome::Resolved(ResolvedAction::AddTask {
            list: ContainerTarget::CreateMissing(ref title),
            ..
        }) if title == "Покупки"
    ));
}

#[test]
fn mark_done_falls_back_to_context_list() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let list = repo.create(&NewEntity::list(OWNER, "Работа")).unwrap();
    let task = repo
        .create(&NewEntity::task(OWNER, "Сходить к нотариусу", list.uuid))
        .unwrap();

    let engine = ResolutionEngine::new(&repo);
    let context = ConversationContext {
        last_list: Some("Работа".to_string()),
        ..ConversationContext::default()
    };
    let outcome = engine
        .resolve(
            &Action::MarkDone {
                list: None,
                title: "нотариус".to_string(),
            },
            OWNER,
            &context,
        )
        .unwrap();
    assert!(matches!(
        outcome,
        ResolutionOutcome::Resolved(ResolvedAction::MarkDone { task: found, .. })
            if found.uuid == task.uuid
    ));
}

#[test]
fn mark_done_without_any_list_searches_across_lists() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let work = repo.create(&NewEntity::list(OWNER, "Работа")).unwrap();
    let home = repo.create(&NewEntity::list(OWNER, "Дом")).unwrap();
    let target = repo
        .create(&NewEntity::task(OWNER, "Помыть машину", home.uuid))
        .unwrap();
    repo.create(&NewEntity::task(OWNER, "Отчёт", work.uuid))
        .unwrap();

    let engine = ResolutionEngine::new(&repo);
    let outcome = engine
        .resolve(
            &Action::MarkDone {
                list: None,
                title: "Помыть машину".to_string(),
            },
            OWNER,
            &context(),
        )
        .unwrap();
    assert!(matches!(
        outcome,
        ResolutionOutcome::Resolved(ResolvedAction::MarkDone { list, task })
            if list.uuid == home.uuid && task.uuid == target.uuid
    ));
}

#[test]
fn done_tasks_are_not_mark_done_candidates() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let list = repo.create(&NewEntity::list(OWNER, "Дом")).unwrap();
    let task = repo
        .create(&NewEntity::task(OWNER, "Пропылесосить", list.uuid))
        .unwrap();

    let mut meta = task.meta.clone();
    meta.done = true;
    repo.update(
        task.uuid,
        OWNER,
        &aura_core::FieldChanges {
            meta: Some(meta),
            ..aura_core::FieldChanges::default()
        },
    )
    .unwrap();

    let engine = ResolutionEngine::new(&repo);
    let outcome = engine
        .resolve(
            &Action::MarkDone {
                list: Some("Дом".to_string()),
                title: "Пропылесосить".to_string(),
            },
            OWNER,
            &context(),
        )
        .unwrap();
    assert!(matches!(
        outcome,
        ResolutionOutcome::NotFound { kind: EntityKind::Task, .. }
    ));
}

#[test]
fn restore_task_binds_to_tombstoned_rows_only() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let list = repo.create(&NewEntity::list(OWNER, "Работа")).unwrap();
    let task = repo
        .create(&NewEntity::task(OWNER, "Позвонить клиенту", list.uuid))
        .unwrap();

    let engine = ResolutionEngine::new(&repo);
    let action = Action::RestoreTask {
        list: "Работа".to_string(),
        title: "Позвонить клиенту".to_string(),
    };

    // Active task: nothing to restore.
    let outcome = engine.resolve(&action, OWNER, &context()).unwrap();
    assert!(matches!(
        outcome,
        ResolutionOutcome::NotFound { kind: EntityKind::Task, .. }
    ));

    repo.soft_delete(task.uuid, OWNER).unwrap();
    let outcome = engine.resolve(&action, OWNER, &context()).unwrap();
    assert!(matches!(
        outcome,
        ResolutionOutcome::Resolved(ResolvedAction::RestoreTask { task: found, .. })
            if found.uuid == task.uuid
    ));
}

#[test]
fn move_destination_may_not_be_own_descendant() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    // Lists nested under lists model the degenerate hierarchy where a
    // container is itself containable.
    let outer = repo.create(&NewEntity::list(OWNER, "Внешний")).unwrap();
    let mut inner = NewEntity::list(OWNER, "Внутренний");
    inner.parent_uuid = Some(outer.uuid);
    repo.create(&inner).unwrap();

    let owner_lists = repo.list_roots(OWNER, EntityKind::List).unwrap();
    assert_eq!(owner_lists.len(), 1);

    // A task that is also the ancestor of the destination is rejected.
    let engine = ResolutionEngine::new(&repo);
    let other = repo.create(&NewEntity::list(OWNER, "Другой")).unwrap();
    let task = repo
        .create(&NewEntity::task(OWNER, "Вложенная задача", other.uuid))
        .unwrap();
    let mut sub = NewEntity::list(OWNER, "Подсписок");
    sub.parent_uuid = Some(task.uuid);
    let sub = repo.create(&sub).unwrap();

    let outcome = engine
        .resolve(
            &Action::MoveEntity {
                title: "Вложенная задача".to_string(),
                from_list: "Другой".to_string(),
                to_list: "Подсписок".to_string(),
            },
            OWNER,
            &context(),
        )
        .unwrap();
    assert!(matches!(
        outcome,
        ResolutionOutcome::CycleRejected { entity, destination }
            if entity == task.uuid && destination == sub.uuid
    ));
}

#[test]
fn clarify_and_say_carry_no_store_mutation() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let engine = ResolutionEngine::new(&repo);

    let outcome = engine
        .resolve(
            &Action::Say {
                text: "Привет!".to_string(),
            },
            OWNER,
            &context(),
        )
        .unwrap();
    assert!(matches!(
        outcome,
        ResolutionOutcome::ClarificationNeeded(Action::Say { .. })
    ));
}

use aura_core::db::migrations::latest_version;
use aura_core::db::{open_db, open_db_in_memory};
use aura_core::{
    ConstraintViolation, EntityKind, EntityRepository, FieldChanges, NewEntity, RepoError,
    SqliteEntityRepository,
};

const OWNER: i64 = 100;

fn setup() -> rusqlite::Connection {
    open_db_in_memory().unwrap()
}

#[test]
fn create_and_get_roundtrip() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let list = repo.create(&NewEntity::list(OWNER, "Покупки")).unwrap();
    assert_eq!(list.kind, EntityKind::List);
    assert_eq!(list.owner, OWNER);
    assert_eq!(list.title.as_deref(), Some("Покупки"));
    assert!(list.is_active());
    assert!(list.created_at > 0);

    let loaded = repo
        .get(OWNER, EntityKind::List, "покупки", None)
        .unwrap()
        .unwrap();
    assert_eq!(loaded.uuid, list.uuid);
}

#[test]
fn duplicate_create_fails_with_constraint_violation() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    repo.create(&NewEntity::list(OWNER, "Работа")).unwrap();
    let err = repo.create(&NewEntity::list(OWNER, "Работа")).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Constraint(ConstraintViolation::DuplicateTitle { kind, ref title })
            if kind == EntityKind::List && title == "Работа"
    ));

    // Every further attempt keeps failing the same way.
    let err = repo.create(&NewEntity::list(OWNER, "Работа")).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Constraint(ConstraintViolation::DuplicateTitle { .. })
    ));
}

#[test]
fn uniqueness_is_scoped_by_owner_kind_and_parent() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let list_a = repo.create(&NewEntity::list(OWNER, "Дела")).unwrap();
    let list_b = repo.create(&NewEntity::list(OWNER, "Планы")).unwrap();

    // Same title under different parents is allowed.
    repo.create(&NewEntity::task(OWNER, "Позвонить", list_a.uuid))
        .unwrap();
    repo.create(&NewEntity::task(OWNER, "Позвонить", list_b.uuid))
        .unwrap();

    // Same title for a different owner is allowed.
    repo.create(&NewEntity::list(OWNER + 1, "Дела")).unwrap();

    // Same title under the same parent is not.
    let err = repo
        .create(&NewEntity::task(OWNER, "Позвонить", list_a.uuid))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Constraint(ConstraintViolation::DuplicateTitle { .. })
    ));
}

#[test]
fn parent_must_exist_and_belong_to_same_owner() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let foreign_list = repo.create(&NewEntity::list(OWNER + 1, "Чужой")).unwrap();
    let err = repo
        .create(&NewEntity::task(OWNER, "Задача", foreign_list.uuid))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Constraint(ConstraintViolation::ParentOwnerMismatch(id))
            if id == foreign_list.uuid
    ));

    let dangling = uuid::Uuid::new_v4();
    let err = repo
        .create(&NewEntity::task(OWNER, "Задача", dangling))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Constraint(ConstraintViolation::ParentNotFound(id)) if id == dangling
    ));
}

#[test]
fn soft_deleted_parent_rejects_new_children() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let list = repo.create(&NewEntity::list(OWNER, "Старый")).unwrap();
    repo.soft_delete(list.uuid, OWNER).unwrap();

    let err = repo
        .create(&NewEntity::task(OWNER, "Задача", list.uuid))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Constraint(ConstraintViolation::ParentNotFound(id)) if id == list.uuid
    ));
}

#[test]
fn soft_delete_is_idempotent() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let list = repo.create(&NewEntity::list(OWNER, "Вторник")).unwrap();

    let once = repo.soft_delete(list.uuid, OWNER).unwrap();
    let twice = repo.soft_delete(list.uuid, OWNER).unwrap();
    assert!(!once.is_active());
    assert_eq!(once, twice);

    // The no-op second call appends no extra audit record.
    let deletes: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM audit_log WHERE entity_uuid = ?1 AND op = 'soft_delete';",
            [list.uuid.to_string()],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(deletes, 1);
}

#[test]
fn create_revives_exact_tombstoned_duplicate() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let list = repo.create(&NewEntity::list(OWNER, "Покупки")).unwrap();
    let task = repo
        .create(&NewEntity::task(OWNER, "Молоко", list.uuid))
        .unwrap();
    repo.soft_delete(task.uuid, OWNER).unwrap();

    let revived = repo
        .create(&NewEntity::task(OWNER, "Молоко", list.uuid))
        .unwrap();
    assert_eq!(revived.uuid, task.uuid);
    assert!(revived.is_active());
    assert!(!revived.is_done());
    assert_eq!(revived.created_at, task.created_at);
}

#[test]
fn restore_clears_tombstone_and_requires_one() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let list = repo.create(&NewEntity::list(OWNER, "Работа")).unwrap();
    let task = repo
        .create(&NewEntity::task(OWNER, "Отчёт", list.uuid))
        .unwrap();

    // Restoring an active entity is NotFound: nothing restorable here.
    let err = repo.restore(task.uuid, OWNER).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(id) if id == task.uuid));

    repo.soft_delete(task.uuid, OWNER).unwrap();
    let restored = repo.restore(task.uuid, OWNER).unwrap();
    assert!(restored.is_active());
    assert_eq!(restored.uuid, task.uuid);
}

#[test]
fn restore_into_active_duplicate_is_rejected() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let old = repo.create(&NewEntity::list(OWNER, "Архив")).unwrap();
    let current = repo.create(&NewEntity::list(OWNER, "Текущий")).unwrap();
    repo.soft_delete(old.uuid, OWNER).unwrap();

    // Rename the live list onto the tombstone's title, then try to
    // bring the tombstone back.
    repo.update(
        current.uuid,
        OWNER,
        &FieldChanges {
            title: Some("Архив".to_string()),
            ..FieldChanges::default()
        },
    )
    .unwrap();

    let err = repo.restore(old.uuid, OWNER).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Constraint(ConstraintViolation::RestoreConflict { ref title })
            if title == "Архив"
    ));
}

#[test]
fn purge_requires_tombstone_unless_forced() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let list = repo.create(&NewEntity::list(OWNER, "Временный")).unwrap();
    let err = repo.purge(list.uuid, OWNER, false).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Constraint(ConstraintViolation::StillActive(id)) if id == list.uuid
    ));

    repo.soft_delete(list.uuid, OWNER).unwrap();
    repo.purge(list.uuid, OWNER, false).unwrap();
    assert!(repo.get_by_id(list.uuid, OWNER, true).unwrap().is_none());

    // Purged rows are gone for restore as well.
    let err = repo.restore(list.uuid, OWNER).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(_)));
}

#[test]
fn update_rejects_duplicate_title_and_preserves_identity() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let list = repo.create(&NewEntity::list(OWNER, "Дом")).unwrap();
    let task_a = repo
        .create(&NewEntity::task(OWNER, "Полить цветы", list.uuid))
        .unwrap();
    repo.create(&NewEntity::task(OWNER, "Вынести мусор", list.uuid))
        .unwrap();

    let err = repo
        .update(
            task_a.uuid,
            OWNER,
            &FieldChanges {
                title: Some("Вынести мусор".to_string()),
                ..FieldChanges::default()
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Constraint(ConstraintViolation::DuplicateTitle { .. })
    ));

    let renamed = repo
        .update(
            task_a.uuid,
            OWNER,
            &FieldChanges {
                title: Some("Полить сад".to_string()),
                ..FieldChanges::default()
            },
        )
        .unwrap();
    assert_eq!(renamed.uuid, task_a.uuid);
    assert_eq!(renamed.created_at, task_a.created_at);
    assert_eq!(renamed.title.as_deref(), Some("Полить сад"));
}

#[test]
fn move_entity_reparents_and_rejects_cycles() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let list_a = repo.create(&NewEntity::list(OWNER, "Работа")).unwrap();
    let list_b = repo.create(&NewEntity::list(OWNER, "Дом")).unwrap();
    let task = repo
        .create(&NewEntity::task(OWNER, "Уборка", list_a.uuid))
        .unwrap();

    let moved = repo.move_entity(task.uuid, OWNER, list_b.uuid).unwrap();
    assert_eq!(moved.parent_uuid, Some(list_b.uuid));
    assert_eq!(moved.uuid, task.uuid);

    // Self-parenting is the depth-one cycle.
    let err = repo.move_entity(task.uuid, OWNER, task.uuid).unwrap_err();
    assert!(matches!(err, RepoError::CycleDetected { .. }));
}

#[test]
fn move_under_own_descendant_fails_at_any_depth() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let root = repo.create(&NewEntity::list(OWNER, "Корень")).unwrap();
    let mut parent = root.clone();
    for depth in 0..4 {
        parent = repo
            .create(&NewEntity::task(
                OWNER,
                format!("Уровень {depth}"),
                parent.uuid,
            ))
            .unwrap();
    }

    // `parent` is now a depth-4 descendant of `root`.
    let err = repo.move_entity(root.uuid, OWNER, parent.uuid).unwrap_err();
    assert!(matches!(
        err,
        RepoError::CycleDetected { entity, destination }
            if entity == root.uuid && destination == parent.uuid
    ));
}

#[test]
fn list_children_keeps_creation_order_and_hides_deleted() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let list = repo.create(&NewEntity::list(OWNER, "Покупки")).unwrap();
    let first = repo
        .create(&NewEntity::task(OWNER, "Хлеб", list.uuid))
        .unwrap();
    let second = repo
        .create(&NewEntity::task(OWNER, "Молоко", list.uuid))
        .unwrap();
    let third = repo
        .create(&NewEntity::task(OWNER, "Сыр", list.uuid))
        .unwrap();
    repo.soft_delete(second.uuid, OWNER).unwrap();

    let visible = repo.list_children(list.uuid, OWNER, false).unwrap();
    assert_eq!(
        visible.iter().map(|entity| entity.uuid).collect::<Vec<_>>(),
        vec![first.uuid, third.uuid]
    );

    let all = repo.list_children(list.uuid, OWNER, true).unwrap();
    assert_eq!(all.len(), 3);
}

#[test]
fn every_mutation_appends_an_audit_record() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let list = repo.create(&NewEntity::list(OWNER, "Аудит")).unwrap();
    let task = repo
        .create(&NewEntity::task(OWNER, "Запись", list.uuid))
        .unwrap();
    repo.update(
        task.uuid,
        OWNER,
        &FieldChanges {
            title: Some("Запись v2".to_string()),
            ..FieldChanges::default()
        },
    )
    .unwrap();
    repo.soft_delete(task.uuid, OWNER).unwrap();
    repo.restore(task.uuid, OWNER).unwrap();

    let mut stmt = conn
        .prepare(
            "SELECT op, before_json, after_json FROM audit_log
             WHERE owner_id = ?1 ORDER BY id ASC;",
        )
        .unwrap();
    let rows: Vec<(String, Option<String>, Option<String>)> = stmt
        .query_map([OWNER], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .unwrap()
        .map(Result::unwrap)
        .collect();

    let ops: Vec<&str> = rows.iter().map(|(op, _, _)| op.as_str()).collect();
    assert_eq!(
        ops,
        vec!["create", "create", "update", "soft_delete", "restore"]
    );

    // Creates carry only an after snapshot; updates carry both.
    assert!(rows[0].1.is_none() && rows[0].2.is_some());
    assert!(rows[2].1.is_some() && rows[2].2.is_some());
    let before: serde_json::Value = serde_json::from_str(rows[2].1.as_deref().unwrap()).unwrap();
    let after: serde_json::Value = serde_json::from_str(rows[2].2.as_deref().unwrap()).unwrap();
    assert_eq!(before["title"], "Запись");
    assert_eq!(after["title"], "Запись v2");
}

#[test]
fn search_matches_titles_case_insensitively_with_container() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let work = repo.create(&NewEntity::list(OWNER, "Работа")).unwrap();
    let home = repo.create(&NewEntity::list(OWNER, "Дом")).unwrap();
    repo.create(&NewEntity::task(OWNER, "Исправить договор", work.uuid))
        .unwrap();
    repo.create(&NewEntity::task(OWNER, "Подписать Договор аренды", home.uuid))
        .unwrap();
    repo.create(&NewEntity::task(OWNER, "Помыть машину", home.uuid))
        .unwrap();

    let hits = repo.search(OWNER, "договор").unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].0, "Работа");
    assert_eq!(hits[1].0, "Дом");
}

#[test]
fn kind_counts_reflect_active_rows_only() {
    let conn = setup();
    let repo = SqliteEntityRepository::try_new(&conn).unwrap();

    let list = repo.create(&NewEntity::list(OWNER, "Списки")).unwrap();
    let task = repo
        .create(&NewEntity::task(OWNER, "Задача", list.uuid))
        .unwrap();
    repo.create(&NewEntity::task(OWNER, "Ещё задача", list.uuid))
        .unwrap();
    repo.soft_delete(task.uuid, OWNER).unwrap();

    let counts = repo.kind_counts(OWNER).unwrap();
    assert_eq!(counts.get(&EntityKind::List), Some(&1));
    assert_eq!(counts.get(&EntityKind::Task), Some(&1));
}

#[test]
fn schema_bootstrap_is_idempotent_and_preserves_rows() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("aura.sqlite3");

    {
        let conn = open_db(&db_path).unwrap();
        let repo = SqliteEntityRepository::try_new(&conn).unwrap();
        repo.create(&NewEntity::list(OWNER, "Выжившие")).unwrap();
    }

    let conn = open_db(&db_path).unwrap();
    let version: u32 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, latest_version());

    let repo = SqliteEntityRepository::try_new(&conn).unwrap();
    let lists = repo.list_roots(OWNER, EntityKind::List).unwrap();
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].title.as_deref(), Some("Выжившие"));
}

#[test]
fn repository_rejects_unmigrated_connection() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    let err = SqliteEntityRepository::try_new(&conn).unwrap_err();
    assert!(matches!(
        err,
        RepoError::UninitializedConnection { actual_version: 0, .. }
    ));
}

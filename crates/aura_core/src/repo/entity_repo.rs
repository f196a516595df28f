//! Entity repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide stable CRUD, move and recovery APIs over the `entities`
//!   table.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Every mutating call runs as one immediate transaction: re-validate
//!   invariants, apply, append one `audit_log` row, commit or roll back
//!   as a unit.
//! - The tuple (owner, kind, title, parent) is unique among active rows;
//!   the table's UNIQUE index is the backstop for concurrent writers.
//! - A child's owner always equals its parent's owner, and a parent must
//!   be active at link time.
//! - Title matching inside the store is done in Rust, not SQL `LOWER`,
//!   because SQLite only case-folds ASCII.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::entity::{
    Entity, EntityId, EntityKind, EntityMeta, EntityValidationError, NewEntity, OwnerId,
};
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const ENTITY_SELECT_SQL: &str = "SELECT
    uuid,
    owner_id,
    kind,
    title,
    content,
    parent_uuid,
    meta,
    created_at,
    updated_at
FROM entities";

pub type RepoResult<T> = Result<T, RepoError>;

/// Store invariant violations. Always rejected, never partially applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintViolation {
    /// An active sibling with the same (kind, title, parent) exists.
    DuplicateTitle { kind: EntityKind, title: String },
    /// The referenced parent does not exist or is soft-deleted.
    ParentNotFound(EntityId),
    /// The referenced parent belongs to a different owner.
    ParentOwnerMismatch(EntityId),
    /// Hard delete requested for a row that is not soft-deleted.
    StillActive(EntityId),
    /// Restoring would collide with an active duplicate title.
    RestoreConflict { title: String },
}

impl Display for ConstraintViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateTitle { kind, title } => {
                write!(f, "duplicate {kind} title `{title}`")
            }
            Self::ParentNotFound(id) => write!(f, "parent entity not found: {id}"),
            Self::ParentOwnerMismatch(id) => {
                write!(f, "parent entity belongs to another owner: {id}")
            }
            Self::StillActive(id) => {
                write!(f, "entity is not soft-deleted, refusing hard delete: {id}")
            }
            Self::RestoreConflict { title } => {
                write!(f, "restore would duplicate active title `{title}`")
            }
        }
    }
}

/// Generic repository error for entity persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(EntityValidationError),
    Db(DbError),
    NotFound(EntityId),
    Constraint(ConstraintViolation),
    /// Moving an entity under itself or one of its descendants.
    CycleDetected {
        entity: EntityId,
        destination: EntityId,
    },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "entity not found: {id}"),
            Self::Constraint(violation) => write!(f, "constraint violation: {violation}"),
            Self::CycleDetected {
                entity,
                destination,
            } => write!(
                f,
                "move would create cycle: entity {entity} under {destination}"
            ),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "entity repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted entity data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EntityValidationError> for RepoError {
    fn from(value: EntityValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Field changes for `update`. Unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct FieldChanges {
    /// New title. Re-validates uniqueness among active siblings.
    pub title: Option<String>,
    /// New content body (`Some(None)` clears it).
    pub content: Option<Option<String>>,
    /// Full metadata replacement.
    pub meta: Option<EntityMeta>,
}

/// Repository interface for entity store operations.
pub trait EntityRepository {
    /// Creates one entity. Revives an exact tombstoned duplicate instead
    /// of inserting a second row for the same tuple.
    fn create(&self, record: &NewEntity) -> RepoResult<Entity>;
    /// Case-insensitive exact title lookup among active rows.
    fn get(
        &self,
        owner: OwnerId,
        kind: EntityKind,
        title: &str,
        parent_uuid: Option<EntityId>,
    ) -> RepoResult<Option<Entity>>;
    /// Loads one entity by id, owner-scoped.
    fn get_by_id(
        &self,
        id: EntityId,
        owner: OwnerId,
        include_deleted: bool,
    ) -> RepoResult<Option<Entity>>;
    /// Lists children of one container in creation order.
    fn list_children(
        &self,
        parent_uuid: EntityId,
        owner: OwnerId,
        include_deleted: bool,
    ) -> RepoResult<Vec<Entity>>;
    /// Lists active root entities of one kind in creation order.
    fn list_roots(&self, owner: OwnerId, kind: EntityKind) -> RepoResult<Vec<Entity>>;
    /// Lists every active entity of one kind, any parent, in creation
    /// order.
    fn list_kind(&self, owner: OwnerId, kind: EntityKind) -> RepoResult<Vec<Entity>>;
    /// Applies field changes to one active entity.
    fn update(&self, id: EntityId, owner: OwnerId, changes: &FieldChanges) -> RepoResult<Entity>;
    /// Tombstones one entity. Idempotent: a second call is a no-op
    /// returning the current state.
    fn soft_delete(&self, id: EntityId, owner: OwnerId) -> RepoResult<Entity>;
    /// Clears a tombstone. Fails with `NotFound` when the row is absent
    /// or was never soft-deleted.
    fn restore(&self, id: EntityId, owner: OwnerId) -> RepoResult<Entity>;
    /// Irreversibly removes one row. Requires a prior soft delete unless
    /// `force` is set.
    fn purge(&self, id: EntityId, owner: OwnerId, force: bool) -> RepoResult<()>;
    /// Re-parents one entity, re-validating ownership, uniqueness and
    /// cycle-freedom at write time.
    fn move_entity(
        &self,
        id: EntityId,
        owner: OwnerId,
        new_parent_uuid: EntityId,
    ) -> RepoResult<Entity>;
    /// Case-insensitive title containment over active tasks, paired with
    /// their container titles.
    fn search(&self, owner: OwnerId, pattern: &str) -> RepoResult<Vec<(String, Entity)>>;
    /// Active entity counts per kind.
    fn kind_counts(&self, owner: OwnerId) -> RepoResult<BTreeMap<EntityKind, u64>>;
}

/// SQLite-backed entity repository.
#[derive(Debug)]
pub struct SqliteEntityRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEntityRepository<'conn> {
    /// Creates a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl EntityRepository for SqliteEntityRepository<'_> {
    fn create(&self, record: &NewEntity) -> RepoResult<Entity> {
        record.validate()?;
        // Titles persist verbatim; whitespace variants are distinct
        // tuples and matching looseness lives in the resolution tiers.
        let title = record.title.as_deref();

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        if let Some(parent_uuid) = record.parent_uuid {
            ensure_active_parent(&tx, parent_uuid, record.owner)?;
        }

        if let Some(title) = title {
            match find_exact_sibling(&tx, record.owner, record.kind, title, record.parent_uuid)? {
                Some(existing) if existing.is_active() => {
                    return Err(RepoError::Constraint(ConstraintViolation::DuplicateTitle {
                        kind: record.kind,
                        title: title.to_string(),
                    }));
                }
                Some(existing) => {
                    // Same tuple exists as a tombstone: revive it instead
                    // of fighting the UNIQUE index with a second row.
                    let before = existing.clone();
                    let mut revived = existing;
                    revived.meta.deleted = false;
                    revived.meta.done = false;
                    write_meta(&tx, &revived)?;
                    let after = load_required(&tx, revived.uuid, record.owner)?;
                    append_audit(&tx, record.owner, revived.uuid, "revive", Some(&before), Some(&after))?;
                    tx.commit()?;
                    info!(
                        "event=entity_create module=repo status=revived kind={} owner={}",
                        record.kind, record.owner
                    );
                    return Ok(after);
                }
                None => {}
            }
        }

        let uuid = Uuid::new_v4();
        let inserted = tx.execute(
            "INSERT INTO entities (uuid, owner_id, kind, title, content, parent_uuid, meta)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                uuid.to_string(),
                record.owner,
                record.kind.as_db(),
                title,
                record.content.as_deref(),
                record.parent_uuid.map(|value| value.to_string()),
                record.meta.to_column(),
            ],
        );
        if let Err(err) = inserted {
            // UNIQUE index backstop for a writer that raced past the
            // in-transaction pre-check.
            if is_unique_violation(&err) {
                return Err(RepoError::Constraint(ConstraintViolation::DuplicateTitle {
                    kind: record.kind,
                    title: title.unwrap_or_default().to_string(),
                }));
            }
            return Err(err.into());
        }

        let created = load_required(&tx, uuid, record.owner)?;
        append_audit(&tx, record.owner, uuid, "create", None, Some(&created))?;
        tx.commit()?;
        info!(
            "event=entity_create module=repo status=ok kind={} owner={}",
            record.kind, record.owner
        );
        Ok(created)
    }

    fn get(
        &self,
        owner: OwnerId,
        kind: EntityKind,
        title: &str,
        parent_uuid: Option<EntityId>,
    ) -> RepoResult<Option<Entity>> {
        let needle = title.trim().to_lowercase();
        let candidates = load_scope(self.conn, owner, kind, parent_uuid, false)?;
        Ok(candidates.into_iter().find(|entity| {
            entity
                .title
                .as_deref()
                .is_some_and(|value| value.trim().to_lowercase() == needle)
        }))
    }

    fn get_by_id(
        &self,
        id: EntityId,
        owner: OwnerId,
        include_deleted: bool,
    ) -> RepoResult<Option<Entity>> {
        let entity = load_by_id(self.conn, id, owner)?;
        Ok(entity.filter(|value| include_deleted || value.is_active()))
    }

    fn list_children(
        &self,
        parent_uuid: EntityId,
        owner: OwnerId,
        include_deleted: bool,
    ) -> RepoResult<Vec<Entity>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ENTITY_SELECT_SQL}
             WHERE owner_id = ?1
               AND parent_uuid = ?2
             ORDER BY created_at ASC, rowid ASC;"
        ))?;
        let mut rows = stmt.query(params![owner, parent_uuid.to_string()])?;

        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let entity = parse_entity_row(row)?;
            if include_deleted || entity.is_active() {
                items.push(entity);
            }
        }
        Ok(items)
    }

    fn list_roots(&self, owner: OwnerId, kind: EntityKind) -> RepoResult<Vec<Entity>> {
        let scope = load_scope(self.conn, owner, kind, None, false)?;
        Ok(scope)
    }

    fn list_kind(&self, owner: OwnerId, kind: EntityKind) -> RepoResult<Vec<Entity>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ENTITY_SELECT_SQL}
             WHERE owner_id = ?1
               AND kind = ?2
             ORDER BY created_at ASC, rowid ASC;"
        ))?;
        let mut rows = stmt.query(params![owner, kind.as_db()])?;

        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let entity = parse_entity_row(row)?;
            if entity.is_active() {
                items.push(entity);
            }
        }
        Ok(items)
    }

    fn update(&self, id: EntityId, owner: OwnerId, changes: &FieldChanges) -> RepoResult<Entity> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let before = load_by_id(&tx, id, owner)?
            .filter(Entity::is_active)
            .ok_or(RepoError::NotFound(id))?;

        let mut after = before.clone();
        if let Some(title) = &changes.title {
            if title.trim().is_empty() {
                return Err(RepoError::Validation(EntityValidationError::BlankTitle));
            }
            if Some(title.as_str()) != before.title.as_deref() {
                ensure_no_active_duplicate(
                    &tx,
                    owner,
                    before.kind,
                    title,
                    before.parent_uuid,
                    Some(id),
                )?;
            }
            after.title = Some(title.clone());
        }
        if let Some(content) = &changes.content {
            after.content = content.clone();
        }
        if let Some(meta) = &changes.meta {
            after.meta = meta.clone();
        }

        tx.execute(
            "UPDATE entities
             SET title = ?2,
                 content = ?3,
                 meta = ?4,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?1;",
            params![
                id.to_string(),
                after.title.as_deref(),
                after.content.as_deref(),
                after.meta.to_column(),
            ],
        )?;

        let stored = load_required(&tx, id, owner)?;
        append_audit(&tx, owner, id, "update", Some(&before), Some(&stored))?;
        tx.commit()?;
        Ok(stored)
    }

    fn soft_delete(&self, id: EntityId, owner: OwnerId) -> RepoResult<Entity> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let current = load_by_id(&tx, id, owner)?.ok_or(RepoError::NotFound(id))?;
        if !current.is_active() {
            // Idempotent: deleting a tombstone observes the same state.
            return Ok(current);
        }

        let before = current.clone();
        let mut after = current;
        after.soft_delete();
        write_meta(&tx, &after)?;

        let stored = load_required(&tx, id, owner)?;
        append_audit(&tx, owner, id, "soft_delete", Some(&before), Some(&stored))?;
        tx.commit()?;
        Ok(stored)
    }

    fn restore(&self, id: EntityId, owner: OwnerId) -> RepoResult<Entity> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let current = load_by_id(&tx, id, owner)?.ok_or(RepoError::NotFound(id))?;
        if current.is_active() {
            // Never soft-deleted (or already hard-deleted and gone):
            // nothing restorable at this id.
            return Err(RepoError::NotFound(id));
        }

        if let Some(title) = current.title.as_deref() {
            ensure_no_active_duplicate(&tx, owner, current.kind, title, current.parent_uuid, Some(id))
                .map_err(|err| match err {
                    RepoError::Constraint(ConstraintViolation::DuplicateTitle { title, .. }) => {
                        RepoError::Constraint(ConstraintViolation::RestoreConflict { title })
                    }
                    other => other,
                })?;
        }

        let before = current.clone();
        let mut after = current;
        after.restore();
        write_meta(&tx, &after)?;

        let stored = load_required(&tx, id, owner)?;
        append_audit(&tx, owner, id, "restore", Some(&before), Some(&stored))?;
        tx.commit()?;
        Ok(stored)
    }

    fn purge(&self, id: EntityId, owner: OwnerId, force: bool) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let current = load_by_id(&tx, id, owner)?.ok_or(RepoError::NotFound(id))?;
        if current.is_active() && !force {
            return Err(RepoError::Constraint(ConstraintViolation::StillActive(id)));
        }

        tx.execute("DELETE FROM entities WHERE uuid = ?1;", [id.to_string()])?;
        append_audit(&tx, owner, id, "purge", Some(&current), None)?;
        tx.commit()?;
        Ok(())
    }

    fn move_entity(
        &self,
        id: EntityId,
        owner: OwnerId,
        new_parent_uuid: EntityId,
    ) -> RepoResult<Entity> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let before = load_by_id(&tx, id, owner)?
            .filter(Entity::is_active)
            .ok_or(RepoError::NotFound(id))?;

        ensure_active_parent(&tx, new_parent_uuid, owner)?;
        ensure_no_cycle(&tx, id, new_parent_uuid, owner)?;
        if let Some(title) = before.title.as_deref() {
            ensure_no_active_duplicate(&tx, owner, before.kind, title, Some(new_parent_uuid), Some(id))?;
        }

        tx.execute(
            "UPDATE entities
             SET parent_uuid = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?1;",
            params![id.to_string(), new_parent_uuid.to_string()],
        )?;

        let stored = load_required(&tx, id, owner)?;
        append_audit(&tx, owner, id, "move", Some(&before), Some(&stored))?;
        tx.commit()?;
        Ok(stored)
    }

    fn search(&self, owner: OwnerId, pattern: &str) -> RepoResult<Vec<(String, Entity)>> {
        let needle = pattern.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            "SELECT
                child.uuid,
                child.owner_id,
                child.kind,
                child.title,
                child.content,
                child.parent_uuid,
                child.meta,
                child.created_at,
                child.updated_at,
                parent.title AS container_title
             FROM entities child
             INNER JOIN entities parent ON parent.uuid = child.parent_uuid
             WHERE child.owner_id = ?1
               AND child.kind = 'task'
             ORDER BY child.created_at ASC, child.rowid ASC;",
        )?;
        let mut rows = stmt.query(params![owner])?;

        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            let entity = parse_entity_row(row)?;
            if !entity.is_active() {
                continue;
            }
            let matches = entity
                .title
                .as_deref()
                .is_some_and(|title| title.to_lowercase().contains(&needle));
            if matches {
                let container: Option<String> = row.get("container_title")?;
                hits.push((container.unwrap_or_default(), entity));
            }
        }
        Ok(hits)
    }

    fn kind_counts(&self, owner: OwnerId) -> RepoResult<BTreeMap<EntityKind, u64>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ENTITY_SELECT_SQL}
             WHERE owner_id = ?1;"
        ))?;
        let mut rows = stmt.query(params![owner])?;

        let mut counts = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let entity = parse_entity_row(row)?;
            if entity.is_active() {
                *counts.entry(entity.kind).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

fn load_by_id(conn: &Connection, id: EntityId, owner: OwnerId) -> RepoResult<Option<Entity>> {
    let mut stmt = conn.prepare(&format!(
        "{ENTITY_SELECT_SQL}
         WHERE uuid = ?1
           AND owner_id = ?2;"
    ))?;
    let mut rows = stmt.query(params![id.to_string(), owner])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_entity_row(row)?));
    }
    Ok(None)
}

fn load_required(conn: &Connection, id: EntityId, owner: OwnerId) -> RepoResult<Entity> {
    load_by_id(conn, id, owner)?.ok_or(RepoError::NotFound(id))
}

/// Loads every row of one (owner, kind, parent) scope, active-only when
/// `include_deleted` is false, in creation order.
fn load_scope(
    conn: &Connection,
    owner: OwnerId,
    kind: EntityKind,
    parent_uuid: Option<EntityId>,
    include_deleted: bool,
) -> RepoResult<Vec<Entity>> {
    let sql = if parent_uuid.is_some() {
        format!(
            "{ENTITY_SELECT_SQL}
             WHERE owner_id = ?1
               AND kind = ?2
               AND parent_uuid = ?3
             ORDER BY created_at ASC, rowid ASC;"
        )
    } else {
        format!(
            "{ENTITY_SELECT_SQL}
             WHERE owner_id = ?1
               AND kind = ?2
               AND parent_uuid IS NULL
             ORDER BY created_at ASC, rowid ASC;"
        )
    };

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = match parent_uuid {
        Some(parent_uuid) => stmt.query(params![owner, kind.as_db(), parent_uuid.to_string()])?,
        None => stmt.query(params![owner, kind.as_db()])?,
    };

    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        let entity = parse_entity_row(row)?;
        if include_deleted || entity.is_active() {
            items.push(entity);
        }
    }
    Ok(items)
}

/// Finds a sibling with the byte-exact same title, deleted or not.
fn find_exact_sibling(
    conn: &Connection,
    owner: OwnerId,
    kind: EntityKind,
    title: &str,
    parent_uuid: Option<EntityId>,
) -> RepoResult<Option<Entity>> {
    let all = load_scope(conn, owner, kind, parent_uuid, true)?;
    Ok(all
        .into_iter()
        .find(|entity| entity.title.as_deref() == Some(title)))
}

fn ensure_no_active_duplicate(
    conn: &Connection,
    owner: OwnerId,
    kind: EntityKind,
    title: &str,
    parent_uuid: Option<EntityId>,
    exclude: Option<EntityId>,
) -> RepoResult<()> {
    let siblings = load_scope(conn, owner, kind, parent_uuid, false)?;
    let clash = siblings.iter().any(|entity| {
        entity.title.as_deref() == Some(title) && Some(entity.uuid) != exclude
    });
    if clash {
        return Err(RepoError::Constraint(ConstraintViolation::DuplicateTitle {
            kind,
            title: title.to_string(),
        }));
    }
    Ok(())
}

fn ensure_active_parent(conn: &Connection, parent_uuid: EntityId, owner: OwnerId) -> RepoResult<()> {
    let row: Option<(i64, Option<String>)> = conn
        .query_row(
            "SELECT owner_id, meta FROM entities WHERE uuid = ?1;",
            [parent_uuid.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        None => Err(RepoError::Constraint(ConstraintViolation::ParentNotFound(
            parent_uuid,
        ))),
        Some((parent_owner, _)) if parent_owner != owner => Err(RepoError::Constraint(
            ConstraintViolation::ParentOwnerMismatch(parent_uuid),
        )),
        Some((_, meta_text)) => {
            let meta = EntityMeta::from_column(meta_text.as_deref()).ok_or_else(|| {
                RepoError::InvalidData(format!(
                    "invalid meta on parent entity {parent_uuid}"
                ))
            })?;
            if meta.deleted {
                return Err(RepoError::Constraint(ConstraintViolation::ParentNotFound(
                    parent_uuid,
                )));
            }
            Ok(())
        }
    }
}

/// Walks the ancestor chain of `destination`; placing `entity` there must
/// not make it its own ancestor.
fn ensure_no_cycle(
    conn: &Connection,
    entity: EntityId,
    destination: EntityId,
    owner: OwnerId,
) -> RepoResult<()> {
    let mut visited = std::collections::HashSet::new();
    let mut cursor = Some(destination);
    while let Some(current) = cursor {
        if current == entity {
            return Err(RepoError::CycleDetected {
                entity,
                destination,
            });
        }
        if !visited.insert(current) {
            // Pre-existing loop in persisted data; refuse to extend it.
            return Err(RepoError::CycleDetected {
                entity,
                destination,
            });
        }
        let node = load_by_id(conn, current, owner)?
            .ok_or(RepoError::Constraint(ConstraintViolation::ParentNotFound(current)))?;
        cursor = node.parent_uuid;
    }
    Ok(())
}

fn write_meta(conn: &Connection, entity: &Entity) -> RepoResult<()> {
    let changed = conn.execute(
        "UPDATE entities
         SET meta = ?2,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE uuid = ?1;",
        params![entity.uuid.to_string(), entity.meta.to_column()],
    )?;
    if changed == 0 {
        return Err(RepoError::NotFound(entity.uuid));
    }
    Ok(())
}

fn append_audit(
    conn: &Connection,
    owner: OwnerId,
    entity_uuid: EntityId,
    op: &str,
    before: Option<&Entity>,
    after: Option<&Entity>,
) -> RepoResult<()> {
    let before_json = before
        .map(serde_json::to_string)
        .transpose()
        .map_err(|err| RepoError::InvalidData(format!("unserializable audit snapshot: {err}")))?;
    let after_json = after
        .map(serde_json::to_string)
        .transpose()
        .map_err(|err| RepoError::InvalidData(format!("unserializable audit snapshot: {err}")))?;

    conn.execute(
        "INSERT INTO audit_log (owner_id, entity_uuid, op, before_json, after_json)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![owner, entity_uuid.to_string(), op, before_json, after_json],
    )?;
    Ok(())
}

fn parse_entity_row(row: &Row<'_>) -> RepoResult<Entity> {
    let uuid_text: String = row.get("uuid")?;
    let uuid = parse_uuid(&uuid_text, "entities.uuid")?;

    let kind_text: String = row.get("kind")?;
    let kind = EntityKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid entity kind `{kind_text}` in entities.kind"))
    })?;

    let parent_uuid = row
        .get::<_, Option<String>>("parent_uuid")?
        .map(|value| parse_uuid(&value, "entities.parent_uuid"))
        .transpose()?;

    let meta_text: Option<String> = row.get("meta")?;
    let meta = EntityMeta::from_column(meta_text.as_deref()).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid meta JSON on entity {uuid}"))
    })?;

    Ok(Entity {
        uuid,
        owner: row.get("owner_id")?,
        kind,
        title: row.get("title")?,
        content: row.get("content")?,
        parent_uuid,
        meta,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in ["entities", "audit_log"] {
        if !table_exists(conn, table)? {
            return Err(RepoError::InvalidData(format!(
                "required table `{table}` is missing"
            )));
        }
    }

    for column in [
        "uuid",
        "owner_id",
        "kind",
        "title",
        "content",
        "parent_uuid",
        "meta",
        "created_at",
        "updated_at",
    ] {
        if !table_has_column(conn, "entities", column)? {
            return Err(RepoError::InvalidData(format!(
                "required column `{column}` is missing from `entities`"
            )));
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

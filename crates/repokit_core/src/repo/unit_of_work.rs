//! Per-request unit of work.
//!
//! # Responsibility
//! - Keep an identity map of managed entity records with load-time snapshots.
//! - Write dirty diffs and scheduled deletes at flush, guarded by versions.
//! - Own the storage transaction boundary (`commit`/`rollback`).
//! - Run set-based bulk statements that bypass the identity map.
//!
//! # Invariants
//! - Within one unit, one id maps to exactly one managed record; repeated
//!   reads return the managed state, not a fresh row.
//! - The storage transaction opens lazily at the first write and is closed
//!   by `commit`, `rollback`, a conflict, or drop.
//! - Bulk statements leave managed records stale unless cleared.
//!
//! # See also
//! - `repo::crud` for the typed repository facade.

use crate::model::entity::{Entity, EntityId, EntityMeta, IdStrategy};
use crate::model::reference::Reference;
use crate::model::value::{Record, Value};
use crate::query::predicate::Predicate;
use crate::query::{LockMode, Query};
use crate::repo::hooks::{HookPipeline, HookStage};
use crate::repo::{RepoError, RepoResult};
use crate::storage::{Assignment, Mutation, Select, StorageBackend, StorageError};
use log::{debug, error, info, warn};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Maximum ids per `IN (...)` batch when resolving references.
pub const BATCH_FETCH_SIZE: usize = 100;

type EntityKey = (&'static str, EntityId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryStatus {
    Managed,
    /// Loaded with the read-only hint; never flushed.
    ReadOnly,
    Removed,
}

#[derive(Debug)]
struct ManagedEntry {
    meta: &'static EntityMeta,
    current: Record,
    snapshot: Record,
    status: EntryStatus,
}

#[derive(Debug, Default)]
struct UnitState {
    entries: BTreeMap<EntityKey, ManagedEntry>,
    removals: Vec<EntityKey>,
}

/// Options for set-based mutations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOptions {
    /// Clear the identity map after the statement so later reads reload.
    pub clear_automatically: bool,
}

impl BulkOptions {
    pub fn clearing() -> Self {
        Self {
            clear_automatically: true,
        }
    }
}

struct PlannedUpdate {
    key: EntityKey,
    meta: &'static EntityMeta,
    expected_version: Option<i64>,
    changes: Record,
    written: Record,
}

struct PlannedDelete {
    key: EntityKey,
    meta: &'static EntityMeta,
    expected_version: Option<i64>,
}

/// Identity map + change tracking + transaction boundary for one request.
pub struct UnitOfWork<'b> {
    id: Uuid,
    backend: &'b dyn StorageBackend,
    hooks: HookPipeline,
    state: RefCell<UnitState>,
    owns_txn: Cell<bool>,
}

impl<'b> UnitOfWork<'b> {
    pub fn new(backend: &'b dyn StorageBackend) -> Self {
        Self::with_hooks(backend, HookPipeline::new())
    }

    pub fn with_hooks(backend: &'b dyn StorageBackend, hooks: HookPipeline) -> Self {
        let id = Uuid::new_v4();
        debug!(
            "event=uow_begin module=repo status=ok uow_id={id} hooks={}",
            hooks.len()
        );
        Self {
            id,
            backend,
            hooks,
            state: RefCell::new(UnitState::default()),
            owns_txn: Cell::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether this unit currently holds the storage transaction.
    pub fn in_transaction(&self) -> bool {
        self.owns_txn.get()
    }

    /// Persists a new entity or merges a persisted one into the managed copy.
    ///
    /// Returns the managed state: identity, version and audit fields assigned.
    /// An entity holding a loaded but unsaved reference is rejected.
    pub fn save<E: Entity>(&self, entity: &E) -> RepoResult<E> {
        let meta = E::meta();
        let transient = entity.transient_references();
        if !transient.is_empty() {
            warn!(
                "event=uow_save module=repo status=error uow_id={} entity={} error_code=transient_reference columns={}",
                self.id,
                meta.name,
                transient.join(",")
            );
            return Err(RepoError::InvalidData(format!(
                "{} references an unsaved entity through {}",
                meta.name,
                transient.join(", ")
            )));
        }
        let record = entity.to_record();
        let stored = if entity.is_new() {
            self.persist(meta, record)?
        } else {
            let id = entity.id().ok_or_else(|| {
                RepoError::InvalidData(format!("{} without id is not new", meta.name))
            })?;
            self.merge(meta, id, record)?
        };
        Ok(E::from_record(&stored)?)
    }

    pub fn find<E: Entity>(&self, id: impl Into<EntityId>) -> RepoResult<Option<E>> {
        let meta = E::meta();
        match self.find_record(meta, id.into())? {
            Some(record) => Ok(Some(E::from_record(&record)?)),
            None => Ok(None),
        }
    }

    /// Whether the id is managed by this unit (and not scheduled for removal).
    pub fn contains(&self, meta: &'static EntityMeta, id: &EntityId) -> bool {
        self.state
            .borrow()
            .entries
            .get(&(meta.table, id.clone()))
            .is_some_and(|entry| entry.status != EntryStatus::Removed)
    }

    /// Runs a descriptor query. Pending changes are flushed first.
    pub fn query<E: Entity>(&self, query: &Query) -> RepoResult<Vec<E>> {
        self.query_window(query, 0, None)
    }

    /// Like `query`, restricted to rows `[offset, offset + limit)`.
    pub fn query_window<E: Entity>(
        &self,
        query: &Query,
        offset: u64,
        limit: Option<u64>,
    ) -> RepoResult<Vec<E>> {
        self.query_records(E::meta(), query, offset, limit)?
            .iter()
            .map(|record| E::from_record(record).map_err(RepoError::from))
            .collect()
    }

    /// Managed records matching `query`, registered in the identity map.
    pub(crate) fn query_records(
        &self,
        meta: &'static EntityMeta,
        query: &Query,
        offset: u64,
        limit: Option<u64>,
    ) -> RepoResult<Vec<Record>> {
        query.validate(meta)?;
        let select = Select::from(meta)
            .filter(query.filter.clone())
            .sort(query.sort.clone())
            .window(offset, limit)
            .lock(query.lock);
        self.load_records(&select, query.read_only)
    }

    pub fn count(&self, meta: &'static EntityMeta, filter: &Predicate) -> RepoResult<u64> {
        filter.validate(meta)?;
        self.flush()?;
        Ok(self.backend.count(meta, filter)?)
    }

    /// Schedules the entity for deletion at the next flush.
    pub fn remove<E: Entity>(&self, entity: &E) -> RepoResult<()> {
        let meta = E::meta();
        let id = entity.id().ok_or_else(|| {
            RepoError::InvalidData(format!("cannot delete unsaved {}", meta.name))
        })?;
        self.remove_by_id(meta, id)
    }

    pub fn remove_by_id(&self, meta: &'static EntityMeta, id: EntityId) -> RepoResult<()> {
        if self.find_record(meta, id.clone())?.is_none() {
            return Err(RepoError::NotFound {
                table: meta.table,
                id,
            });
        }
        let key = (meta.table, id);
        let mut state = self.state.borrow_mut();
        if let Some(entry) = state.entries.get_mut(&key) {
            entry.status = EntryStatus::Removed;
        }
        state.removals.push(key);
        Ok(())
    }

    /// Writes dirty managed records and scheduled deletes.
    pub fn flush(&self) -> RepoResult<()> {
        let (updates, deletes) = self.plan_flush();
        if updates.is_empty() && deletes.is_empty() {
            return Ok(());
        }
        self.ensure_txn()?;

        for update in &updates {
            let (table, id) = &update.key;
            let mutation = Mutation::Update {
                meta: update.meta,
                id: id.clone(),
                expected_version: update.expected_version,
                changes: update.changes.clone(),
            };
            let affected = self.execute_in_unit(&mutation)?;
            if affected == 0 {
                return Err(self.stale_write(*table, id, update.expected_version));
            }
            let mut state = self.state.borrow_mut();
            if let Some(entry) = state.entries.get_mut(&update.key) {
                let mut written = update.written.clone();
                if let Some(version) = update.meta.version_column {
                    written.set(version, update.expected_version.unwrap_or(0) + 1);
                }
                entry.snapshot = written.clone();
                entry.current = written;
            }
        }

        for delete in &deletes {
            let (table, id) = &delete.key;
            let mutation = Mutation::Delete {
                meta: delete.meta,
                id: id.clone(),
                expected_version: delete.expected_version,
            };
            let affected = self.execute_in_unit(&mutation)?;
            if affected == 0 {
                return Err(self.stale_write(*table, id, delete.expected_version));
            }
            let mut state = self.state.borrow_mut();
            state.entries.remove(&delete.key);
            state.removals.retain(|key| key != &delete.key);
        }

        debug!(
            "event=uow_flush module=repo status=ok uow_id={} updates={} deletes={}",
            self.id,
            updates.len(),
            deletes.len()
        );
        Ok(())
    }

    /// Flushes and commits the storage transaction, if one was opened.
    pub fn commit(self) -> RepoResult<()> {
        self.flush()?;
        if self.owns_txn.get() {
            if let Err(err) = self.backend.commit_unit() {
                error!(
                    "event=uow_commit module=repo status=error uow_id={} error={}",
                    self.id, err
                );
                return Err(err.into());
            }
            self.owns_txn.set(false);
        }
        info!("event=uow_commit module=repo status=ok uow_id={}", self.id);
        Ok(())
    }

    /// Discards pending changes and rolls back the storage transaction.
    pub fn rollback(self) -> RepoResult<()> {
        let result = self.abort();
        info!(
            "event=uow_rollback module=repo status={} uow_id={} reason=explicit",
            if result.is_ok() { "ok" } else { "error" },
            self.id
        );
        result
    }

    /// Detaches every managed entity. Pending changes are discarded.
    pub fn clear(&self) {
        let mut state = self.state.borrow_mut();
        state.entries.clear();
        state.removals.clear();
    }

    /// Detaches one entity. Pending changes to it are discarded.
    pub fn evict(&self, meta: &'static EntityMeta, id: &EntityId) {
        let key = (meta.table, id.clone());
        let mut state = self.state.borrow_mut();
        state.entries.remove(&key);
        state.removals.retain(|pending| pending != &key);
    }

    /// Set-based update. Bypasses the identity map: managed copies of the
    /// affected rows stay stale unless `options.clear_automatically` is set.
    /// Assignments are checked before anything is flushed, so a rejected
    /// statement leaves the unit untouched.
    pub fn bulk_update(
        &self,
        meta: &'static EntityMeta,
        assignments: Vec<(&'static str, Assignment)>,
        filter: Predicate,
        options: BulkOptions,
    ) -> RepoResult<u64> {
        for (column, assignment) in &assignments {
            assignment.validate(meta, column)?;
        }
        filter.validate(meta)?;
        self.flush()?;
        self.ensure_txn()?;
        let affected = self.execute_in_unit(&Mutation::BulkUpdate {
            meta,
            assignments,
            filter,
        })?;
        info!(
            "event=bulk_update module=repo status=ok uow_id={} table={} affected={affected} cleared={}",
            self.id, meta.table, options.clear_automatically
        );
        if options.clear_automatically {
            self.clear();
        }
        Ok(affected)
    }

    pub fn bulk_delete(
        &self,
        meta: &'static EntityMeta,
        filter: Predicate,
        options: BulkOptions,
    ) -> RepoResult<u64> {
        filter.validate(meta)?;
        self.flush()?;
        self.ensure_txn()?;
        let affected = self.execute_in_unit(&Mutation::BulkDelete { meta, filter })?;
        info!(
            "event=bulk_update module=repo status=ok uow_id={} table={} kind=delete affected={affected}",
            self.id, meta.table
        );
        if options.clear_automatically {
            self.clear();
        }
        Ok(affected)
    }

    /// Loads an unloaded reference. A dangling id is `NotFound`.
    pub fn resolve<T: Entity>(&self, reference: &mut Reference<T>) -> RepoResult<()> {
        if let Reference::Unloaded(id) = reference {
            let id = id.clone();
            let target = self
                .find::<T>(id.clone())?
                .ok_or(RepoError::NotFound {
                    table: T::meta().table,
                    id,
                })?;
            *reference = Reference::Loaded(target);
        }
        Ok(())
    }

    /// Loads many entities by id, reading managed copies first and fetching
    /// the rest in `IN` batches of `BATCH_FETCH_SIZE`.
    pub fn load_batch<T: Entity>(
        &self,
        ids: impl IntoIterator<Item = EntityId>,
    ) -> RepoResult<BTreeMap<EntityId, T>> {
        let meta = T::meta();
        let mut loaded = BTreeMap::new();
        let mut missing = Vec::new();
        for id in ids {
            if loaded.contains_key(&id) || missing.contains(&id) {
                continue;
            }
            match self.managed_record(meta, &id) {
                Some(record) => {
                    loaded.insert(id, T::from_record(&record)?);
                }
                None => missing.push(id),
            }
        }

        for batch in missing.chunks(BATCH_FETCH_SIZE) {
            let filter = Predicate::in_set(meta.id_column, batch.iter().map(EntityId::to_value));
            let select = Select::from(meta).filter(filter);
            for record in self.load_records(&select, false)? {
                if let Some(id) = EntityId::from_value(record.get(meta.id_column)) {
                    loaded.insert(id, T::from_record(&record)?);
                }
            }
        }
        Ok(loaded)
    }

    /// Runs backend-native SQL and registers the returned entities.
    pub fn native_query<E: Entity>(&self, sql: &str, params: &[Value]) -> RepoResult<Vec<E>> {
        let meta = E::meta();
        self.flush()?;
        let mut entities = Vec::new();
        for record in self.backend.native_select(sql, params)? {
            if let Some(managed) = self.register(meta, record, false) {
                entities.push(E::from_record(&managed)?);
            }
        }
        Ok(entities)
    }

    /// Runs backend-native SQL returning raw records (not registered).
    pub fn native_records(&self, sql: &str, params: &[Value]) -> RepoResult<Vec<Record>> {
        self.flush()?;
        Ok(self.backend.native_select(sql, params)?)
    }

    pub fn native_count(&self, sql: &str, params: &[Value]) -> RepoResult<u64> {
        self.flush()?;
        Ok(self.backend.native_count(sql, params)?)
    }

    /// Runs a projected select. Rows are returned as-is and not registered.
    pub(crate) fn select_projected(&self, select: &Select) -> RepoResult<Vec<Record>> {
        select.filter.validate(select.meta)?;
        select.sort.validate(select.meta)?;
        self.flush()?;
        Ok(self.backend.select(select)?)
    }

    /// Registered record for `id`, loading it from storage when unmanaged.
    pub(crate) fn find_record(
        &self,
        meta: &'static EntityMeta,
        id: EntityId,
    ) -> RepoResult<Option<Record>> {
        let key = (meta.table, id);
        if let Some(entry) = self.state.borrow().entries.get(&key) {
            return Ok(match entry.status {
                EntryStatus::Removed => None,
                EntryStatus::Managed | EntryStatus::ReadOnly => Some(entry.current.clone()),
            });
        }
        let (_, id) = key;
        let select = Select::from(meta).filter(Predicate::eq(meta.id_column, id.to_value()));
        Ok(self.load_records(&select, false)?.into_iter().next())
    }

    fn managed_record(&self, meta: &'static EntityMeta, id: &EntityId) -> Option<Record> {
        self.state
            .borrow()
            .entries
            .get(&(meta.table, id.clone()))
            .filter(|entry| entry.status != EntryStatus::Removed)
            .map(|entry| entry.current.clone())
    }

    fn load_records(&self, select: &Select, read_only: bool) -> RepoResult<Vec<Record>> {
        self.flush()?;
        if select.lock == LockMode::PessimisticWrite {
            self.ensure_txn()?;
        }
        let rows = self.backend.select(select)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| self.register(select.meta, row, read_only))
            .collect())
    }

    /// Adds a loaded row to the identity map. An already managed copy wins;
    /// rows scheduled for removal are dropped.
    fn register(&self, meta: &'static EntityMeta, row: Record, read_only: bool) -> Option<Record> {
        let Some(id) = EntityId::from_value(row.get(meta.id_column)) else {
            return Some(row);
        };
        let mut state = self.state.borrow_mut();
        let entry = state
            .entries
            .entry((meta.table, id))
            .or_insert_with(|| ManagedEntry {
                meta,
                snapshot: row.clone(),
                current: row,
                status: if read_only {
                    EntryStatus::ReadOnly
                } else {
                    EntryStatus::Managed
                },
            });
        match entry.status {
            EntryStatus::Removed => None,
            EntryStatus::Managed | EntryStatus::ReadOnly => Some(entry.current.clone()),
        }
    }

    fn persist(&self, meta: &'static EntityMeta, mut record: Record) -> RepoResult<Record> {
        self.hooks.run(HookStage::PrePersist, meta, &mut record);
        if let Some(version) = meta.version_column {
            record.set(version, 0);
        }
        if meta.id_strategy == IdStrategy::Assigned && record.get(meta.id_column).is_null() {
            return Err(RepoError::InvalidData(format!(
                "{} requires an assigned id before save",
                meta.name
            )));
        }

        self.ensure_txn()?;
        let result = self.backend.execute(&Mutation::Insert {
            meta,
            record: record.clone(),
        })?;
        if let Some(generated) = result.generated_id {
            if record.get(meta.id_column).is_null() {
                record.set(meta.id_column, generated);
            }
        }

        let Some(id) = EntityId::from_value(record.get(meta.id_column)) else {
            return Err(RepoError::InvalidData(format!(
                "{} insert returned no id",
                meta.name
            )));
        };
        self.state.borrow_mut().entries.insert(
            (meta.table, id),
            ManagedEntry {
                meta,
                current: record.clone(),
                snapshot: record.clone(),
                status: EntryStatus::Managed,
            },
        );
        Ok(record)
    }

    fn merge(&self, meta: &'static EntityMeta, id: EntityId, incoming: Record) -> RepoResult<Record> {
        if self.find_record(meta, id.clone())?.is_none() {
            return Err(RepoError::NotFound {
                table: meta.table,
                id,
            });
        }

        let mut state = self.state.borrow_mut();
        let key = (meta.table, id);
        let Some(entry) = state.entries.get_mut(&key) else {
            let (table, id) = key;
            return Err(RepoError::NotFound { table, id });
        };
        if let Some(version) = meta.version_column {
            let managed = entry.current.get(version).as_i64().unwrap_or(0);
            let expected = incoming.get(version).as_i64().unwrap_or(0);
            if managed != expected {
                let (table, id) = key;
                warn!(
                    "event=optimistic_conflict module=repo status=error uow_id={} table={table} id={id} expected_version={expected} managed_version={managed} stage=merge",
                    self.id
                );
                return Err(RepoError::ConcurrencyConflict {
                    table,
                    id,
                    expected_version: expected,
                });
            }
        }
        for field in meta.business_fields() {
            entry
                .current
                .set(field.name, incoming.get(field.name).clone());
        }
        Ok(entry.current.clone())
    }

    /// Collects dirty managed records and scheduled deletes. Pre-update
    /// hooks run here, on the managed copy.
    fn plan_flush(&self) -> (Vec<PlannedUpdate>, Vec<PlannedDelete>) {
        let mut state = self.state.borrow_mut();
        let mut updates = Vec::new();
        for (key, entry) in state.entries.iter_mut() {
            if entry.status != EntryStatus::Managed || !is_dirty(entry) {
                continue;
            }
            let meta = entry.meta;
            self.hooks
                .run(HookStage::PreUpdate, meta, &mut entry.current);

            let mut changes = Record::new();
            for (column, value) in entry.current.iter() {
                if column == meta.id_column || Some(column) == meta.version_column {
                    continue;
                }
                if entry.snapshot.get(column) != value {
                    changes.set(column, value.clone());
                }
            }
            updates.push(PlannedUpdate {
                key: key.clone(),
                meta,
                expected_version: version_of(meta, &entry.snapshot),
                changes,
                written: entry.current.clone(),
            });
        }

        let deletes = state
            .removals
            .iter()
            .filter_map(|key| {
                state.entries.get(key).map(|entry| PlannedDelete {
                    key: key.clone(),
                    meta: entry.meta,
                    expected_version: version_of(entry.meta, &entry.snapshot),
                })
            })
            .collect();
        (updates, deletes)
    }

    fn ensure_txn(&self) -> RepoResult<()> {
        if self.owns_txn.get() {
            return Ok(());
        }
        if self.backend.in_unit() {
            return Err(RepoError::Storage(StorageError::Transaction(
                "storage transaction is held by another unit".to_string(),
            )));
        }
        self.backend.begin_unit()?;
        self.owns_txn.set(true);
        debug!("event=uow_begin module=repo status=ok uow_id={} stage=txn", self.id);
        Ok(())
    }

    /// Executes a write; a storage failure rolls the unit back.
    fn execute_in_unit(&self, mutation: &Mutation) -> RepoResult<u64> {
        match self.backend.execute(mutation) {
            Ok(result) => Ok(result.affected),
            Err(err) => {
                error!(
                    "event=uow_flush module=repo status=error uow_id={} kind={} table={} error={}",
                    self.id,
                    mutation.kind(),
                    mutation.meta().table,
                    err
                );
                let _ = self.abort();
                Err(err.into())
            }
        }
    }

    fn stale_write(&self, table: &'static str, id: &EntityId, expected: Option<i64>) -> RepoError {
        let _ = self.abort();
        match expected {
            Some(expected_version) => {
                warn!(
                    "event=optimistic_conflict module=repo status=error uow_id={} table={table} id={id} expected_version={expected_version}",
                    self.id
                );
                RepoError::ConcurrencyConflict {
                    table,
                    id: id.clone(),
                    expected_version,
                }
            }
            None => RepoError::NotFound {
                table,
                id: id.clone(),
            },
        }
    }

    /// Rolls back the storage transaction and detaches everything.
    fn abort(&self) -> RepoResult<()> {
        self.clear();
        if !self.owns_txn.get() {
            return Ok(());
        }
        self.owns_txn.set(false);
        self.backend.rollback_unit()?;
        Ok(())
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.owns_txn.get() {
            return;
        }
        let status = match self.abort() {
            Ok(()) => "ok",
            Err(_) => "error",
        };
        warn!(
            "event=uow_rollback module=repo status={status} uow_id={} reason=dropped_uncommitted",
            self.id
        );
    }
}

fn is_dirty(entry: &ManagedEntry) -> bool {
    entry
        .meta
        .business_fields()
        .any(|field| entry.current.get(field.name) != entry.snapshot.get(field.name))
}

fn version_of(meta: &'static EntityMeta, record: &Record) -> Option<i64> {
    meta.version_column
        .map(|column| record.get(column).as_i64().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::{BulkOptions, UnitOfWork};
    use crate::model::entity::{Entity, EntityId};
    use crate::model::member::{Member, MEMBER_META};
    use crate::model::team::Team;
    use crate::model::value::Value;
    use crate::query::predicate::Predicate;
    use crate::query::{Query, QueryError};
    use crate::repo::RepoError;
    use crate::storage::memory::MemoryBackend;
    use crate::storage::{Assignment, StorageBackend};

    #[test]
    fn repeated_find_returns_managed_state() {
        let backend = MemoryBackend::new();
        let uow = UnitOfWork::new(&backend);
        let saved = uow.save(&Member::with_age("member1", 10)).unwrap();

        let mut changed = saved.clone();
        changed.age = 11;
        uow.save(&changed).unwrap();

        let found: Member = uow.find(saved.id.unwrap()).unwrap().unwrap();
        assert_eq!(found.age, 11);
    }

    #[test]
    fn commit_writes_dirty_diff_and_bumps_version() {
        let backend = MemoryBackend::new();
        let uow = UnitOfWork::new(&backend);
        let mut member = uow.save(&Member::with_age("member1", 10)).unwrap();
        member.age = 20;
        uow.save(&member).unwrap();
        uow.commit().unwrap();

        let uow = UnitOfWork::new(&backend);
        let reloaded: Member = uow.find(member.id.unwrap()).unwrap().unwrap();
        assert_eq!(reloaded.age, 20);
        assert_eq!(reloaded.version, 1);
    }

    #[test]
    fn drop_without_commit_rolls_back() {
        let backend = MemoryBackend::new();
        {
            let uow = UnitOfWork::new(&backend);
            uow.save(&Member::new("transient")).unwrap();
            assert!(backend.in_unit());
        }
        assert!(!backend.in_unit());
        assert_eq!(backend.row_count(&MEMBER_META), 0);
    }

    #[test]
    fn merge_with_stale_version_conflicts() {
        let backend = MemoryBackend::new();
        let uow = UnitOfWork::new(&backend);
        let mut member = uow.save(&Member::new("member1")).unwrap();
        member.version = 5;

        let err = uow.save(&member).unwrap_err();
        assert!(matches!(
            err,
            RepoError::ConcurrencyConflict {
                expected_version: 5,
                ..
            }
        ));
    }

    #[test]
    fn merge_of_missing_row_is_not_found() {
        let backend = MemoryBackend::new();
        let uow = UnitOfWork::new(&backend);
        let mut ghost = Member::new("ghost");
        ghost.id = Some(42);

        let err = uow.save(&ghost).unwrap_err();
        assert!(matches!(err, RepoError::NotFound { table: "member", .. }));
    }

    #[test]
    fn bulk_update_leaves_managed_copies_stale_until_cleared() {
        let backend = MemoryBackend::new();
        let uow = UnitOfWork::new(&backend);
        let member = uow.save(&Member::with_age("member1", 20)).unwrap();
        let id = member.id.unwrap();

        let affected = uow
            .bulk_update(
                &MEMBER_META,
                vec![("age", Assignment::Add(1))],
                Predicate::ge("age", 20),
                BulkOptions::default(),
            )
            .unwrap();
        assert_eq!(affected, 1);

        let stale: Member = uow.find(id).unwrap().unwrap();
        assert_eq!(stale.age, 20);

        uow.evict(Member::meta(), &EntityId::Int(id));
        let fresh: Member = uow.find(id).unwrap().unwrap();
        assert_eq!(fresh.age, 21);
    }

    #[test]
    fn removed_entities_disappear_from_queries() {
        let backend = MemoryBackend::new();
        let uow = UnitOfWork::new(&backend);
        let member = uow.save(&Member::new("member1")).unwrap();
        uow.save(&Member::new("member2")).unwrap();
        uow.remove(&member).unwrap();

        let remaining: Vec<Member> = uow.query(&Query::all()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].username, "member2");
        assert_eq!(uow.find::<Member>(member.id.unwrap()).unwrap(), None);
    }

    #[test]
    fn rejected_assignment_keeps_earlier_writes() {
        let backend = MemoryBackend::new();
        let uow = UnitOfWork::new(&backend);
        uow.save(&Member::with_age("member1", 10)).unwrap();

        let err = uow
            .bulk_update(
                &MEMBER_META,
                vec![("version", Assignment::Set(Value::from(0_i64)))],
                Predicate::All,
                BulkOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            RepoError::Validation(QueryError::ImmutableField {
                field: "version",
                ..
            })
        ));
        assert!(uow.in_transaction());
        assert_eq!(uow.count(&MEMBER_META, &Predicate::All).unwrap(), 1);
    }

    #[test]
    fn member_with_unsaved_loaded_team_is_rejected() {
        let backend = MemoryBackend::new();
        let uow = UnitOfWork::new(&backend);

        let err = uow
            .save(&Member::with_team("member1", 10, &Team::new("unsaved")))
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidData(message) if message.contains("team_id")));
        assert!(!uow.in_transaction());
        assert_eq!(backend.row_count(&MEMBER_META), 0);
    }
}

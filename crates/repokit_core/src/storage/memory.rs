//! In-memory `StorageBackend` used for tests and embedding without SQLite.
//!
//! # Responsibility
//! - Store rows per table keyed by id, with generated integer keys.
//! - Evaluate predicates, sorting and projections with the same observable
//!   results as the SQLite backend.
//!
//! # Invariants
//! - A unit snapshot is taken at `begin_unit`; `rollback_unit` restores it.
//! - Ordering compares `Value`s (null first) and always ends with the id.

use crate::model::entity::{EntityMeta, IdStrategy};
use crate::model::value::{Record, Value};
use crate::query::predicate::{Condition, Predicate};
use crate::query::sort::{Direction, Sort};
use crate::query::LockMode;
use crate::storage::{
    mapped_column, Assignment, Columns, Mutation, MutationResult, Select, SelectColumn,
    StorageBackend, StorageError, StorageResult,
};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    rows: BTreeMap<Value, Record>,
    last_id: i64,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<&'static str, MemoryTable>,
    snapshot: Option<BTreeMap<&'static str, MemoryTable>>,
}

impl MemoryState {
    fn row(&self, meta: &'static EntityMeta, id: &Value) -> Option<&Record> {
        self.tables.get(meta.table).and_then(|table| table.rows.get(id))
    }

    fn matching_ids(
        &self,
        meta: &'static EntityMeta,
        filter: &Predicate,
    ) -> StorageResult<Vec<Value>> {
        check_predicate(meta, filter)?;
        let lookup = |target: &'static EntityMeta, id: &Value| -> Option<Record> {
            self.row(target, id).cloned()
        };
        Ok(self
            .tables
            .get(meta.table)
            .map(|table| {
                table
                    .rows
                    .iter()
                    .filter(|(_, record)| filter.matches(record, &lookup))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Storage backend holding every table in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RefCell<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows in `meta`'s table.
    pub fn row_count(&self, meta: &'static EntityMeta) -> usize {
        self.state
            .borrow()
            .tables
            .get(meta.table)
            .map_or(0, |table| table.rows.len())
    }
}

impl StorageBackend for MemoryBackend {
    fn select(&self, select: &Select) -> StorageResult<Vec<Record>> {
        if select.lock == LockMode::PessimisticWrite && !self.in_unit() {
            return Err(StorageError::Transaction(
                "pessimistic read requires an open unit".to_string(),
            ));
        }
        let meta = select.meta;
        let state = self.state.borrow();
        let ids = state.matching_ids(meta, &select.filter)?;
        let mut rows: Vec<&Record> = ids.iter().filter_map(|id| state.row(meta, id)).collect();

        let keys = sort_keys(meta, &select.sort)?;
        rows.sort_by(|left, right| compare_rows(&keys, meta.id_column, left, right));

        let offset = usize::try_from(select.offset).unwrap_or(usize::MAX);
        let limit = select
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));

        rows.into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| project(&state, meta, &select.columns, row))
            .collect()
    }

    fn count(&self, meta: &'static EntityMeta, filter: &Predicate) -> StorageResult<u64> {
        let state = self.state.borrow();
        Ok(state.matching_ids(meta, filter)?.len() as u64)
    }

    fn execute(&self, mutation: &Mutation) -> StorageResult<MutationResult> {
        let meta = mutation.meta();
        let mut state = self.state.borrow_mut();
        match mutation {
            Mutation::Insert { record, .. } => insert(&mut state, meta, record),
            Mutation::Update {
                id,
                expected_version,
                changes,
                ..
            } => {
                for (column, _) in changes.iter() {
                    mapped_column(meta, column)?;
                }
                let key = id.to_value();
                let Some(row) = state
                    .tables
                    .get_mut(meta.table)
                    .and_then(|table| table.rows.get_mut(&key))
                else {
                    return Ok(MutationResult::default());
                };
                if !version_matches(meta, row, *expected_version) {
                    return Ok(MutationResult::default());
                }
                for (column, value) in changes.iter() {
                    if column == meta.id_column || Some(column) == meta.version_column {
                        continue;
                    }
                    row.set(column, value.clone());
                }
                if let Some(version) = meta.version_column {
                    let next = row.get(version).as_i64().unwrap_or(0) + 1;
                    row.set(version, next);
                }
                Ok(MutationResult {
                    affected: 1,
                    generated_id: None,
                })
            }
            Mutation::Delete {
                id,
                expected_version,
                ..
            } => {
                let key = id.to_value();
                let Some(table) = state.tables.get_mut(meta.table) else {
                    return Ok(MutationResult::default());
                };
                let matches = table
                    .rows
                    .get(&key)
                    .is_some_and(|row| version_matches(meta, row, *expected_version));
                if !matches {
                    return Ok(MutationResult::default());
                }
                table.rows.remove(&key);
                Ok(MutationResult {
                    affected: 1,
                    generated_id: None,
                })
            }
            Mutation::BulkUpdate {
                assignments,
                filter,
                ..
            } => {
                for (column, _) in assignments {
                    mapped_column(meta, column)?;
                }
                let ids = state.matching_ids(meta, filter)?;
                // Stage every row first so a failing assignment writes nothing.
                let mut staged = Vec::with_capacity(ids.len());
                for id in &ids {
                    let Some(row) = state.row(meta, id) else {
                        continue;
                    };
                    let mut next = row.clone();
                    for (column, assignment) in assignments {
                        let value = assigned_value(meta, column, assignment, next.get(column))?;
                        next.set(*column, value);
                    }
                    staged.push((id.clone(), next));
                }
                if let Some(table) = state.tables.get_mut(meta.table) {
                    for (id, row) in staged {
                        table.rows.insert(id, row);
                    }
                }
                Ok(MutationResult {
                    affected: ids.len() as u64,
                    generated_id: None,
                })
            }
            Mutation::BulkDelete { filter, .. } => {
                let ids = state.matching_ids(meta, filter)?;
                if let Some(table) = state.tables.get_mut(meta.table) {
                    for id in &ids {
                        table.rows.remove(id);
                    }
                }
                Ok(MutationResult {
                    affected: ids.len() as u64,
                    generated_id: None,
                })
            }
        }
    }

    fn begin_unit(&self) -> StorageResult<()> {
        let mut state = self.state.borrow_mut();
        if state.snapshot.is_some() {
            return Err(StorageError::Transaction("unit already open".to_string()));
        }
        state.snapshot = Some(state.tables.clone());
        Ok(())
    }

    fn commit_unit(&self) -> StorageResult<()> {
        let mut state = self.state.borrow_mut();
        if state.snapshot.take().is_none() {
            return Err(StorageError::Transaction("no open unit to commit".to_string()));
        }
        Ok(())
    }

    fn rollback_unit(&self) -> StorageResult<()> {
        let mut state = self.state.borrow_mut();
        match state.snapshot.take() {
            Some(tables) => {
                state.tables = tables;
                Ok(())
            }
            None => Err(StorageError::Transaction(
                "no open unit to roll back".to_string(),
            )),
        }
    }

    fn in_unit(&self) -> bool {
        self.state.borrow().snapshot.is_some()
    }
}

fn insert(
    state: &mut MemoryState,
    meta: &'static EntityMeta,
    record: &Record,
) -> StorageResult<MutationResult> {
    let mut row = Record::new();
    for field in meta.fields {
        row.set(field.name, Value::Null);
    }
    for (column, value) in record.iter() {
        row.set(mapped_column(meta, column)?, value.clone());
    }
    if let Some(version) = meta.version_column {
        if row.get(version).is_null() {
            row.set(version, 0);
        }
    }

    let table = state.tables.entry(meta.table).or_default();
    let mut generated_id = None;
    let key = match (meta.id_strategy, row.get(meta.id_column).clone()) {
        (IdStrategy::Generated, Value::Null) => {
            table.last_id += 1;
            generated_id = Some(table.last_id);
            Value::Integer(table.last_id)
        }
        (_, Value::Null) => {
            return Err(StorageError::Constraint(format!(
                "{} requires an assigned id",
                meta.table
            )))
        }
        (strategy, key) => {
            if let (IdStrategy::Generated, Some(id)) = (strategy, key.as_i64()) {
                table.last_id = table.last_id.max(id);
                generated_id = Some(id);
            }
            key
        }
    };
    if table.rows.contains_key(&key) {
        return Err(StorageError::Constraint(format!(
            "duplicate id {key} in {}",
            meta.table
        )));
    }
    row.set(meta.id_column, key.clone());
    table.rows.insert(key, row);
    Ok(MutationResult {
        affected: 1,
        generated_id,
    })
}

fn version_matches(meta: &'static EntityMeta, row: &Record, expected: Option<i64>) -> bool {
    match (meta.version_column, expected) {
        (Some(version), Some(expected)) => row.get(version).as_i64() == Some(expected),
        _ => true,
    }
}

fn sort_keys(
    meta: &'static EntityMeta,
    sort: &Sort,
) -> StorageResult<Vec<(&'static str, Direction)>> {
    sort.orders()
        .iter()
        .map(|order| Ok((mapped_column(meta, order.field.as_str())?, order.direction)))
        .collect()
}

fn compare_rows(
    keys: &[(&'static str, Direction)],
    id_column: &str,
    left: &Record,
    right: &Record,
) -> Ordering {
    keys.iter()
        .map(|(column, direction)| {
            let ordering = left.get(column).cmp(right.get(column));
            match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            }
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or_else(|| left.get(id_column).cmp(right.get(id_column)))
}

fn project(
    state: &MemoryState,
    meta: &'static EntityMeta,
    columns: &Columns,
    row: &Record,
) -> StorageResult<Record> {
    let Columns::Only(columns) = columns else {
        return Ok(row.clone());
    };
    let mut projected = Record::new();
    for column in columns {
        match column {
            SelectColumn::Field(name) => {
                let name = mapped_column(meta, name)?;
                projected.set(name, row.get(name).clone());
            }
            SelectColumn::Related {
                via,
                target,
                column,
                alias,
            } => {
                let via = mapped_column(meta, via)?;
                let column = mapped_column(*target, column)?;
                let value = state
                    .row(*target, row.get(via))
                    .map_or(Value::Null, |related| related.get(column).clone());
                projected.set(*alias, value);
            }
        }
    }
    Ok(projected)
}

/// Rejects unmapped columns the same way SQL compilation does.
fn check_predicate(meta: &'static EntityMeta, predicate: &Predicate) -> StorageResult<()> {
    match predicate {
        Predicate::All => Ok(()),
        Predicate::Condition(condition) => {
            mapped_column(meta, condition.field())?;
            if let Condition::Related {
                target, predicate, ..
            } = condition
            {
                check_predicate(*target, predicate)?;
            }
            Ok(())
        }
        Predicate::And(left, right) | Predicate::Or(left, right) => {
            check_predicate(meta, left)?;
            check_predicate(meta, right)
        }
        Predicate::Not(inner) => check_predicate(meta, inner),
    }
}

fn assigned_value(
    meta: &'static EntityMeta,
    column: &str,
    assignment: &Assignment,
    current: &Value,
) -> StorageResult<Value> {
    match (assignment, current) {
        (Assignment::Set(value), _) => Ok(value.clone()),
        (Assignment::Add(delta), Value::Integer(current)) => current
            .checked_add(*delta)
            .map(Value::Integer)
            .ok_or_else(|| {
                StorageError::InvalidRow(format!(
                    "integer overflow adding {delta} to {}.{column} = {current}",
                    meta.table
                ))
            }),
        (Assignment::Add(_), other) => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryBackend;
    use crate::model::member::MEMBER_META;
    use crate::model::value::Record;
    use crate::query::predicate::Predicate;
    use crate::storage::{Assignment, Mutation, Select, StorageBackend, StorageError};

    fn insert_member(backend: &MemoryBackend, username: &str, age: i64) -> i64 {
        backend
            .execute(&Mutation::Insert {
                meta: &MEMBER_META,
                record: Record::new().with("username", username).with("age", age),
            })
            .unwrap()
            .generated_id
            .unwrap()
    }

    #[test]
    fn generated_ids_increase_from_one() {
        let backend = MemoryBackend::new();
        assert_eq!(insert_member(&backend, "a", 1), 1);
        assert_eq!(insert_member(&backend, "b", 2), 2);
        assert_eq!(backend.row_count(&MEMBER_META), 2);
    }

    #[test]
    fn rollback_restores_snapshot() {
        let backend = MemoryBackend::new();
        insert_member(&backend, "kept", 1);
        backend.begin_unit().unwrap();
        insert_member(&backend, "dropped", 2);
        backend.rollback_unit().unwrap();

        let rows = backend.select(&Select::from(&MEMBER_META)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("username").unwrap(), "kept");
        assert!(!backend.in_unit());
    }

    #[test]
    fn versioned_update_with_stale_version_affects_nothing() {
        let backend = MemoryBackend::new();
        let id = insert_member(&backend, "a", 1);
        let stale = Mutation::Update {
            meta: &MEMBER_META,
            id: id.into(),
            expected_version: Some(7),
            changes: Record::new().with("age", 2),
        };
        assert_eq!(backend.execute(&stale).unwrap().affected, 0);

        let count = backend
            .count(&MEMBER_META, &Predicate::eq("age", 1))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn overflowing_increment_fails_without_partial_writes() {
        let backend = MemoryBackend::new();
        insert_member(&backend, "small", 1);
        insert_member(&backend, "huge", i64::MAX);

        let bump = Mutation::BulkUpdate {
            meta: &MEMBER_META,
            assignments: vec![("age", Assignment::Add(1))],
            filter: Predicate::All,
        };
        assert!(matches!(
            backend.execute(&bump),
            Err(StorageError::InvalidRow(_))
        ));

        assert_eq!(
            backend
                .count(&MEMBER_META, &Predicate::eq("age", 1))
                .unwrap(),
            1
        );
        assert_eq!(
            backend
                .count(&MEMBER_META, &Predicate::eq("age", i64::MAX))
                .unwrap(),
            1
        );
    }
}

//! SQLite implementation of `StorageBackend`.
//!
//! # Responsibility
//! - Compile selects, predicates and mutations into parameterized SQL.
//! - Map the storage unit onto one `BEGIN IMMEDIATE` transaction.
//!
//! # Invariants
//! - Only identifiers taken from `'static` entity metadata are spliced into
//!   SQL; every caller value travels as a bound parameter.
//! - Every ordered select ends with `<id> ASC` so pages are deterministic.
//! - Versioned updates bump the version column in the same statement.

use crate::db::{open_db, open_db_in_memory};
use crate::model::entity::{EntityMeta, IdStrategy};
use crate::model::value::{Record, Value};
use crate::query::predicate::{Condition, Predicate};
use crate::query::sort::Sort;
use crate::query::LockMode;
use crate::storage::{
    mapped_column, Assignment, Columns, Mutation, MutationResult, Select, SelectColumn,
    StorageBackend, StorageError, StorageResult,
};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::path::Path;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Storage backend over one migrated SQLite connection.
///
/// Every unit of work built on this value runs on the same connection, so
/// uncommitted writes of the unit holding the transaction are visible to
/// the others. Open a second backend on the same file for isolation.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Wraps an already migrated connection (see `db::open_db`).
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn query_records(&self, sql: &str, params: &[Value]) -> StorageResult<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut rows = stmt.query(params_from_iter(params.iter().map(to_sql_value)))?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Record::new();
            for (index, name) in names.iter().enumerate() {
                record.set(name.as_str(), from_value_ref(name, row.get_ref(index)?)?);
            }
            records.push(record);
        }
        Ok(records)
    }

    fn query_count(&self, sql: &str, params: &[Value]) -> StorageResult<u64> {
        let count = self.conn.query_row(
            sql,
            params_from_iter(params.iter().map(to_sql_value)),
            |row| row.get::<_, i64>(0),
        )?;
        u64::try_from(count).map_err(|_| StorageError::InvalidRow(format!("negative count {count}")))
    }

    fn run(&self, sql: &str, params: &[Value]) -> StorageResult<u64> {
        let affected = self
            .conn
            .execute(sql, params_from_iter(params.iter().map(to_sql_value)))?;
        Ok(affected as u64)
    }

    /// SQLite widens an overflowing integer sum to REAL instead of failing.
    fn reject_overflow(
        &self,
        meta: &'static EntityMeta,
        column: &str,
        delta: i64,
        filter: &Predicate,
    ) -> StorageResult<()> {
        let table = identifier(meta.table)?;
        let mut builder = SqlBuilder::default();
        builder.push(&format!(
            "SELECT COUNT(*) FROM {table} WHERE typeof({column} + ?) = 'real' AND ("
        ));
        builder.params.push(Value::Integer(delta));
        builder.compile_predicate(meta, table, filter, 0)?;
        builder.push(")");
        if self.query_count(&builder.sql, &builder.params)? > 0 {
            return Err(StorageError::InvalidRow(format!(
                "integer overflow adding {delta} to {}.{column}",
                meta.table
            )));
        }
        Ok(())
    }
}

impl StorageBackend for SqliteBackend {
    fn select(&self, select: &Select) -> StorageResult<Vec<Record>> {
        if select.lock == LockMode::PessimisticWrite && !self.in_unit() {
            return Err(StorageError::Transaction(
                "pessimistic read requires an open unit".to_string(),
            ));
        }
        let mut builder = SqlBuilder::default();
        builder.compile_select(select)?;
        self.query_records(&builder.sql, &builder.params)
    }

    fn count(&self, meta: &'static EntityMeta, filter: &Predicate) -> StorageResult<u64> {
        let mut builder = SqlBuilder::default();
        let table = identifier(meta.table)?;
        builder.push(&format!("SELECT COUNT(*) FROM {table} WHERE "));
        builder.compile_predicate(meta, table, filter, 0)?;
        self.query_count(&builder.sql, &builder.params)
    }

    fn execute(&self, mutation: &Mutation) -> StorageResult<MutationResult> {
        let meta = mutation.meta();
        match mutation {
            Mutation::Insert { record, .. } => self.insert(meta, record),
            Mutation::Update {
                id,
                expected_version,
                changes,
                ..
            } => {
                let table = identifier(meta.table)?;
                let mut builder = SqlBuilder::default();
                let mut sets = Vec::new();
                for (column, value) in changes.iter() {
                    let column = identifier(mapped_column(meta, column)?)?;
                    if column == meta.id_column || Some(column) == meta.version_column {
                        continue;
                    }
                    sets.push(format!("{column} = ?"));
                    builder.params.push(value.clone());
                }
                if let Some(version) = meta.version_column {
                    let version = identifier(version)?;
                    sets.push(format!("{version} = {version} + 1"));
                }
                if sets.is_empty() {
                    return Ok(MutationResult::default());
                }

                let id_column = identifier(meta.id_column)?;
                builder.push(&format!(
                    "UPDATE {table} SET {} WHERE {id_column} = ?",
                    sets.join(", ")
                ));
                builder.params.push(id.to_value());
                builder.push_version_guard(meta, *expected_version)?;
                let affected = self.run(&builder.sql, &builder.params)?;
                Ok(MutationResult {
                    affected,
                    generated_id: None,
                })
            }
            Mutation::Delete {
                id,
                expected_version,
                ..
            } => {
                let table = identifier(meta.table)?;
                let id_column = identifier(meta.id_column)?;
                let mut builder = SqlBuilder::default();
                builder.push(&format!("DELETE FROM {table} WHERE {id_column} = ?"));
                builder.params.push(id.to_value());
                builder.push_version_guard(meta, *expected_version)?;
                let affected = self.run(&builder.sql, &builder.params)?;
                Ok(MutationResult {
                    affected,
                    generated_id: None,
                })
            }
            Mutation::BulkUpdate {
                assignments,
                filter,
                ..
            } => {
                let table = identifier(meta.table)?;
                let mut builder = SqlBuilder::default();
                let mut sets = Vec::with_capacity(assignments.len());
                for (column, assignment) in assignments {
                    let column = identifier(mapped_column(meta, column)?)?;
                    match assignment {
                        Assignment::Set(value) => {
                            sets.push(format!("{column} = ?"));
                            builder.params.push(value.clone());
                        }
                        Assignment::Add(delta) => {
                            self.reject_overflow(meta, column, *delta, filter)?;
                            sets.push(format!("{column} = {column} + ?"));
                            builder.params.push(Value::Integer(*delta));
                        }
                    }
                }
                if sets.is_empty() {
                    return Ok(MutationResult::default());
                }
                builder.push(&format!("UPDATE {table} SET {} WHERE ", sets.join(", ")));
                builder.compile_predicate(meta, table, filter, 0)?;
                let affected = self.run(&builder.sql, &builder.params)?;
                Ok(MutationResult {
                    affected,
                    generated_id: None,
                })
            }
            Mutation::BulkDelete { filter, .. } => {
                let table = identifier(meta.table)?;
                let mut builder = SqlBuilder::default();
                builder.push(&format!("DELETE FROM {table} WHERE "));
                builder.compile_predicate(meta, table, filter, 0)?;
                let affected = self.run(&builder.sql, &builder.params)?;
                Ok(MutationResult {
                    affected,
                    generated_id: None,
                })
            }
        }
    }

    fn begin_unit(&self) -> StorageResult<()> {
        if self.in_unit() {
            return Err(StorageError::Transaction("unit already open".to_string()));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(())
    }

    fn commit_unit(&self) -> StorageResult<()> {
        if !self.in_unit() {
            return Err(StorageError::Transaction("no open unit to commit".to_string()));
        }
        self.conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    fn rollback_unit(&self) -> StorageResult<()> {
        if !self.in_unit() {
            return Err(StorageError::Transaction(
                "no open unit to roll back".to_string(),
            ));
        }
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }

    fn in_unit(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn native_select(&self, sql: &str, params: &[Value]) -> StorageResult<Vec<Record>> {
        self.query_records(sql, params)
    }

    fn native_count(&self, sql: &str, params: &[Value]) -> StorageResult<u64> {
        self.query_count(sql, params)
    }
}

impl SqliteBackend {
    fn insert(&self, meta: &'static EntityMeta, record: &Record) -> StorageResult<MutationResult> {
        let table = identifier(meta.table)?;
        let mut columns = Vec::with_capacity(record.len());
        let mut params = Vec::with_capacity(record.len());
        for (column, value) in record.iter() {
            let column = identifier(mapped_column(meta, column)?)?;
            // Generated keys are left to SQLite when the caller has none.
            if column == meta.id_column && value.is_null() {
                continue;
            }
            columns.push(column);
            params.push(value.clone());
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );
        let affected = self.run(&sql, &params)?;
        let generated_id = match meta.id_strategy {
            IdStrategy::Generated => Some(self.conn.last_insert_rowid()),
            IdStrategy::Assigned => None,
        };
        Ok(MutationResult {
            affected,
            generated_id,
        })
    }
}

#[derive(Default)]
struct SqlBuilder {
    sql: String,
    params: Vec<Value>,
}

impl SqlBuilder {
    fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    fn compile_select(&mut self, select: &Select) -> StorageResult<()> {
        let meta = select.meta;
        let table = identifier(meta.table)?;
        let columns = match &select.columns {
            Columns::All => meta
                .fields
                .iter()
                .map(|field| Ok(format!("{table}.{}", identifier(field.name)?)))
                .collect::<StorageResult<Vec<_>>>()?,
            Columns::Only(columns) => columns
                .iter()
                .map(|column| select_column(meta, table, column))
                .collect::<StorageResult<Vec<_>>>()?,
        };

        self.push(&format!("SELECT {} FROM {table} WHERE ", columns.join(", ")));
        self.compile_predicate(meta, table, &select.filter, 0)?;
        self.compile_sort(meta, table, &select.sort)?;

        match (select.limit, select.offset) {
            (Some(limit), offset) => {
                self.push(" LIMIT ? OFFSET ?");
                self.params.push(count_value(limit));
                self.params.push(count_value(offset));
            }
            (None, 0) => {}
            (None, offset) => {
                self.push(" LIMIT -1 OFFSET ?");
                self.params.push(count_value(offset));
            }
        }
        Ok(())
    }

    fn compile_sort(
        &mut self,
        meta: &'static EntityMeta,
        qualifier: &str,
        sort: &Sort,
    ) -> StorageResult<()> {
        let mut keys = Vec::with_capacity(sort.orders().len() + 1);
        for order in sort.orders() {
            let column = identifier(mapped_column(meta, order.field.as_str())?)?;
            keys.push(format!("{qualifier}.{column} {}", order.direction.sql()));
        }
        keys.push(format!("{qualifier}.{} ASC", identifier(meta.id_column)?));
        self.push(&format!(" ORDER BY {}", keys.join(", ")));
        Ok(())
    }

    fn compile_predicate(
        &mut self,
        meta: &'static EntityMeta,
        qualifier: &str,
        predicate: &Predicate,
        depth: usize,
    ) -> StorageResult<()> {
        match predicate {
            Predicate::All => self.push("1 = 1"),
            Predicate::Condition(condition) => {
                self.compile_condition(meta, qualifier, condition, depth)?;
            }
            Predicate::And(left, right) | Predicate::Or(left, right) => {
                let joiner = if matches!(predicate, Predicate::And(..)) {
                    " AND "
                } else {
                    " OR "
                };
                self.push("(");
                self.compile_predicate(meta, qualifier, left, depth)?;
                self.push(joiner);
                self.compile_predicate(meta, qualifier, right, depth)?;
                self.push(")");
            }
            Predicate::Not(inner) => {
                // Unknown (null) comparisons count as false before negation.
                self.push("NOT COALESCE((");
                self.compile_predicate(meta, qualifier, inner, depth)?;
                self.push("), 0)");
            }
        }
        Ok(())
    }

    fn compile_condition(
        &mut self,
        meta: &'static EntityMeta,
        qualifier: &str,
        condition: &Condition,
        depth: usize,
    ) -> StorageResult<()> {
        let column = identifier(mapped_column(meta, condition.field())?)?;
        let cell = format!("{qualifier}.{column}");
        match condition {
            Condition::Compare { op, value, .. } => {
                self.push(&format!("{cell} {} ?", op.sql()));
                self.params.push(value.clone());
            }
            Condition::In { values, .. } => {
                if values.is_empty() {
                    self.push("0 = 1");
                } else {
                    let placeholders = vec!["?"; values.len()].join(", ");
                    self.push(&format!("{cell} IN ({placeholders})"));
                    self.params.extend(values.iter().cloned());
                }
            }
            Condition::StartsWith { prefix, .. } => {
                // substr keeps the match case-sensitive, unlike LIKE.
                self.push(&format!("substr({cell}, 1, ?) = ?"));
                self.params
                    .push(Value::Integer(prefix.chars().count() as i64));
                self.params.push(Value::Text(prefix.clone()));
            }
            Condition::IsNull { .. } => self.push(&format!("{cell} IS NULL")),
            Condition::Related {
                target, predicate, ..
            } => {
                let alias = format!("r{}", depth + 1);
                let target_table = identifier(target.table)?;
                let target_id = identifier(target.id_column)?;
                self.push(&format!(
                    "{cell} IN (SELECT {alias}.{target_id} FROM {target_table} AS {alias} WHERE "
                ));
                self.compile_predicate(*target, &alias, predicate, depth + 1)?;
                self.push(")");
            }
        }
        Ok(())
    }

    fn push_version_guard(
        &mut self,
        meta: &'static EntityMeta,
        expected_version: Option<i64>,
    ) -> StorageResult<()> {
        if let (Some(version), Some(expected)) = (meta.version_column, expected_version) {
            self.push(&format!(" AND {} = ?", identifier(version)?));
            self.params.push(Value::Integer(expected));
        }
        Ok(())
    }
}

fn select_column(
    meta: &'static EntityMeta,
    qualifier: &str,
    column: &SelectColumn,
) -> StorageResult<String> {
    match column {
        SelectColumn::Field(name) => {
            let name = identifier(mapped_column(meta, name)?)?;
            Ok(format!("{qualifier}.{name}"))
        }
        SelectColumn::Related {
            via,
            target,
            column,
            alias,
        } => {
            let via = identifier(mapped_column(meta, via)?)?;
            let target_table = identifier(target.table)?;
            let target_id = identifier(target.id_column)?;
            let column = identifier(mapped_column(*target, column)?)?;
            let alias = identifier(alias)?;
            Ok(format!(
                "(SELECT r.{column} FROM {target_table} AS r WHERE r.{target_id} = {qualifier}.{via}) AS {alias}"
            ))
        }
    }
}

fn identifier(name: &str) -> StorageResult<&str> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(name)
    } else {
        Err(StorageError::UnsafeIdentifier(name.to_string()))
    }
}

fn count_value(value: u64) -> Value {
    Value::Integer(i64::try_from(value).unwrap_or(i64::MAX))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(value) => SqlValue::Integer(*value),
        Value::Text(value) => SqlValue::Text(value.clone()),
    }
}

fn from_value_ref(column: &str, value: ValueRef<'_>) -> StorageResult<Value> {
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(value) => Ok(Value::Integer(value)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|text| Value::Text(text.to_string()))
            .map_err(|err| StorageError::InvalidRow(format!("column `{column}`: {err}"))),
        ValueRef::Real(_) | ValueRef::Blob(_) => Err(StorageError::InvalidRow(format!(
            "column `{column}` holds an unsupported storage class"
        ))),
    }
}

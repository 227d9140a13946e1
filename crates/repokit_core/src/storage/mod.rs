//! Pluggable storage backend contract.
//!
//! # Responsibility
//! - Define the minimal contract the unit of work needs from storage:
//!   row selection, counting, mutations and one transaction boundary.
//! - Keep SQL (or any other physical representation) behind this boundary.
//!
//! # Invariants
//! - At most one storage transaction ("unit") is open per backend instance.
//! - Units created over the same backend instance share its connection and
//!   are not isolated from each other: while one unit holds the transaction,
//!   reads through any other unit see its uncommitted rows. Isolated
//!   concurrent units need one backend instance each.
//! - Versioned updates/deletes only touch rows whose version still matches;
//!   zero affected rows is reported, not raised.
//!
//! # See also
//! - `storage::sqlite`, `storage::memory`

pub mod memory;
pub mod sqlite;

use crate::db::DbError;
use crate::model::entity::{EntityId, EntityMeta, FieldKind};
use crate::model::value::{Record, Value};
use crate::query::predicate::Predicate;
use crate::query::sort::Sort;
use crate::query::{LockMode, QueryError};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StorageResult<T> = Result<T, StorageError>;

/// Backend I/O or protocol failure. Not recoverable inside the unit of work.
#[derive(Debug)]
pub enum StorageError {
    Db(DbError),
    /// Begin/commit/rollback called in the wrong state.
    Transaction(String),
    /// A row or column cannot be represented as a `Value`.
    InvalidRow(String),
    /// Column is not mapped by the entity metadata.
    UnknownColumn {
        table: &'static str,
        column: String,
    },
    /// Metadata carries a name that is unsafe to splice into SQL.
    UnsafeIdentifier(String),
    /// Unique key violated (memory backend; SQLite reports through `Db`).
    Constraint(String),
    /// Native SQL was requested from a backend that cannot run it.
    UnsupportedNative,
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Transaction(message) => write!(f, "storage transaction error: {message}"),
            Self::InvalidRow(message) => write!(f, "invalid storage row: {message}"),
            Self::UnknownColumn { table, column } => {
                write!(f, "column `{column}` is not mapped on table `{table}`")
            }
            Self::UnsafeIdentifier(name) => write!(f, "unsafe SQL identifier `{name}`"),
            Self::Constraint(message) => write!(f, "constraint violation: {message}"),
            Self::UnsupportedNative => write!(f, "backend does not support native queries"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StorageError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// One projected output column.
#[derive(Debug, Clone, Copy)]
pub enum SelectColumn {
    /// Column of the queried table, returned under its own name.
    Field(&'static str),
    /// Column of a referenced row, reached through reference column `via`.
    Related {
        via: &'static str,
        target: &'static EntityMeta,
        column: &'static str,
        alias: &'static str,
    },
}

impl SelectColumn {
    /// Name of the column in the output record.
    pub fn alias(&self) -> &'static str {
        match self {
            Self::Field(name) => *name,
            Self::Related { alias, .. } => *alias,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Columns {
    /// Every mapped column of the table.
    All,
    Only(Vec<SelectColumn>),
}

/// Row selection request.
#[derive(Debug, Clone)]
pub struct Select {
    pub meta: &'static EntityMeta,
    pub columns: Columns,
    pub filter: Predicate,
    pub sort: Sort,
    pub offset: u64,
    pub limit: Option<u64>,
    pub lock: LockMode,
}

impl Select {
    pub fn from(meta: &'static EntityMeta) -> Self {
        Self {
            meta,
            columns: Columns::All,
            filter: Predicate::All,
            sort: Sort::unsorted(),
            offset: 0,
            limit: None,
            lock: LockMode::None,
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Predicate) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    #[must_use]
    pub fn columns(mut self, columns: Vec<SelectColumn>) -> Self {
        self.columns = Columns::Only(columns);
        self
    }

    #[must_use]
    pub fn window(mut self, offset: u64, limit: Option<u64>) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn lock(mut self, lock: LockMode) -> Self {
        self.lock = lock;
        self
    }
}

/// Right-hand side of a bulk assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Set(Value),
    /// `column = column + n`. Null stays null.
    Add(i64),
}

impl Assignment {
    /// Checks that `column` is a writable mapped field of `meta` and that
    /// this right-hand side fits its kind and nullability.
    pub fn validate(&self, meta: &'static EntityMeta, column: &str) -> Result<(), QueryError> {
        let field = meta.field(column).ok_or_else(|| QueryError::UnknownField {
            entity: meta.name,
            field: column.to_string(),
        })?;
        if field.name == meta.id_column || Some(field.name) == meta.version_column {
            return Err(QueryError::ImmutableField {
                entity: meta.name,
                field: field.name,
            });
        }
        match self {
            Self::Set(value) if value.is_null() && !field.nullable => {
                Err(QueryError::InvalidAssignment {
                    entity: meta.name,
                    field: field.name,
                    reason: "column is not nullable",
                })
            }
            Self::Set(value) if !field.value_kind().accepts(value) => {
                Err(QueryError::TypeMismatch {
                    field: field.name.to_string(),
                    expected: field.value_kind(),
                    found: value.kind_name(),
                })
            }
            Self::Set(_) => Ok(()),
            Self::Add(_) => match field.kind {
                FieldKind::Integer | FieldKind::Timestamp => Ok(()),
                FieldKind::Text | FieldKind::Reference => Err(QueryError::InvalidAssignment {
                    entity: meta.name,
                    field: field.name,
                    reason: "increment needs an integer column",
                }),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum Mutation {
    Insert {
        meta: &'static EntityMeta,
        record: Record,
    },
    /// Writes `changes`; versioned updates also bump the version by one.
    Update {
        meta: &'static EntityMeta,
        id: EntityId,
        expected_version: Option<i64>,
        changes: Record,
    },
    Delete {
        meta: &'static EntityMeta,
        id: EntityId,
        expected_version: Option<i64>,
    },
    /// Set-based update; does not touch versions.
    BulkUpdate {
        meta: &'static EntityMeta,
        assignments: Vec<(&'static str, Assignment)>,
        filter: Predicate,
    },
    BulkDelete {
        meta: &'static EntityMeta,
        filter: Predicate,
    },
}

impl Mutation {
    pub fn meta(&self) -> &'static EntityMeta {
        match self {
            Self::Insert { meta, .. }
            | Self::Update { meta, .. }
            | Self::Delete { meta, .. }
            | Self::BulkUpdate { meta, .. }
            | Self::BulkDelete { meta, .. } => *meta,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::BulkUpdate { .. } => "bulk_update",
            Self::BulkDelete { .. } => "bulk_delete",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationResult {
    pub affected: u64,
    /// Storage-generated key of an inserted row.
    pub generated_id: Option<i64>,
}

/// Storage contract consumed by the unit of work.
pub trait StorageBackend {
    fn select(&self, select: &Select) -> StorageResult<Vec<Record>>;

    fn count(&self, meta: &'static EntityMeta, filter: &Predicate) -> StorageResult<u64>;

    fn execute(&self, mutation: &Mutation) -> StorageResult<MutationResult>;

    /// Opens the write transaction. Fails if one is already open.
    fn begin_unit(&self) -> StorageResult<()>;

    fn commit_unit(&self) -> StorageResult<()>;

    fn rollback_unit(&self) -> StorageResult<()>;

    fn in_unit(&self) -> bool;

    /// Runs backend-native SQL returning rows.
    fn native_select(&self, _sql: &str, _params: &[Value]) -> StorageResult<Vec<Record>> {
        Err(StorageError::UnsupportedNative)
    }

    /// Runs backend-native SQL returning a single count.
    fn native_count(&self, _sql: &str, _params: &[Value]) -> StorageResult<u64> {
        Err(StorageError::UnsupportedNative)
    }
}

/// Resolves a caller-supplied column name to the mapped static name.
pub(crate) fn mapped_column(
    meta: &'static EntityMeta,
    column: &str,
) -> StorageResult<&'static str> {
    meta.field(column)
        .map(|field| field.name)
        .ok_or_else(|| StorageError::UnknownColumn {
            table: meta.table,
            column: column.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::Assignment;
    use crate::model::member::MEMBER_META;
    use crate::model::value::Value;
    use crate::query::QueryError;

    #[test]
    fn assignments_to_writable_columns_pass() {
        assert!(Assignment::Add(1).validate(&MEMBER_META, "age").is_ok());
        assert!(Assignment::Add(60_000).validate(&MEMBER_META, "updated_at").is_ok());
        assert!(Assignment::Set(Value::from("renamed"))
            .validate(&MEMBER_META, "username")
            .is_ok());
        assert!(Assignment::Set(Value::Null)
            .validate(&MEMBER_META, "team_id")
            .is_ok());
    }

    #[test]
    fn identity_and_version_columns_are_immutable() {
        for column in ["member_id", "version"] {
            assert!(matches!(
                Assignment::Set(Value::from(7_i64)).validate(&MEMBER_META, column),
                Err(QueryError::ImmutableField { field, .. }) if field == column
            ));
        }
    }

    #[test]
    fn ill_typed_assignments_are_rejected() {
        assert!(matches!(
            Assignment::Add(1).validate(&MEMBER_META, "nickname"),
            Err(QueryError::UnknownField { .. })
        ));
        assert!(matches!(
            Assignment::Set(Value::from("old")).validate(&MEMBER_META, "age"),
            Err(QueryError::TypeMismatch { found: "text", .. })
        ));
        assert!(matches!(
            Assignment::Set(Value::Null).validate(&MEMBER_META, "username"),
            Err(QueryError::InvalidAssignment { field: "username", .. })
        ));
        assert!(matches!(
            Assignment::Add(1).validate(&MEMBER_META, "team_id"),
            Err(QueryError::InvalidAssignment { field: "team_id", .. })
        ));
    }
}

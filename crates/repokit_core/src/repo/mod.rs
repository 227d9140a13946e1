//! Repository layer: unit of work, generic CRUD and domain repositories.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts over a `StorageBackend`.
//! - Own the per-request unit of work (identity map, dirty checking,
//!   optimistic locking, commit/rollback).
//!
//! # Invariants
//! - Every write goes through a `UnitOfWork`; repositories never bypass it.
//! - Repository APIs return semantic errors (`NotFound`, `ConcurrencyConflict`)
//!   in addition to storage transport errors.
//!
//! # See also
//! - `storage` for the backend contract.

pub mod crud;
pub mod hooks;
pub mod member_repo;
pub mod team_repo;
pub mod unit_of_work;

use crate::db::DbError;
use crate::model::entity::EntityId;
use crate::model::value::DecodeError;
use crate::query::QueryError;
use crate::storage::StorageError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for entity persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    /// Malformed query descriptor or single-result shape violation.
    Validation(QueryError),
    Storage(StorageError),
    /// Stored version no longer matches the version read by this unit.
    ConcurrencyConflict {
        table: &'static str,
        id: EntityId,
        expected_version: i64,
    },
    /// Merge or delete targeted a row that does not exist.
    NotFound {
        table: &'static str,
        id: EntityId,
    },
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
            Self::ConcurrencyConflict {
                table,
                id,
                expected_version,
            } => write!(
                f,
                "concurrent modification of {table} {id}: expected version {expected_version}"
            ),
            Self::NotFound { table, id } => write!(f, "{table} not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::ConcurrencyConflict { .. } | Self::NotFound { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<QueryError> for RepoError {
    fn from(value: QueryError) -> Self {
        Self::Validation(value)
    }
}

impl From<StorageError> for RepoError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Storage(StorageError::Db(value))
    }
}

impl From<DecodeError> for RepoError {
    fn from(value: DecodeError) -> Self {
        Self::InvalidData(value.to_string())
    }
}

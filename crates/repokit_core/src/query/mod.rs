//! Query descriptors.
//!
//! # Responsibility
//! - Describe filter, sort, paging and read hints as plain data.
//! - Validate descriptors against entity metadata before they reach storage.
//!
//! # Invariants
//! - A descriptor that passes `validate` references only mapped columns with
//!   matching value kinds.

pub mod example;
pub mod page;
pub mod predicate;
pub mod sort;

use crate::model::entity::{EntityMeta, FieldKind};
use predicate::Predicate;
use sort::Sort;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Malformed descriptor or result-shape violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    UnknownField {
        entity: &'static str,
        field: String,
    },
    TypeMismatch {
        field: String,
        expected: FieldKind,
        found: &'static str,
    },
    NotAReference {
        entity: &'static str,
        field: String,
        target: &'static str,
    },
    InvalidPageRequest(String),
    /// A single-result query matched more than one row.
    NonUniqueResult {
        entity: &'static str,
        count: usize,
    },
    /// Identity and version columns are never written by bulk statements.
    ImmutableField {
        entity: &'static str,
        field: &'static str,
    },
    InvalidAssignment {
        entity: &'static str,
        field: &'static str,
        reason: &'static str,
    },
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField { entity, field } => {
                write!(f, "unknown field `{field}` on entity {entity}")
            }
            Self::TypeMismatch {
                field,
                expected,
                found,
            } => write!(f, "field `{field}` expects {expected} value, got {found}"),
            Self::NotAReference {
                entity,
                field,
                target,
            } => write!(f, "field `{field}` on {entity} does not reference {target}"),
            Self::InvalidPageRequest(message) => write!(f, "invalid page request: {message}"),
            Self::NonUniqueResult { entity, count } => write!(
                f,
                "single-result query on {entity} matched {count} rows"
            ),
            Self::ImmutableField { entity, field } => {
                write!(f, "field `{field}` on {entity} cannot be assigned in bulk")
            }
            Self::InvalidAssignment {
                entity,
                field,
                reason,
            } => write!(f, "invalid assignment to `{field}` on {entity}: {reason}"),
        }
    }
}

impl Error for QueryError {}

/// Lock hint carried by a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockMode {
    #[default]
    None,
    /// Acquire the storage write lock before reading.
    PessimisticWrite,
}

/// Filter + sort + hints for one derived query.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filter: Predicate,
    pub sort: Sort,
    pub lock: LockMode,
    /// Loaded entities are not snapshotted and never flushed.
    pub read_only: bool,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(filter: Predicate) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn sorted(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    #[must_use]
    pub fn with_lock(mut self, lock: LockMode) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn validate(&self, meta: &'static EntityMeta) -> Result<(), QueryError> {
        self.filter.validate(meta)?;
        self.sort.validate(meta)
    }
}

//! Entity contract and static table metadata.
//!
//! # Responsibility
//! - Describe how an entity maps onto one table (`EntityMeta`).
//! - Define the record conversion contract used by the unit of work.
//!
//! # Invariants
//! - Metadata is `'static`; descriptors are validated against it, never
//!   against caller-provided strings alone.
//! - `id_column` and `version_column` are listed in `fields`.

use crate::model::value::{DecodeError, Record, Value};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Storage kind of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Text,
    /// Epoch milliseconds.
    Timestamp,
    /// Foreign key holding the target entity id.
    Reference,
}

impl FieldKind {
    /// Returns whether `value` is storable in a column of this kind.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Integer | Self::Timestamp, Value::Integer(_)) => true,
            // Reference columns carry whatever the target id kind is.
            (Self::Reference, _) => true,
            _ => false,
        }
    }
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Text => write!(f, "text"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Reference => write!(f, "reference"),
        }
    }
}

/// One mapped column.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    /// Target metadata for `FieldKind::Reference` columns.
    pub references: Option<&'static EntityMeta>,
}

impl FieldDef {
    pub const fn integer(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Integer,
            nullable: false,
            references: None,
        }
    }

    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Text,
            nullable: false,
            references: None,
        }
    }

    pub const fn timestamp(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Timestamp,
            nullable: true,
            references: None,
        }
    }

    pub const fn reference(name: &'static str, target: &'static EntityMeta) -> Self {
        Self {
            name,
            kind: FieldKind::Reference,
            nullable: true,
            references: Some(target),
        }
    }

    pub const fn nullable(self) -> Self {
        Self {
            nullable: true,
            ..self
        }
    }

    /// Kind that values compared against this column must have.
    pub fn value_kind(&self) -> FieldKind {
        match (self.kind, self.references) {
            (FieldKind::Reference, Some(target)) => target.id_kind(),
            (kind, _) => kind,
        }
    }
}

/// How identity is assigned on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// Storage generates an integer key.
    Generated,
    /// Caller assigns a natural key before `save`.
    Assigned,
}

/// Audit columns maintained by lifecycle hooks. `None` means absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditColumns {
    pub created_at: Option<&'static str>,
    pub updated_at: Option<&'static str>,
    pub created_by: Option<&'static str>,
    pub updated_by: Option<&'static str>,
}

impl AuditColumns {
    pub const NONE: Self = Self {
        created_at: None,
        updated_at: None,
        created_by: None,
        updated_by: None,
    };

    pub const CREATED_ONLY: Self = Self {
        created_at: Some("created_at"),
        ..Self::NONE
    };

    pub const FULL: Self = Self {
        created_at: Some("created_at"),
        updated_at: Some("updated_at"),
        created_by: Some("created_by"),
        updated_by: Some("updated_by"),
    };

    pub fn contains(&self, column: &str) -> bool {
        [
            self.created_at,
            self.updated_at,
            self.created_by,
            self.updated_by,
        ]
        .into_iter()
        .flatten()
        .any(|name| name == column)
    }
}

/// Static description of one entity table.
#[derive(Debug)]
pub struct EntityMeta {
    /// Entity name used in errors and logs.
    pub name: &'static str,
    pub table: &'static str,
    pub id_column: &'static str,
    pub id_strategy: IdStrategy,
    pub version_column: Option<&'static str>,
    pub audit: AuditColumns,
    pub fields: &'static [FieldDef],
}

impl EntityMeta {
    pub fn field(&self, name: &str) -> Option<&'static FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn id_kind(&self) -> FieldKind {
        self.field(self.id_column)
            .map_or(FieldKind::Integer, |field| field.kind)
    }

    pub fn is_versioned(&self) -> bool {
        self.version_column.is_some()
    }

    /// Columns owned by callers: everything except id, version and audit.
    pub fn business_fields(&self) -> impl Iterator<Item = &'static FieldDef> + '_ {
        self.fields.iter().filter(move |field| {
            field.name != self.id_column
                && Some(field.name) != self.version_column
                && !self.audit.contains(field.name)
        })
    }

    pub fn same_table(&self, other: &EntityMeta) -> bool {
        self.table == other.table
    }
}

/// Stable entity identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Text(String),
}

impl EntityId {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(value) => Value::Integer(*value),
            Self::Text(value) => Value::Text(value.clone()),
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(value) => Some(Self::Int(*value)),
            Value::Text(value) => Some(Self::Text(value.clone())),
            Value::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Text(_) => None,
        }
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Persistent entity mapped onto one table.
///
/// Identity, version and audit columns travel through `to_record` /
/// `from_record`; the unit of work assigns them on the record, never on the
/// entity value directly.
pub trait Entity: Clone + Sized {
    fn meta() -> &'static EntityMeta;

    fn id(&self) -> Option<EntityId>;

    /// Whether `save` must insert instead of merging.
    fn is_new(&self) -> bool {
        self.id().is_none()
    }

    /// Reference columns whose loaded target has no id yet.
    fn transient_references(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn to_record(&self) -> Record;

    fn from_record(record: &Record) -> Result<Self, DecodeError>;
}

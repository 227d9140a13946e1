//! SQLite bootstrap for the repository layer.
//!
//! # Responsibility
//! - Open and configure SQLite connections used by `storage::sqlite`.
//! - Bring the schema up to the version the entity metadata expects.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - A returned connection has every mapped table and column present.
//!
//! # See also
//! - `storage::sqlite` for the backend that wraps returned connections.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    /// The connection itself could not be established.
    Open {
        target: String,
        source: rusqlite::Error,
    },
    /// One migration script failed; nothing from the batch was applied.
    Migration {
        version: u32,
        source: rusqlite::Error,
    },
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// A table or column mapped by entity metadata is absent after migration.
    SchemaMismatch {
        entity: &'static str,
        table: &'static str,
        column: Option<&'static str>,
    },
    Sqlite(rusqlite::Error),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { target, source } => write!(f, "cannot open database {target}: {source}"),
            Self::Migration { version, source } => {
                write!(f, "schema migration {version:04} failed: {source}")
            }
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::SchemaMismatch {
                entity,
                table,
                column: Some(column),
            } => write!(f, "entity {entity} maps `{table}.{column}`, which does not exist"),
            Self::SchemaMismatch {
                entity,
                table,
                column: None,
            } => write!(f, "entity {entity} maps table `{table}`, which does not exist"),
            Self::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Migration { source, .. } => Some(source),
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } | Self::SchemaMismatch { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

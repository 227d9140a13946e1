//! Audit columns embedded in audited entities.
//!
//! Values are written by `repo::hooks` during insert/flush. Entity code only
//! reads them; `save` ignores caller edits to these fields.

use crate::model::entity::AuditColumns;
use crate::model::value::{DecodeError, Record};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFields {
    /// Epoch milliseconds of the first insert.
    pub created_at: Option<i64>,
    /// Epoch milliseconds of the last flushed change.
    pub updated_at: Option<i64>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl AuditFields {
    pub(crate) fn write_to(&self, columns: &AuditColumns, record: &mut Record) {
        if let Some(column) = columns.created_at {
            record.set(column, self.created_at);
        }
        if let Some(column) = columns.updated_at {
            record.set(column, self.updated_at);
        }
        if let Some(column) = columns.created_by {
            record.set(column, self.created_by.clone());
        }
        if let Some(column) = columns.updated_by {
            record.set(column, self.updated_by.clone());
        }
    }

    pub(crate) fn read_from(columns: &AuditColumns, record: &Record) -> Result<Self, DecodeError> {
        let mut fields = Self::default();
        if let Some(column) = columns.created_at {
            fields.created_at = record.opt_i64(column)?;
        }
        if let Some(column) = columns.updated_at {
            fields.updated_at = record.opt_i64(column)?;
        }
        if let Some(column) = columns.created_by {
            fields.created_by = record.opt_text(column)?;
        }
        if let Some(column) = columns.updated_by {
            fields.updated_by = record.opt_text(column)?;
        }
        Ok(fields)
    }
}

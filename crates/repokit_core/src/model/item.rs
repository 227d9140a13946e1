//! Item entity with a caller-assigned natural key.
//!
//! Because the id is known before insert, "new" is decided by the absence of
//! `created_at` rather than the absence of an id.

use crate::model::entity::{AuditColumns, Entity, EntityId, EntityMeta, FieldDef, IdStrategy};
use crate::model::value::{DecodeError, Record};

pub static ITEM_META: EntityMeta = EntityMeta {
    name: "Item",
    table: "item",
    id_column: "item_id",
    id_strategy: IdStrategy::Assigned,
    version_column: None,
    audit: AuditColumns::CREATED_ONLY,
    fields: &[FieldDef::text("item_id"), FieldDef::timestamp("created_at")],
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub created_at: Option<i64>,
}

impl Item {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: None,
        }
    }
}

impl Entity for Item {
    fn meta() -> &'static EntityMeta {
        &ITEM_META
    }

    fn id(&self) -> Option<EntityId> {
        Some(EntityId::Text(self.id.clone()))
    }

    fn is_new(&self) -> bool {
        self.created_at.is_none()
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("item_id", self.id.as_str())
            .with("created_at", self.created_at)
    }

    fn from_record(record: &Record) -> Result<Self, DecodeError> {
        Ok(Self {
            id: record.text("item_id")?,
            created_at: record.opt_i64("created_at")?,
        })
    }
}

//! Team entity.
//!
//! Teams own no columns pointing at members; the member list is derived from
//! `member.team_id` by `TeamRepository::members_of`.

use crate::model::entity::{AuditColumns, Entity, EntityId, EntityMeta, FieldDef, IdStrategy};
use crate::model::value::{DecodeError, Record};
use serde::{Deserialize, Serialize};

pub static TEAM_META: EntityMeta = EntityMeta {
    name: "Team",
    table: "team",
    id_column: "team_id",
    id_strategy: IdStrategy::Generated,
    version_column: None,
    audit: AuditColumns::NONE,
    fields: &[FieldDef::integer("team_id"), FieldDef::text("name")],
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: Option<i64>,
    pub name: String,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

impl Entity for Team {
    fn meta() -> &'static EntityMeta {
        &TEAM_META
    }

    fn id(&self) -> Option<EntityId> {
        self.id.map(EntityId::Int)
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("team_id", self.id)
            .with("name", self.name.as_str())
    }

    fn from_record(record: &Record) -> Result<Self, DecodeError> {
        Ok(Self {
            id: record.opt_i64("team_id")?,
            name: record.text("name")?,
        })
    }
}

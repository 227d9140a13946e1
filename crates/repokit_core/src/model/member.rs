//! Member entity: versioned, fully audited, optional team reference.

use crate::model::audit::AuditFields;
use crate::model::entity::{AuditColumns, Entity, EntityId, EntityMeta, FieldDef, IdStrategy};
use crate::model::reference::Reference;
use crate::model::team::{Team, TEAM_META};
use crate::model::value::{DecodeError, Record, Value};

pub static MEMBER_META: EntityMeta = EntityMeta {
    name: "Member",
    table: "member",
    id_column: "member_id",
    id_strategy: IdStrategy::Generated,
    version_column: Some("version"),
    audit: AuditColumns::FULL,
    fields: &[
        FieldDef::integer("member_id"),
        FieldDef::text("username"),
        FieldDef::integer("age"),
        FieldDef::reference("team_id", &TEAM_META),
        FieldDef::integer("version"),
        FieldDef::timestamp("created_at"),
        FieldDef::timestamp("updated_at"),
        FieldDef::text("created_by").nullable(),
        FieldDef::text("updated_by").nullable(),
    ],
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: Option<i64>,
    pub username: String,
    pub age: i64,
    pub team: Option<Reference<Team>>,
    /// Optimistic lock counter. Starts at 0, bumped by every flushed update.
    pub version: i64,
    pub audit: AuditFields,
}

impl Member {
    pub fn new(username: impl Into<String>) -> Self {
        Self::with_age(username, 0)
    }

    pub fn with_age(username: impl Into<String>, age: i64) -> Self {
        Self {
            id: None,
            username: username.into(),
            age,
            team: None,
            version: 0,
            audit: AuditFields::default(),
        }
    }

    pub fn with_team(username: impl Into<String>, age: i64, team: &Team) -> Self {
        let mut member = Self::with_age(username, age);
        member.change_team(team);
        member
    }

    pub fn change_team(&mut self, team: &Team) {
        self.team = Some(Reference::to(team));
    }

    /// Loaded team, if the reference has been resolved.
    pub fn loaded_team(&self) -> Option<&Team> {
        self.team.as_ref().and_then(Reference::get)
    }

    pub fn team_id(&self) -> Option<EntityId> {
        self.team.as_ref().and_then(Reference::id)
    }
}

impl Entity for Member {
    fn meta() -> &'static EntityMeta {
        &MEMBER_META
    }

    fn id(&self) -> Option<EntityId> {
        self.id.map(EntityId::Int)
    }

    fn transient_references(&self) -> Vec<&'static str> {
        match &self.team {
            Some(team) if team.is_transient() => vec!["team_id"],
            _ => Vec::new(),
        }
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new()
            .with("member_id", self.id)
            .with("username", self.username.as_str())
            .with("age", self.age)
            .with(
                "team_id",
                self.team_id().map_or(Value::Null, |id| id.to_value()),
            )
            .with("version", self.version);
        self.audit.write_to(&MEMBER_META.audit, &mut record);
        record
    }

    fn from_record(record: &Record) -> Result<Self, DecodeError> {
        let team = EntityId::from_value(record.get("team_id")).map(Reference::Unloaded);
        Ok(Self {
            id: record.opt_i64("member_id")?,
            username: record.text("username")?,
            age: record.i64("age")?,
            team,
            version: record.i64("version")?,
            audit: AuditFields::read_from(&MEMBER_META.audit, record)?,
        })
    }
}

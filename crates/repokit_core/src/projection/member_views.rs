//! Member read models.

use crate::model::entity::EntityMeta;
use crate::model::member::{Member, MEMBER_META};
use crate::model::team::TEAM_META;
use crate::model::value::{DecodeError, Record};
use crate::projection::Projection;
use crate::storage::SelectColumn;
use serde::Serialize;

static USERNAME_AGE: [SelectColumn; 2] =
    [SelectColumn::Field("username"), SelectColumn::Field("age")];
static USERNAME: [SelectColumn; 1] = [SelectColumn::Field("username")];
static USERNAME_TEAM: [SelectColumn; 2] = [
    SelectColumn::Field("username"),
    SelectColumn::Related {
        via: "team_id",
        target: &TEAM_META,
        column: "name",
        alias: "team_name",
    },
];
static ID_USERNAME_TEAM: [SelectColumn; 3] = [
    SelectColumn::Field("member_id"),
    SelectColumn::Field("username"),
    SelectColumn::Related {
        via: "team_id",
        target: &TEAM_META,
        column: "name",
        alias: "team_name",
    },
];

/// Computed view: `"{username} {age}"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsernameOnly {
    pub username: String,
}

impl Projection for UsernameOnly {
    fn root() -> &'static EntityMeta {
        &MEMBER_META
    }

    fn columns() -> &'static [SelectColumn] {
        &USERNAME_AGE
    }

    fn from_projected(record: &Record) -> Result<Self, DecodeError> {
        Ok(Self {
            username: format!("{} {}", record.text("username")?, record.i64("age")?),
        })
    }
}

/// Closed DTO view carrying only the username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsernameOnlyDto {
    pub username: String,
}

impl Projection for UsernameOnlyDto {
    fn root() -> &'static EntityMeta {
        &MEMBER_META
    }

    fn columns() -> &'static [SelectColumn] {
        &USERNAME
    }

    fn from_projected(record: &Record) -> Result<Self, DecodeError> {
        Ok(Self {
            username: record.text("username")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamInfo {
    pub name: String,
}

/// Username plus a nested team view; `team` is `None` for members without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NestedClosedProjection {
    pub username: String,
    pub team: Option<TeamInfo>,
}

impl Projection for NestedClosedProjection {
    fn root() -> &'static EntityMeta {
        &MEMBER_META
    }

    fn columns() -> &'static [SelectColumn] {
        &USERNAME_TEAM
    }

    fn from_projected(record: &Record) -> Result<Self, DecodeError> {
        Ok(Self {
            username: record.text("username")?,
            team: record
                .opt_text("team_name")?
                .map(|name| TeamInfo { name }),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberDto {
    pub id: i64,
    pub username: String,
    pub team_name: Option<String>,
}

impl MemberDto {
    /// Builds the DTO from an entity. The team name is taken from a loaded
    /// reference only.
    pub fn from_member(member: &Member) -> Option<Self> {
        Some(Self {
            id: member.id?,
            username: member.username.clone(),
            team_name: member.loaded_team().map(|team| team.name.clone()),
        })
    }
}

impl Projection for MemberDto {
    fn root() -> &'static EntityMeta {
        &MEMBER_META
    }

    fn columns() -> &'static [SelectColumn] {
        &ID_USERNAME_TEAM
    }

    fn from_projected(record: &Record) -> Result<Self, DecodeError> {
        Ok(Self {
            id: record.i64("member_id")?,
            username: record.text("username")?,
            team_name: record.opt_text("team_name")?,
        })
    }
}

/// Row shape of the native member/team join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberProjection {
    pub id: i64,
    pub username: String,
    pub team_name: Option<String>,
}

impl Projection for MemberProjection {
    fn root() -> &'static EntityMeta {
        &MEMBER_META
    }

    fn columns() -> &'static [SelectColumn] {
        &ID_USERNAME_TEAM
    }

    fn from_projected(record: &Record) -> Result<Self, DecodeError> {
        Ok(Self {
            id: record.i64("member_id")?,
            username: record.text("username")?,
            team_name: record.opt_text("team_name")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{NestedClosedProjection, UsernameOnly};
    use crate::model::value::{Record, Value};
    use crate::projection::Projection;

    #[test]
    fn open_view_concatenates_username_and_age() {
        let record = Record::new().with("username", "m1").with("age", 10);
        let view = UsernameOnly::from_projected(&record).unwrap();
        assert_eq!(view.username, "m1 10");
    }

    #[test]
    fn nested_view_without_team_is_none() {
        let record = Record::new()
            .with("username", "m1")
            .with("team_name", Value::Null);
        let view = NestedClosedProjection::from_projected(&record).unwrap();
        assert_eq!(view.team, None);
    }
}

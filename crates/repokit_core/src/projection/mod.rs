//! Projection mapper: partial views of entities.
//!
//! # Responsibility
//! - Let a view declare the columns it needs, including columns of a
//!   referenced entity reached through a reference column.
//! - Produce views either from full managed entities or from a partial
//!   select that fetches only the declared columns.
//!
//! # Invariants
//! - Both modes produce the same projected record for the same row.
//! - Declared columns are validated against metadata before any fetch.

pub mod member_views;

use crate::model::entity::{EntityId, EntityMeta};
use crate::model::value::{DecodeError, Record, Value};
use crate::paging;
use crate::query::page::{Page, PageRequest};
use crate::query::{Query, QueryError};
use crate::repo::unit_of_work::UnitOfWork;
use crate::repo::{RepoError, RepoResult};
use crate::storage::{Select, SelectColumn};

/// A read-only view built from a subset of one entity's columns.
pub trait Projection: Sized {
    /// Entity the view is rooted at.
    fn root() -> &'static EntityMeta;

    fn columns() -> &'static [SelectColumn];

    fn from_projected(record: &Record) -> Result<Self, DecodeError>;
}

/// Checks that every declared column exists and every related column is
/// reached through a reference to its target.
pub fn validate_columns(
    meta: &'static EntityMeta,
    columns: &[SelectColumn],
) -> Result<(), QueryError> {
    for column in columns {
        match column {
            SelectColumn::Field(name) => {
                if meta.field(name).is_none() {
                    return Err(QueryError::UnknownField {
                        entity: meta.name,
                        field: (*name).to_string(),
                    });
                }
            }
            SelectColumn::Related {
                via,
                target,
                column,
                ..
            } => {
                let field = meta.field(via).ok_or_else(|| QueryError::UnknownField {
                    entity: meta.name,
                    field: (*via).to_string(),
                })?;
                if !field
                    .references
                    .is_some_and(|actual| actual.same_table(target))
                {
                    return Err(QueryError::NotAReference {
                        entity: meta.name,
                        field: (*via).to_string(),
                        target: target.name,
                    });
                }
                if target.field(column).is_none() {
                    return Err(QueryError::UnknownField {
                        entity: target.name,
                        field: (*column).to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Partial mode: requests only the declared columns from storage.
pub fn fetch_partial<P: Projection>(uow: &UnitOfWork<'_>, query: &Query) -> RepoResult<Vec<P>> {
    fetch_partial_window(uow, query, 0, None)
}

/// Partial mode, paged. The request's sort replaces the query's when set.
pub fn fetch_partial_page<P: Projection>(
    uow: &UnitOfWork<'_>,
    query: &Query,
    request: &PageRequest,
) -> RepoResult<Page<P>> {
    let mut query = query.clone();
    if !request.sort().is_unsorted() {
        query.sort = request.sort().clone();
    }
    let meta = P::root();
    paging::fetch_page(
        meta.name,
        request,
        |offset, limit| fetch_partial_window(uow, &query, offset, Some(limit)),
        || uow.count(meta, &query.filter),
    )
}

fn fetch_partial_window<P: Projection>(
    uow: &UnitOfWork<'_>,
    query: &Query,
    offset: u64,
    limit: Option<u64>,
) -> RepoResult<Vec<P>> {
    let meta = P::root();
    validate_columns(meta, P::columns())?;
    let select = Select::from(meta)
        .columns(P::columns().to_vec())
        .filter(query.filter.clone())
        .sort(query.sort.clone())
        .window(offset, limit);
    uow.select_projected(&select)?
        .iter()
        .map(|record| P::from_projected(record).map_err(RepoError::from))
        .collect()
}

/// Full mode: loads managed entities, resolves related rows through the
/// unit of work, then projects each full record.
pub fn fetch_full<P: Projection>(uow: &UnitOfWork<'_>, query: &Query) -> RepoResult<Vec<P>> {
    let meta = P::root();
    validate_columns(meta, P::columns())?;
    uow.query_records(meta, query, 0, None)?
        .iter()
        .map(|record| {
            let projected = project_record(uow, P::columns(), record)?;
            P::from_projected(&projected).map_err(RepoError::from)
        })
        .collect()
}

/// Computes the projected record of one full entity record.
pub fn project_record(
    uow: &UnitOfWork<'_>,
    columns: &[SelectColumn],
    record: &Record,
) -> RepoResult<Record> {
    let mut projected = Record::new();
    for column in columns {
        match column {
            SelectColumn::Field(name) => {
                projected.set(*name, record.get(name).clone());
            }
            SelectColumn::Related {
                via,
                target,
                column,
                alias,
            } => {
                let value = match EntityId::from_value(record.get(via)) {
                    Some(id) => uow
                        .find_record(*target, id)?
                        .map_or(Value::Null, |related| related.get(column).clone()),
                    None => Value::Null,
                };
                projected.set(*alias, value);
            }
        }
    }
    Ok(projected)
}

#[cfg(test)]
mod tests {
    use super::validate_columns;
    use crate::model::member::MEMBER_META;
    use crate::model::team::TEAM_META;
    use crate::query::QueryError;
    use crate::storage::SelectColumn;

    #[test]
    fn related_column_must_follow_a_reference() {
        let through_username = [SelectColumn::Related {
            via: "username",
            target: &TEAM_META,
            column: "name",
            alias: "team_name",
        }];
        assert!(matches!(
            validate_columns(&MEMBER_META, &through_username),
            Err(QueryError::NotAReference { .. })
        ));

        let unknown_target_column = [SelectColumn::Related {
            via: "team_id",
            target: &TEAM_META,
            column: "title",
            alias: "team_title",
        }];
        assert!(matches!(
            validate_columns(&MEMBER_META, &unknown_target_column),
            Err(QueryError::UnknownField { entity: "Team", .. })
        ));
    }
}

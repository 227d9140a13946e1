//! Schema migrations for the mapped entity tables.
//!
//! # Responsibility
//! - Register schema scripts in strictly increasing order, each tagged with
//!   the entity tables it introduces.
//! - Apply pending scripts in one transaction and check the result against
//!   entity metadata.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - After a successful apply every `EntityMeta` registered here has its
//!   table and all of its fields present.

use crate::db::{DbError, DbResult};
use crate::model::entity::EntityMeta;
use crate::model::item::ITEM_META;
use crate::model::member::MEMBER_META;
use crate::model::team::TEAM_META;
use log::{error, info};
use rusqlite::Connection;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
    /// Entities whose tables this script creates.
    introduces: &'static [&'static EntityMeta],
}

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("0001_init.sql"),
        introduces: &[&TEAM_META, &MEMBER_META],
    },
    Migration {
        version: 2,
        sql: include_str!("0002_item.sql"),
        introduces: &[&ITEM_META],
    },
];

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    last_version(MIGRATIONS)
}

/// Entities whose schema the registered migrations provide.
pub fn mapped_entities() -> impl Iterator<Item = &'static EntityMeta> {
    MIGRATIONS
        .iter()
        .flat_map(|migration| migration.introduces.iter().copied())
}

/// Applies all pending migrations, then checks every mapped table.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    apply_set(conn, MIGRATIONS)
}

fn last_version(migrations: &[Migration]) -> u32 {
    migrations.last().map_or(0, |migration| migration.version)
}

fn apply_set(conn: &mut Connection, migrations: &'static [Migration]) -> DbResult<()> {
    let current_version = current_user_version(conn)?;
    let latest = last_version(migrations);

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version < latest {
        let tx = conn.transaction()?;
        for migration in migrations {
            if migration.version <= current_version {
                continue;
            }
            let applied = tx.execute_batch(migration.sql).and_then(|()| {
                tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))
            });
            if let Err(source) = applied {
                error!(
                    "event=migrations_apply module=db status=error from_version={current_version} failed_version={} error={source}",
                    migration.version
                );
                return Err(DbError::Migration {
                    version: migration.version,
                    source,
                });
            }
        }
        tx.commit()?;
        info!(
            "event=migrations_apply module=db status=ok from_version={current_version} to_version={latest}"
        );
    }

    for migration in migrations {
        for meta in migration.introduces {
            verify_entity_table(conn, *meta)?;
        }
    }
    Ok(())
}

fn verify_entity_table(conn: &Connection, meta: &'static EntityMeta) -> DbResult<()> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([meta.table], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<String>>>()?;

    if columns.is_empty() {
        return Err(DbError::SchemaMismatch {
            entity: meta.name,
            table: meta.table,
            column: None,
        });
    }
    match meta
        .fields
        .iter()
        .find(|field| !columns.contains(field.name))
    {
        Some(field) => Err(DbError::SchemaMismatch {
            entity: meta.name,
            table: meta.table,
            column: Some(field.name),
        }),
        None => Ok(()),
    }
}

fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::{apply_set, current_user_version, mapped_entities, Migration, MIGRATIONS};
    use crate::db::DbError;
    use crate::model::item::ITEM_META;
    use crate::model::team::TEAM_META;
    use rusqlite::Connection;

    static BROKEN_SECOND: &[Migration] = &[
        Migration {
            version: 1,
            sql: "CREATE TABLE team (team_id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
            introduces: &[&TEAM_META],
        },
        Migration {
            version: 2,
            sql: "CREATE TABLE item (item_id TEXT PRIMARY KEY, created_at INTEGER",
            introduces: &[&ITEM_META],
        },
    ];

    static ITEM_WITHOUT_CREATED_AT: &[Migration] = &[Migration {
        version: 1,
        sql: "CREATE TABLE item (item_id TEXT PRIMARY KEY);",
        introduces: &[&ITEM_META],
    }];

    #[test]
    fn failing_script_reports_its_version_and_applies_nothing() {
        let mut conn = Connection::open_in_memory().unwrap();

        match apply_set(&mut conn, BROKEN_SECOND).unwrap_err() {
            DbError::Migration { version, .. } => assert_eq!(version, 2),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(current_user_version(&conn).unwrap(), 0);
        let teams: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'team'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(teams, 0);
    }

    #[test]
    fn missing_mapped_column_is_a_schema_mismatch() {
        let mut conn = Connection::open_in_memory().unwrap();

        match apply_set(&mut conn, ITEM_WITHOUT_CREATED_AT).unwrap_err() {
            DbError::SchemaMismatch {
                entity,
                table,
                column,
            } => {
                assert_eq!(entity, ITEM_META.name);
                assert_eq!(table, "item");
                assert_eq!(column, Some("created_at"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn every_mapped_entity_is_introduced_once() {
        let tables: Vec<&str> = mapped_entities().map(|meta| meta.table).collect();
        assert_eq!(tables, ["team", "member", "item"]);
        assert!(MIGRATIONS
            .windows(2)
            .all(|pair| pair[0].version < pair[1].version));
    }
}

//! Generic data-access layer: entities, query descriptors, repositories,
//! paging, projections and a unit of work over pluggable storage.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod paging;
pub mod projection;
pub mod query;
pub mod repo;
pub mod service;
pub mod storage;

pub use config::{ConfigError, RepoConfig};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use model::entity::{Entity, EntityId, EntityMeta};
pub use model::item::Item;
pub use model::member::Member;
pub use model::reference::Reference;
pub use model::team::Team;
pub use model::value::{Record, Value};
pub use projection::Projection;
pub use query::page::{Page, PageRequest, Slice, Window};
pub use query::predicate::Predicate;
pub use query::sort::Sort;
pub use query::{LockMode, Query, QueryError};
pub use repo::crud::EntityRepository;
pub use repo::member_repo::{MemberRepository, MemberRepositoryCustom};
pub use repo::team_repo::TeamRepository;
pub use repo::unit_of_work::{BulkOptions, UnitOfWork};
pub use repo::{RepoError, RepoResult};
pub use service::member_service::{MemberService, MemberServiceError, PageParams};
pub use storage::memory::MemoryBackend;
pub use storage::sqlite::SqliteBackend;
pub use storage::{StorageBackend, StorageError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}

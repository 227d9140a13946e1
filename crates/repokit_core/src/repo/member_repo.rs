//! Member repository: named derived queries over `EntityRepository<Member>`.
//!
//! # Responsibility
//! - Express each member query as an explicit descriptor (filter, sort,
//!   paging, hints) instead of parsing method names.
//! - Host member-specific bulk, fetch-join, native and projection queries.
//!
//! # Invariants
//! - Field names used here exist on `MEMBER_META`/`TEAM_META`; descriptors
//!   are still validated before they reach storage.
//! - Native SQL is parameterized and only runs on backends that support it.

use crate::model::entity::{Entity, EntityId};
use crate::model::member::{Member, MEMBER_META};
use crate::model::reference::Reference;
use crate::model::team::Team;
use crate::model::value::Value;
use crate::paging;
use crate::projection::member_views::{MemberDto, MemberProjection, UsernameOnlyDto};
use crate::projection::{self, Projection};
use crate::query::page::{Page, PageRequest, Slice};
use crate::query::predicate::Predicate;
use crate::query::sort::Sort;
use crate::query::{LockMode, Query};
use crate::repo::crud::EntityRepository;
use crate::repo::unit_of_work::{BulkOptions, UnitOfWork};
use crate::repo::{RepoError, RepoResult};
use crate::storage::Assignment;

const NATIVE_BY_USERNAME_SQL: &str = "SELECT member_id, username, age, team_id, version, \
     created_at, updated_at, created_by, updated_by \
     FROM member WHERE username = ? ORDER BY member_id ASC";
const NATIVE_PROJECTION_SQL: &str = "SELECT m.member_id AS member_id, m.username AS username, \
     t.name AS team_name \
     FROM member m LEFT JOIN team t ON t.team_id = m.team_id \
     ORDER BY m.member_id ASC LIMIT ? OFFSET ?";
const NATIVE_COUNT_SQL: &str = "SELECT COUNT(*) FROM member";

/// Reusable member predicates ("specifications").
pub mod member_spec {
    use crate::model::team::TEAM_META;
    use crate::query::predicate::Predicate;

    pub fn username(username: &str) -> Predicate {
        Predicate::eq("username", username)
    }

    /// Members whose team has the given name. Members without a team never match.
    pub fn team_name(team_name: &str) -> Predicate {
        Predicate::related("team_id", &TEAM_META, Predicate::eq("name", team_name))
    }
}

/// Hand-written queries living beside the derived ones.
pub trait MemberRepositoryCustom {
    fn find_member_custom(&self) -> RepoResult<Vec<Member>>;
}

pub struct MemberRepository<'u> {
    members: EntityRepository<'u, Member>,
}

impl<'u> MemberRepository<'u> {
    pub fn new(uow: &'u UnitOfWork<'u>) -> Self {
        Self {
            members: EntityRepository::new(uow),
        }
    }

    /// Generic CRUD and descriptor queries.
    pub fn crud(&self) -> &EntityRepository<'u, Member> {
        &self.members
    }

    pub fn save(&self, member: &Member) -> RepoResult<Member> {
        self.members.save(member)
    }

    fn uow(&self) -> &'u UnitOfWork<'u> {
        self.members.unit_of_work()
    }

    pub fn find_by_username_and_age_greater_than(
        &self,
        username: &str,
        age: i64,
    ) -> RepoResult<Vec<Member>> {
        self.members.find_by(&Query::filter(
            Predicate::eq("username", username).and(Predicate::gt("age", age)),
        ))
    }

    pub fn find_by_username(&self, username: &str) -> RepoResult<Vec<Member>> {
        self.members
            .find_by(&Query::filter(member_spec::username(username)))
    }

    pub fn find_user(&self, username: &str, age: i64) -> RepoResult<Vec<Member>> {
        self.members.find_by(&Query::filter(
            Predicate::eq("username", username).and(Predicate::eq("age", age)),
        ))
    }

    pub fn find_username_list(&self) -> RepoResult<Vec<String>> {
        let views: Vec<UsernameOnlyDto> = projection::fetch_partial(
            self.uow(),
            &Query::all().sorted(Sort::asc("member_id")),
        )?;
        Ok(views.into_iter().map(|view| view.username).collect())
    }

    /// Members that have a team, with the team name joined in.
    pub fn find_member_dto(&self) -> RepoResult<Vec<MemberDto>> {
        projection::fetch_partial(
            self.uow(),
            &Query::filter(Predicate::is_null("team_id").not()),
        )
    }

    pub fn find_by_names(&self, names: &[&str]) -> RepoResult<Vec<Member>> {
        self.members
            .find_by(&Query::filter(Predicate::in_set("username", names.iter().copied())))
    }

    pub fn find_list_by_username(&self, username: &str) -> RepoResult<Vec<Member>> {
        self.find_by_username(username)
    }

    /// Single result; absent is `None`, several matches is a validation error.
    pub fn find_member_by_username(&self, username: &str) -> RepoResult<Option<Member>> {
        self.members
            .find_one_by(&Query::filter(member_spec::username(username)))
    }

    pub fn find_optional_by_username(&self, username: &str) -> RepoResult<Option<Member>> {
        self.find_member_by_username(username)
    }

    pub fn find_by_age(&self, age: i64, request: &PageRequest) -> RepoResult<Page<Member>> {
        self.members
            .find_page(&Query::filter(Predicate::eq("age", age)), request)
    }

    pub fn find_slice_by_age(&self, age: i64, request: &PageRequest) -> RepoResult<Slice<Member>> {
        self.members
            .find_slice(&Query::filter(Predicate::eq("age", age)), request)
    }

    /// Rows of the requested page as a plain list; no count, no has-next probe.
    pub fn find_list_by_age(&self, age: i64, request: &PageRequest) -> RepoResult<Vec<Member>> {
        request.validate()?;
        let query = Query::filter(Predicate::eq("age", age)).sorted(request.sort().clone());
        self.uow()
            .query_window(&query, request.offset(), Some(u64::from(request.size())))
    }

    /// `age = age + 1` for every member at least `age` years old.
    pub fn bulk_age_plus(&self, age: i64, options: BulkOptions) -> RepoResult<u64> {
        self.uow().bulk_update(
            &MEMBER_META,
            vec![("age", Assignment::Add(1))],
            Predicate::ge("age", age),
            options,
        )
    }

    /// All members with their team loaded, teams fetched in id batches.
    pub fn find_member_fetch_join(&self) -> RepoResult<Vec<Member>> {
        let mut members = self.members.find_all_sorted(Sort::asc("member_id"))?;
        let team_ids: Vec<EntityId> = members.iter().filter_map(Member::team_id).collect();
        let teams = self.uow().load_batch::<Team>(team_ids)?;
        for member in &mut members {
            let Some(id) = member.team_id() else {
                continue;
            };
            let team = teams.get(&id).cloned().ok_or(RepoError::NotFound {
                table: Team::meta().table,
                id,
            })?;
            member.team = Some(Reference::Loaded(team));
        }
        Ok(members)
    }

    /// Loaded without a snapshot: later changes to it are never flushed.
    pub fn find_read_only_by_username(&self, username: &str) -> RepoResult<Option<Member>> {
        self.members
            .find_one_by(&Query::filter(member_spec::username(username)).read_only())
    }

    /// Reads under the storage write lock (opens the unit's transaction).
    pub fn find_lock_by_username(&self, username: &str) -> RepoResult<Vec<Member>> {
        self.members.find_by(
            &Query::filter(member_spec::username(username)).with_lock(LockMode::PessimisticWrite),
        )
    }

    /// Members matching a specification built from `member_spec`.
    pub fn find_all_by_spec(&self, spec: Predicate) -> RepoResult<Vec<Member>> {
        self.members
            .find_by(&Query::filter(spec).sorted(Sort::asc("member_id")))
    }

    pub fn find_by_native_query(&self, username: &str) -> RepoResult<Vec<Member>> {
        self.uow()
            .native_query(NATIVE_BY_USERNAME_SQL, &[Value::from(username)])
    }

    /// Native member/team join, paged with a native count.
    pub fn find_by_native_projection(
        &self,
        request: &PageRequest,
    ) -> RepoResult<Page<MemberProjection>> {
        let uow = self.uow();
        paging::fetch_page(
            "member_projection",
            request,
            |offset, limit| {
                let params = [count_param(limit), count_param(offset)];
                uow.native_records(NATIVE_PROJECTION_SQL, &params)?
                    .iter()
                    .map(|record| MemberProjection::from_projected(record).map_err(RepoError::from))
                    .collect()
            },
            || uow.native_count(NATIVE_COUNT_SQL, &[]),
        )
    }

    /// Projected views of members with `username`, fetching only the view's
    /// columns.
    pub fn find_projections_by_username<P: Projection>(
        &self,
        username: &str,
    ) -> RepoResult<Vec<P>> {
        projection::fetch_partial(
            self.uow(),
            &Query::filter(member_spec::username(username)).sorted(Sort::asc("member_id")),
        )
    }
}

impl MemberRepositoryCustom for MemberRepository<'_> {
    fn find_member_custom(&self) -> RepoResult<Vec<Member>> {
        self.uow().query(&Query::all().sorted(Sort::asc("member_id")))
    }
}

fn count_param(value: u64) -> Value {
    Value::Integer(i64::try_from(value).unwrap_or(i64::MAX))
}

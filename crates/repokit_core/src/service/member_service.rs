//! Member use-case service.
//!
//! # Responsibility
//! - Look up a member's username by id.
//! - List members and member DTOs page by page with configured defaults.
//! - Seed demo members and run the age bulk update.
//!
//! # Invariants
//! - Listings are sorted by `username ASC` unless the caller passes a sort.
//! - Requested page sizes are clamped to `max_page_size`.

use crate::config::RepoConfig;
use crate::model::entity::EntityId;
use crate::model::member::Member;
use crate::model::team::Team;
use crate::projection::member_views::MemberDto;
use crate::query::page::{Page, PageRequest};
use crate::query::sort::Sort;
use crate::repo::member_repo::MemberRepository;
use crate::repo::unit_of_work::{BulkOptions, UnitOfWork};
use crate::repo::RepoError;
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type MemberServiceResult<T> = Result<T, MemberServiceError>;

#[derive(Debug)]
pub enum MemberServiceError {
    MemberNotFound(i64),
    Repo(RepoError),
    /// Loaded state that should be impossible (e.g. a stored member without id).
    InconsistentState(&'static str),
}

impl Display for MemberServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemberNotFound(id) => write!(f, "member not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent member state: {details}"),
        }
    }
}

impl Error for MemberServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for MemberServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Optional paging input as a caller would send it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageParams {
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub sort: Option<Sort>,
}

pub struct MemberService<'u> {
    members: MemberRepository<'u>,
    default_page_size: u32,
    max_page_size: u32,
    clear_after_bulk: bool,
}

impl<'u> MemberService<'u> {
    pub fn new(uow: &'u UnitOfWork<'u>, config: &RepoConfig) -> Self {
        Self {
            members: MemberRepository::new(uow),
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
            clear_after_bulk: config.clear_after_bulk,
        }
    }

    pub fn repository(&self) -> &MemberRepository<'u> {
        &self.members
    }

    pub fn find_username(&self, id: i64) -> MemberServiceResult<String> {
        self.members
            .crud()
            .find_by_id(id)?
            .map(|member| member.username)
            .ok_or(MemberServiceError::MemberNotFound(id))
    }

    /// Effective request for `params`: page 0, the default size and
    /// `username ASC` when omitted.
    pub fn page_request(&self, params: &PageParams) -> PageRequest {
        let size = params
            .size
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size);
        let sort = params
            .sort
            .clone()
            .unwrap_or_else(|| Sort::asc("username"));
        PageRequest::sorted(params.page.unwrap_or(0), size, sort)
    }

    pub fn list_members(&self, params: &PageParams) -> MemberServiceResult<Page<Member>> {
        Ok(self.members.crud().find_all_page(&self.page_request(params))?)
    }

    /// One page of members mapped to DTOs, teams loaded in batches.
    pub fn list_member_dtos(&self, params: &PageParams) -> MemberServiceResult<Page<MemberDto>> {
        let page = self.list_members(params)?;
        let team_ids: Vec<EntityId> = page.content().iter().filter_map(Member::team_id).collect();
        let teams = self
            .members
            .crud()
            .unit_of_work()
            .load_batch::<Team>(team_ids)?;
        page.try_map(|member| {
            let id = member
                .id
                .ok_or(MemberServiceError::InconsistentState("stored member without id"))?;
            let team_name = member
                .team_id()
                .and_then(|team_id| teams.get(&team_id))
                .map(|team| team.name.clone());
            Ok(MemberDto {
                id,
                username: member.username,
                team_name,
            })
        })
    }

    /// Saves `count` members named `fad{i}` with age `i` and flushes them.
    pub fn seed_members(&self, count: u32) -> MemberServiceResult<u32> {
        for i in 0..count {
            self.members
                .save(&Member::with_age(format!("fad{i}"), i64::from(i)))?;
        }
        self.members.crud().unit_of_work().flush()?;
        info!("event=member_seed module=service status=ok count={count}");
        Ok(count)
    }

    pub fn bulk_age_plus(&self, age: i64) -> MemberServiceResult<u64> {
        let options = BulkOptions {
            clear_automatically: self.clear_after_bulk,
        };
        Ok(self.members.bulk_age_plus(age, options)?)
    }
}

#[cfg(test)]
mod tests {
    use super::{MemberService, MemberServiceError, PageParams};
    use crate::config::RepoConfig;
    use crate::model::member::Member;
    use crate::model::team::Team;
    use crate::query::sort::Sort;
    use crate::repo::unit_of_work::UnitOfWork;
    use crate::storage::memory::MemoryBackend;

    #[test]
    fn default_listing_is_five_members_sorted_by_username() {
        let backend = MemoryBackend::new();
        let uow = UnitOfWork::new(&backend);
        let service = MemberService::new(&uow, &RepoConfig::default());
        service.seed_members(12).unwrap();

        let page = service.list_members(&PageParams::default()).unwrap();
        let names: Vec<&str> = page.content().iter().map(|m| m.username.as_str()).collect();
        assert_eq!(names, ["fad0", "fad1", "fad10", "fad11", "fad2"]);
        assert_eq!(page.total_elements(), 12);
        assert_eq!(page.total_pages(), 3);
    }

    #[test]
    fn page_size_is_clamped_to_configured_maximum() {
        let backend = MemoryBackend::new();
        let uow = UnitOfWork::new(&backend);
        let config = RepoConfig {
            max_page_size: 10,
            ..RepoConfig::default()
        };
        let service = MemberService::new(&uow, &config);
        let request = service.page_request(&PageParams {
            page: Some(2),
            size: Some(500),
            sort: Some(Sort::desc("age")),
        });
        assert_eq!(request.size(), 10);
        assert_eq!(request.page(), 2);
        assert_eq!(request.sort(), &Sort::desc("age"));
    }

    #[test]
    fn member_dtos_carry_team_names() {
        let backend = MemoryBackend::new();
        let uow = UnitOfWork::new(&backend);
        let service = MemberService::new(&uow, &RepoConfig::default());
        let team = uow.save(&Team::new("teamA")).unwrap();
        uow.save(&Member::with_team("a", 1, &team)).unwrap();
        uow.save(&Member::with_age("b", 2)).unwrap();

        let page = service.list_member_dtos(&PageParams::default()).unwrap();
        let dtos: Vec<(&str, Option<&str>)> = page
            .content()
            .iter()
            .map(|dto| (dto.username.as_str(), dto.team_name.as_deref()))
            .collect();
        assert_eq!(dtos, [("a", Some("teamA")), ("b", None)]);
    }

    #[test]
    fn find_username_of_missing_member_is_not_found() {
        let backend = MemoryBackend::new();
        let uow = UnitOfWork::new(&backend);
        let service = MemberService::new(&uow, &RepoConfig::default());
        let saved = service.repository().save(&Member::with_age("m1", 3)).unwrap();

        assert_eq!(service.find_username(saved.id.unwrap()).unwrap(), "m1");
        assert!(matches!(
            service.find_username(999),
            Err(MemberServiceError::MemberNotFound(999))
        ));
    }
}

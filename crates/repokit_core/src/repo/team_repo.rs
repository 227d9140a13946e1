//! Team repository.
//!
//! The member collection of a team is not stored on the team; it is the set
//! of members whose `team_id` points at it.

use crate::model::entity::EntityId;
use crate::model::member::Member;
use crate::model::team::Team;
use crate::query::predicate::Predicate;
use crate::query::sort::Sort;
use crate::query::Query;
use crate::repo::crud::EntityRepository;
use crate::repo::unit_of_work::UnitOfWork;
use crate::repo::RepoResult;

pub struct TeamRepository<'u> {
    teams: EntityRepository<'u, Team>,
    members: EntityRepository<'u, Member>,
}

impl<'u> TeamRepository<'u> {
    pub fn new(uow: &'u UnitOfWork<'u>) -> Self {
        Self {
            teams: EntityRepository::new(uow),
            members: EntityRepository::new(uow),
        }
    }

    pub fn crud(&self) -> &EntityRepository<'u, Team> {
        &self.teams
    }

    pub fn save(&self, team: &Team) -> RepoResult<Team> {
        self.teams.save(team)
    }

    pub fn find_by_name(&self, name: &str) -> RepoResult<Option<Team>> {
        self.teams
            .find_one_by(&Query::filter(Predicate::eq("name", name)))
    }

    /// Members whose `team_id` is `team_id`, in id order.
    pub fn members_of(&self, team_id: impl Into<EntityId>) -> RepoResult<Vec<Member>> {
        let id = team_id.into();
        self.members.find_by(
            &Query::filter(Predicate::eq("team_id", id.to_value()))
                .sorted(Sort::asc("member_id")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::TeamRepository;
    use crate::model::member::Member;
    use crate::model::team::Team;
    use crate::repo::member_repo::MemberRepository;
    use crate::repo::unit_of_work::UnitOfWork;
    use crate::storage::memory::MemoryBackend;

    #[test]
    fn members_of_follows_the_member_side() {
        let backend = MemoryBackend::new();
        let uow = UnitOfWork::new(&backend);
        let teams = TeamRepository::new(&uow);
        let members = MemberRepository::new(&uow);

        let team_a = teams.save(&Team::new("teamA")).unwrap();
        let team_b = teams.save(&Team::new("teamB")).unwrap();
        members.save(&Member::with_team("m1", 10, &team_a)).unwrap();
        members.save(&Member::with_team("m2", 20, &team_b)).unwrap();
        members.save(&Member::with_team("m3", 30, &team_a)).unwrap();

        let names: Vec<String> = teams
            .members_of(team_a.id.unwrap())
            .unwrap()
            .into_iter()
            .map(|member| member.username)
            .collect();
        assert_eq!(names, ["m1", "m3"]);
        assert_eq!(
            teams.find_by_name("teamB").unwrap().map(|team| team.id),
            Some(team_b.id)
        );
    }

    #[test]
    fn members_of_unknown_team_is_empty() {
        let backend = MemoryBackend::new();
        let uow = UnitOfWork::new(&backend);
        let teams = TeamRepository::new(&uow);
        assert!(teams.members_of(404_i64).unwrap().is_empty());
    }
}

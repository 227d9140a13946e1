use repokit_core::projection::member_views::{
    MemberDto, NestedClosedProjection, TeamInfo, UsernameOnly, UsernameOnlyDto,
};
use repokit_core::projection::{fetch_full, fetch_partial, fetch_partial_page};
use repokit_core::{
    Member, MemberRepository, PageRequest, Predicate, Projection, Query, Sort, SqliteBackend,
    Team, UnitOfWork,
};
use std::fmt::Debug;

fn seed(uow: &UnitOfWork<'_>) {
    let team_a = uow.save(&Team::new("teamA")).unwrap();
    uow.save(&Member::with_team("m1", 10, &team_a)).unwrap();
    uow.save(&Member::with_team("m2", 20, &team_a)).unwrap();
    uow.save(&Member::with_age("m3", 30)).unwrap();
}

fn assert_modes_agree<P: Projection + PartialEq + Debug>(uow: &UnitOfWork<'_>, query: &Query) {
    let partial: Vec<P> = fetch_partial(uow, query).unwrap();
    let full: Vec<P> = fetch_full(uow, query).unwrap();
    assert_eq!(partial, full);
    assert!(!partial.is_empty());
}

#[test]
fn full_and_partial_modes_produce_equal_views() {
    let backend = SqliteBackend::open_in_memory().unwrap();
    let uow = UnitOfWork::new(&backend);
    seed(&uow);
    let query = Query::all().sorted(Sort::asc("username"));

    assert_modes_agree::<UsernameOnly>(&uow, &query);
    assert_modes_agree::<UsernameOnlyDto>(&uow, &query);
    assert_modes_agree::<NestedClosedProjection>(&uow, &query);
    assert_modes_agree::<MemberDto>(&uow, &query);

    uow.clear();
    assert_modes_agree::<NestedClosedProjection>(&uow, &query);
}

#[test]
fn open_projection_computes_username_and_age() {
    let backend = SqliteBackend::open_in_memory().unwrap();
    let uow = UnitOfWork::new(&backend);
    seed(&uow);
    let members = MemberRepository::new(&uow);

    let views: Vec<UsernameOnly> = members.find_projections_by_username("m1").unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].username, "m1 10");

    let dtos: Vec<UsernameOnlyDto> = members.find_projections_by_username("m2").unwrap();
    assert_eq!(dtos[0].username, "m2");
}

#[test]
fn nested_projection_carries_optional_team() {
    let backend = SqliteBackend::open_in_memory().unwrap();
    let uow = UnitOfWork::new(&backend);
    seed(&uow);
    let members = MemberRepository::new(&uow);

    let with_team: Vec<NestedClosedProjection> =
        members.find_projections_by_username("m1").unwrap();
    assert_eq!(
        with_team[0].team,
        Some(TeamInfo {
            name: "teamA".to_string()
        })
    );
    let without_team: Vec<NestedClosedProjection> =
        members.find_projections_by_username("m3").unwrap();
    assert_eq!(without_team[0].team, None);
}

#[test]
fn partial_projection_pages_with_request_sort() {
    let backend = SqliteBackend::open_in_memory().unwrap();
    let uow = UnitOfWork::new(&backend);
    seed(&uow);

    let page = fetch_partial_page::<MemberDto>(
        &uow,
        &Query::filter(Predicate::ge("age", 10)),
        &PageRequest::sorted(0, 2, Sort::desc("age")),
    )
    .unwrap();
    let names: Vec<&str> = page.content().iter().map(|dto| dto.username.as_str()).collect();
    assert_eq!(names, ["m3", "m2"]);
    assert_eq!(page.total_elements(), 3);
    assert!(page.has_next());
}

#[test]
fn member_dto_serializes_as_json() {
    let dto = MemberDto {
        id: 1,
        username: "m1".to_string(),
        team_name: Some("teamA".to_string()),
    };
    let json = serde_json::to_value(&dto).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"id": 1, "username": "m1", "team_name": "teamA"})
    );
}

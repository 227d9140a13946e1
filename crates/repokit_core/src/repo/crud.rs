//! Generic typed repository over a unit of work.
//!
//! # Responsibility
//! - Provide CRUD plus descriptor-based ("derived") queries for one entity type.
//! - Route page/slice requests through the paging engine.
//!
//! # Invariants
//! - Collection queries with no match return an empty vector; single-result
//!   queries with no match return `None`.
//! - A page request's sort, when present, replaces the query's sort.

use crate::model::entity::{Entity, EntityId};
use crate::paging;
use crate::query::example::Example;
use crate::query::page::{Page, PageRequest, Slice, Window};
use crate::query::predicate::Predicate;
use crate::query::sort::Sort;
use crate::query::{Query, QueryError};
use crate::repo::unit_of_work::UnitOfWork;
use crate::repo::RepoResult;
use std::marker::PhantomData;

/// Repository for entity type `E`, bound to one unit of work.
pub struct EntityRepository<'u, E> {
    uow: &'u UnitOfWork<'u>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for EntityRepository<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for EntityRepository<'_, E> {}

impl<'u, E: Entity> EntityRepository<'u, E> {
    pub fn new(uow: &'u UnitOfWork<'u>) -> Self {
        Self {
            uow,
            _entity: PhantomData,
        }
    }

    pub fn unit_of_work(&self) -> &'u UnitOfWork<'u> {
        self.uow
    }

    pub fn save(&self, entity: &E) -> RepoResult<E> {
        self.uow.save(entity)
    }

    pub fn save_all<'a>(&self, entities: impl IntoIterator<Item = &'a E>) -> RepoResult<Vec<E>>
    where
        E: 'a,
    {
        entities.into_iter().map(|entity| self.save(entity)).collect()
    }

    pub fn find_by_id(&self, id: impl Into<EntityId>) -> RepoResult<Option<E>> {
        self.uow.find(id)
    }

    pub fn exists_by_id(&self, id: impl Into<EntityId>) -> RepoResult<bool> {
        Ok(self.find_by_id(id)?.is_some())
    }

    pub fn find_all(&self) -> RepoResult<Vec<E>> {
        self.find_by(&Query::all())
    }

    pub fn find_all_sorted(&self, sort: Sort) -> RepoResult<Vec<E>> {
        self.find_by(&Query::all().sorted(sort))
    }

    pub fn find_all_page(&self, request: &PageRequest) -> RepoResult<Page<E>> {
        self.find_page(&Query::all(), request)
    }

    pub fn count(&self) -> RepoResult<u64> {
        self.count_by(&Predicate::All)
    }

    /// Schedules deletion; the versioned delete runs at flush.
    pub fn delete(&self, entity: &E) -> RepoResult<()> {
        self.uow.remove(entity)
    }

    pub fn delete_by_id(&self, id: impl Into<EntityId>) -> RepoResult<()> {
        self.uow.remove_by_id(E::meta(), id.into())
    }

    pub fn find_by(&self, query: &Query) -> RepoResult<Vec<E>> {
        self.uow.query(query)
    }

    /// Single-result query. More than one match is a validation error.
    pub fn find_one_by(&self, query: &Query) -> RepoResult<Option<E>> {
        let mut rows = self.uow.query_window::<E>(query, 0, Some(2))?;
        if rows.len() > 1 {
            let count = usize::try_from(self.count_by(&query.filter)?).unwrap_or(usize::MAX);
            return Err(QueryError::NonUniqueResult {
                entity: E::meta().name,
                count,
            }
            .into());
        }
        Ok(rows.pop())
    }

    pub fn find_page(&self, query: &Query, request: &PageRequest) -> RepoResult<Page<E>> {
        let query = with_request_sort(query, request);
        paging::fetch_page(
            E::meta().name,
            request,
            |offset, limit| self.uow.query_window(&query, offset, Some(limit)),
            || self.uow.count(E::meta(), &query.filter),
        )
    }

    pub fn find_slice(&self, query: &Query, request: &PageRequest) -> RepoResult<Slice<E>> {
        let query = with_request_sort(query, request);
        paging::fetch_slice(E::meta().name, request, |offset, limit| {
            self.uow.query_window(&query, offset, Some(limit))
        })
    }

    /// Page or slice, chosen by `PageRequest::count_total`.
    pub fn find_window(&self, query: &Query, request: &PageRequest) -> RepoResult<Window<E>> {
        let query = with_request_sort(query, request);
        paging::fetch_window(
            E::meta().name,
            request,
            |offset, limit| self.uow.query_window(&query, offset, Some(limit)),
            || self.uow.count(E::meta(), &query.filter),
        )
    }

    pub fn count_by(&self, filter: &Predicate) -> RepoResult<u64> {
        self.uow.count(E::meta(), filter)
    }

    pub fn find_by_example(&self, example: &Example<E>) -> RepoResult<Vec<E>> {
        self.find_by(&Query::filter(example.to_predicate()))
    }
}

fn with_request_sort(query: &Query, request: &PageRequest) -> Query {
    let mut query = query.clone();
    if !request.sort().is_unsorted() {
        query.sort = request.sort().clone();
    }
    query
}

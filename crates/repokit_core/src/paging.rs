//! Page and slice execution over a fetch/count pair.
//!
//! # Responsibility
//! - Turn a `PageRequest` into a bounded fetch plus, for pages, a count.
//! - Keep page math in one place for entity, projection and native queries.
//!
//! # Invariants
//! - Requests are validated before any storage call.
//! - Page mode always issues the count; slice mode never does and fetches
//!   one extra row to decide `has_next`.

use crate::query::page::{Page, PageRequest, Slice, Window};
use crate::repo::RepoResult;
use log::debug;
use std::time::Instant;

/// Fetches rows `[page*size, page*size+size)` and counts the total.
///
/// `fetch` receives `(offset, limit)`.
pub fn fetch_page<T>(
    label: &str,
    request: &PageRequest,
    fetch: impl FnOnce(u64, u64) -> RepoResult<Vec<T>>,
    count: impl FnOnce() -> RepoResult<u64>,
) -> RepoResult<Page<T>> {
    request.validate()?;
    let started_at = Instant::now();
    let content = fetch(request.offset(), u64::from(request.size()))?;
    let total = count()?;
    debug!(
        "event=page_fetch module=paging status=ok target={label} page={} size={} rows={} total={total} duration_ms={}",
        request.page(),
        request.size(),
        content.len(),
        started_at.elapsed().as_millis()
    );
    Ok(Page::new(content, request, total))
}

/// Fetches `size + 1` rows and reports whether more exist. Never counts.
pub fn fetch_slice<T>(
    label: &str,
    request: &PageRequest,
    fetch: impl FnOnce(u64, u64) -> RepoResult<Vec<T>>,
) -> RepoResult<Slice<T>> {
    request.validate()?;
    let started_at = Instant::now();
    let size = u64::from(request.size());
    let mut content = fetch(request.offset(), size + 1)?;
    let has_next = content.len() as u64 > size;
    content.truncate(request.size() as usize);
    debug!(
        "event=slice_fetch module=paging status=ok target={label} page={} size={} rows={} has_next={has_next} duration_ms={}",
        request.page(),
        request.size(),
        content.len(),
        started_at.elapsed().as_millis()
    );
    Ok(Slice::new(content, request, has_next))
}

/// Page when the request asks for a total count, slice otherwise.
pub fn fetch_window<T>(
    label: &str,
    request: &PageRequest,
    fetch: impl FnOnce(u64, u64) -> RepoResult<Vec<T>>,
    count: impl FnOnce() -> RepoResult<u64>,
) -> RepoResult<Window<T>> {
    if request.count_total() {
        fetch_page(label, request, fetch, count).map(Window::Page)
    } else {
        fetch_slice(label, request, fetch).map(Window::Slice)
    }
}

#[cfg(test)]
mod tests {
    use super::{fetch_page, fetch_slice, fetch_window};
    use crate::query::page::PageRequest;
    use crate::query::QueryError;
    use crate::repo::{RepoError, RepoResult};
    use std::cell::Cell;

    fn rows(offset: u64, limit: u64, total: u64) -> RepoResult<Vec<u64>> {
        Ok((offset..total).take(limit as usize).collect())
    }

    #[test]
    fn page_counts_and_windows_rows() {
        let page =
            fetch_page("n", &PageRequest::of(1, 3), |o, l| rows(o, l, 5), || Ok(5)).unwrap();
        assert_eq!(page.content(), &[3, 4]);
        assert_eq!(page.total_pages(), 2);
        assert!(page.is_last());
        assert!(!page.has_next());
    }

    #[test]
    fn slice_fetches_one_extra_and_never_counts() {
        let slice = fetch_slice("n", &PageRequest::of(0, 3), |o, l| {
            assert_eq!(l, 4);
            rows(o, l, 5)
        })
        .unwrap();
        assert_eq!(slice.content(), &[0, 1, 2]);
        assert!(slice.has_next());

        let last = fetch_slice("n", &PageRequest::of(1, 3), |o, l| rows(o, l, 5)).unwrap();
        assert_eq!(last.content(), &[3, 4]);
        assert!(!last.has_next());
    }

    #[test]
    fn window_without_count_skips_count_query() {
        let counted = Cell::new(false);
        let request = PageRequest::of(0, 2).without_count();
        let window = fetch_window(
            "n",
            &request,
            |o, l| rows(o, l, 5),
            || {
                counted.set(true);
                Ok(5)
            },
        )
        .unwrap();
        assert!(!counted.get());
        assert_eq!(window.total_elements(), None);
        assert!(window.has_next());
    }

    #[test]
    fn zero_size_is_rejected_before_fetch() {
        let err = fetch_page(
            "n",
            &PageRequest::of(0, 0),
            |_, _| -> RepoResult<Vec<u64>> { panic!("fetch must not run") },
            || Ok(0),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RepoError::Validation(QueryError::InvalidPageRequest(_))
        ));
    }
}

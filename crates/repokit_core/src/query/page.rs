//! Page requests and bounded result windows.
//!
//! # Invariants
//! - Page indexes are zero-based; sizes are strictly positive.
//! - `Page` always carries a total count; `Slice` never does.

use crate::query::sort::Sort;
use crate::query::QueryError;
use serde::Serialize;

/// Zero-based page index plus size and optional sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    size: u32,
    sort: Sort,
    count_total: bool,
}

impl PageRequest {
    pub fn of(page: u32, size: u32) -> Self {
        Self {
            page,
            size,
            sort: Sort::unsorted(),
            count_total: true,
        }
    }

    pub fn sorted(page: u32, size: u32, sort: Sort) -> Self {
        Self {
            sort,
            ..Self::of(page, size)
        }
    }

    /// Marks the request as slice-only: no count query will be issued.
    #[must_use]
    pub fn without_count(mut self) -> Self {
        self.count_total = false;
        self
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    pub fn count_total(&self) -> bool {
        self.count_total
    }

    /// Row offset of the first element: `page * size`.
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }

    #[must_use]
    pub fn next(&self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.size == 0 {
            return Err(QueryError::InvalidPageRequest(
                "page size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// One page of content plus the total element count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    content: Vec<T>,
    number: u32,
    size: u32,
    total_elements: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total_elements: u64) -> Self {
        Self {
            content,
            number: request.page(),
            size: request.size(),
            total_elements,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn total_elements(&self) -> u64 {
        self.total_elements
    }

    /// `ceil(total / size)`.
    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            return 0;
        }
        self.total_elements.div_ceil(u64::from(self.size))
    }

    pub fn is_first(&self) -> bool {
        self.number == 0
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    pub fn has_next(&self) -> bool {
        (u64::from(self.number) + 1) * u64::from(self.size) < self.total_elements
    }

    pub fn has_previous(&self) -> bool {
        self.number > 0
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
        }
    }

    /// Like `map`, stopping at the first error.
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            content: self.content.into_iter().map(f).collect::<Result<_, _>>()?,
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
        })
    }
}

/// One window of content plus a has-next flag; total count is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slice<T> {
    content: Vec<T>,
    number: u32,
    size: u32,
    has_next: bool,
}

impl<T> Slice<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, has_next: bool) -> Self {
        Self {
            content,
            number: request.page(),
            size: request.size(),
            has_next,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_first(&self) -> bool {
        self.number == 0
    }

    pub fn is_last(&self) -> bool {
        !self.has_next
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Slice<U> {
        Slice {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            has_next: self.has_next,
        }
    }
}

/// Result of a request whose mode is chosen by `PageRequest::count_total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Window<T> {
    Page(Page<T>),
    Slice(Slice<T>),
}

impl<T> Window<T> {
    pub fn content(&self) -> &[T] {
        match self {
            Self::Page(page) => page.content(),
            Self::Slice(slice) => slice.content(),
        }
    }

    pub fn has_next(&self) -> bool {
        match self {
            Self::Page(page) => page.has_next(),
            Self::Slice(slice) => slice.has_next(),
        }
    }

    /// Total count, when the request asked for one.
    pub fn total_elements(&self) -> Option<u64> {
        match self {
            Self::Page(page) => Some(page.total_elements()),
            Self::Slice(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Page, PageRequest, Slice};

    #[test]
    fn page_math_for_five_rows_size_three() {
        let request = PageRequest::of(0, 3);
        let page = Page::new(vec![1, 2, 3], &request, 5);
        assert_eq!(page.total_pages(), 2);
        assert!(page.is_first());
        assert!(page.has_next());
        assert!(!page.has_previous());

        let second = Page::new(vec![4, 5], &request.next(), 5);
        assert_eq!(second.number(), 1);
        assert!(!second.has_next());
        assert!(second.is_last());
    }

    #[test]
    fn exact_multiple_has_no_extra_page() {
        let page = Page::new(vec![1, 2, 3], &PageRequest::of(1, 3), 6);
        assert_eq!(page.total_pages(), 2);
        assert!(!page.has_next());
    }

    #[test]
    fn empty_total_yields_zero_pages() {
        let page: Page<i32> = Page::new(Vec::new(), &PageRequest::of(0, 10), 0);
        assert_eq!(page.total_pages(), 0);
        assert!(page.is_first());
        assert!(page.is_last());
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(PageRequest::of(0, 0).validate().is_err());
        assert_eq!(PageRequest::of(2, 25).offset(), 50);
    }

    #[test]
    fn map_keeps_paging_metadata() {
        let request = PageRequest::of(0, 2);
        let page = Page::new(vec![1, 2], &request, 3).map(|n| n * 10);
        assert_eq!(page.content(), &[10, 20]);
        assert_eq!(page.total_elements(), 3);

        let slice = Slice::new(vec!["a"], &request, true).map(str::len);
        assert_eq!(slice.content(), &[1]);
        assert!(slice.has_next());
    }
}

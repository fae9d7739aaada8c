//! Paged result type returned by windowed listings.

use serde::{Deserialize, Serialize};

/// A single page of records plus the total number of matches.
///
/// `total` counts every record matching the filter across all pages; it is
/// computed independently of the skip/limit window used to fetch `data`.
///
/// # Example
///
/// ```ignore
/// use docrepo::page::PagedResult;
///
/// let page = PagedResult::new(vec!["a", "b"], 10);
/// assert_eq!(page.len(), 2);
/// assert!(page.has_more(0));
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PagedResult<T> {
    /// The records of the current page, in sort order.
    pub data: Vec<T>,
    /// Total count of matching records across all pages.
    pub total: u64,
}

impl<T> PagedResult<T> {
    pub fn new(data: Vec<T>, total: u64) -> Self {
        Self { data, total }
    }

    /// Number of records in this page.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether records remain beyond this page when it was fetched with `skip`.
    pub fn has_more(&self, skip: u64) -> bool {
        skip + (self.data.len() as u64) < self.total
    }

    /// Maps the records of the page, keeping the total.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedResult<U> {
        PagedResult {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
        }
    }
}

impl<T> Default for PagedResult<T> {
    fn default() -> Self {
        Self { data: Vec::new(), total: 0 }
    }
}

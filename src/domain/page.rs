//! Pagination and list filtering.

use serde::Serialize;

/// A 1-indexed page request. Validated upstream; the store only does the
/// arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Page number, starting at 1.
    pub page: u32,
    /// Items per page.
    pub page_size: u32,
}

impl PageRequest {
    /// Creates a page request.
    #[must_use]
    pub const fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    /// Number of rows to skip: `(page - 1) * page_size`.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        (self.page.saturating_sub(1) as u64) * self.page_size as u64
    }

    /// Maximum number of rows to return.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.page_size
    }
}

/// Optional restrictions for list queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Only comics with `track = true`.
    pub tracked_only: bool,
    /// Only tracked comics with chapters the reader has not seen.
    pub unchecked_only: bool,
}

/// One page of results plus the total match count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Number of matching rows across all pages.
    pub total: u64,
    /// Page number this page answers.
    pub page: u32,
    /// Page size used.
    pub page_size: u32,
}

impl<T> Page<T> {
    /// Assembles a page.
    #[must_use]
    pub const fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
        }
    }

    /// `ceil(total / page_size)`; zero when there are no rows or the page
    /// size is zero.
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_size as u64)
    }
}

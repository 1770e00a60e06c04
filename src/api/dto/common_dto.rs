//! Shared DTO types used across multiple endpoints.

use serde::{Deserialize, Serialize};

use crate::domain::{ListFilter, Page, PageRequest};

/// Largest accepted `per_page`.
pub const MAX_PER_PAGE: u32 = 100;

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

/// Pagination query parameters for list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationParams {
    /// Page number (1-indexed). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Items per page (max 100). Defaults to 20.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PaginationParams {
    /// Clamps `page` to at least 1 and `per_page` to `1..=100`.
    #[must_use]
    pub fn clamped(&self) -> PageRequest {
        PageRequest::new(self.page.max(1), self.per_page.clamp(1, MAX_PER_PAGE))
    }
}

/// Query parameters for `GET /comics`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListComicsParams {
    /// Page number (1-indexed). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Items per page (max 100). Defaults to 20.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// Only tracked comics.
    #[serde(default)]
    pub tracked: bool,
    /// Only tracked comics with unread chapters.
    #[serde(default)]
    pub unchecked: bool,
}

impl ListComicsParams {
    /// Page request and filter for the store.
    #[must_use]
    pub fn split(&self) -> (PageRequest, ListFilter) {
        let page = PaginationParams {
            page: self.page,
            per_page: self.per_page,
        }
        .clamped();
        let filter = ListFilter {
            tracked_only: self.tracked,
            unchecked_only: self.unchecked,
        };
        (page, filter)
    }
}

/// Query parameters for `GET /comics/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    /// Search term; must not be blank.
    #[serde(default)]
    pub q: String,
    /// Page number (1-indexed). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Items per page (max 100). Defaults to 20.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl SearchParams {
    /// Clamped page request.
    #[must_use]
    pub fn page_request(&self) -> PageRequest {
        PaginationParams {
            page: self.page,
            per_page: self.per_page,
        }
        .clamped()
    }
}

/// Pagination metadata included in list responses.
#[derive(Debug, Clone, Serialize)]
pub struct PaginationMeta {
    /// Current page number.
    pub page: u32,
    /// Items per page.
    pub per_page: u32,
    /// Total number of items.
    pub total: u64,
    /// Total number of pages.
    pub total_pages: u64,
}

impl<T> From<&Page<T>> for PaginationMeta {
    fn from(page: &Page<T>) -> Self {
        Self {
            page: page.page,
            per_page: page.page_size,
            total: page.total,
            total_pages: page.total_pages(),
        }
    }
}

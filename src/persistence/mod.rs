//! Persistence layer: the comic store and its backends.
//!
//! [`ComicStore`] is the capability interface handlers call.
//! [`ResilientComicStore`] implements it once, on top of the query executor,
//! for any [`ComicBackend`]; backends only supply raw query bodies over a
//! pooled connection:
//!
//! - [`postgres::PostgresBackend`]: PostgreSQL via `sqlx`
//! - [`memory::MemoryBackend`]: shared in-process table for tests and local
//!   runs

pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::context::QueryContext;
use crate::db::{ConnectionManager, MetricsSnapshot};
use crate::domain::{Comic, ComicId, ListFilter, Page, PageRequest};
use crate::error::StoreError;

pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;
pub use store::ResilientComicStore;

/// Row selection shared by the count and page queries of `List` and
/// `Search`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComicQuery {
    /// Non-deleted comics matching the filter.
    All(ListFilter),
    /// Non-deleted comics whose titles, author or description contain the
    /// term, case-insensitively.
    Search(String),
}

/// Raw query bodies for one storage engine.
///
/// Implementations perform exactly one round of work per call and never
/// retry; soft-deleted rows are invisible to every read and write except
/// `insert`.
#[async_trait]
pub trait ComicBackend: ConnectionManager + fmt::Debug {
    /// Inserts `comic` with `last_update = now` and returns the new id.
    ///
    /// # Errors
    ///
    /// Returns the driver error on failure.
    async fn insert(
        &self,
        conn: &mut Self::Connection,
        comic: &Comic,
        now: DateTime<Utc>,
    ) -> Result<ComicId, StoreError>;

    /// Replaces every field of the live row with `comic.id`; returns the
    /// number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns the driver error on failure.
    async fn update(
        &self,
        conn: &mut Self::Connection,
        comic: &Comic,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Flags the live row `id` as deleted; returns the number of rows
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns the driver error on failure.
    async fn soft_delete(
        &self,
        conn: &mut Self::Connection,
        id: ComicId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Fetches the live row `id`.
    ///
    /// # Errors
    ///
    /// Returns the driver error on failure.
    async fn find_by_id(
        &self,
        conn: &mut Self::Connection,
        id: ComicId,
    ) -> Result<Option<Comic>, StoreError>;

    /// Fetches the lowest-id live row with a title containing `title`,
    /// case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns the driver error on failure.
    async fn find_by_title(
        &self,
        conn: &mut Self::Connection,
        title: &str,
    ) -> Result<Option<Comic>, StoreError>;

    /// Counts the rows selected by `query`.
    ///
    /// # Errors
    ///
    /// Returns the driver error on failure.
    async fn count(&self, conn: &mut Self::Connection, query: &ComicQuery)
    -> Result<u64, StoreError>;

    /// Fetches one page of the rows selected by `query`, newest
    /// `last_update` first.
    ///
    /// # Errors
    ///
    /// Returns the driver error on failure.
    async fn fetch_page(
        &self,
        conn: &mut Self::Connection,
        query: &ComicQuery,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Comic>, StoreError>;
}

/// Comic catalog operations, as seen by handlers.
///
/// Every method except [`ComicStore::metrics_snapshot`] runs through the
/// resilient executor under an operation name equal to the method name.
#[async_trait]
pub trait ComicStore: Send + Sync + fmt::Debug {
    /// Stores a new comic and returns its id.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArgument`] for a comic without titles, or any
    /// executor error.
    async fn create(&self, ctx: &QueryContext, comic: &Comic) -> Result<ComicId, StoreError>;

    /// Replaces every field of the comic with `comic.id`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no live row has that id.
    async fn update(&self, ctx: &QueryContext, comic: &Comic) -> Result<(), StoreError>;

    /// Soft-deletes a comic.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no live row has that id.
    async fn delete(&self, ctx: &QueryContext, id: ComicId) -> Result<(), StoreError>;

    /// Fetches a comic by id.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no live row has that id.
    async fn get_by_id(&self, ctx: &QueryContext, id: ComicId) -> Result<Comic, StoreError>;

    /// Fetches the first comic with a title containing `title`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when nothing matches.
    async fn get_by_title(&self, ctx: &QueryContext, title: &str) -> Result<Comic, StoreError>;

    /// Lists comics, newest first.
    ///
    /// # Errors
    ///
    /// Any executor error.
    async fn list(
        &self,
        ctx: &QueryContext,
        page: PageRequest,
        filter: ListFilter,
    ) -> Result<Page<Comic>, StoreError>;

    /// Searches titles, author and description.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArgument`] for an empty term, or any executor
    /// error.
    async fn search(
        &self,
        ctx: &QueryContext,
        term: &str,
        page: PageRequest,
    ) -> Result<Page<Comic>, StoreError>;

    /// Round-trips to the store.
    ///
    /// # Errors
    ///
    /// Any executor error.
    async fn ping(&self, ctx: &QueryContext) -> Result<(), StoreError>;

    /// Closes the connection pool. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// The context error if `ctx` ends before checked-out connections come
    /// back.
    async fn close(&self, ctx: &QueryContext) -> Result<(), StoreError>;

    /// Current metrics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

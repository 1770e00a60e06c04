//! The resilient comic store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::{ComicBackend, ComicQuery, ComicStore};
use crate::context::QueryContext;
use crate::db::{
    BackoffPolicy, ConnectionManager, ConnectionPool, MetricsCollector, MetricsSnapshot,
    PoolConfig, PooledConnection, QueryExecutor, TracingProvider,
};
use crate::domain::{Comic, ComicId, ListFilter, Page, PageRequest};
use crate::error::StoreError;
use crate::health::Pinger;

/// [`ComicStore`] over any [`ComicBackend`], with every call wrapped in the
/// query executor.
///
/// Each attempt checks out its own pooled connection. A connection that
/// fails with a connection fault is discarded on release so the retry gets
/// a fresh one.
#[derive(Debug)]
pub struct ResilientComicStore<B: ComicBackend> {
    executor: QueryExecutor<B>,
}

/// Hands a connection fault back to the guard before returning `result`.
fn settle<B: ConnectionManager, T>(
    conn: &mut PooledConnection<B>,
    result: Result<T, StoreError>,
) -> Result<T, StoreError> {
    if let Err(err) = &result {
        conn.observe(err);
    }
    result
}

fn found<T>(rows: u64, value: T) -> Result<T, StoreError> {
    if rows == 0 {
        Err(StoreError::NotFound)
    } else {
        Ok(value)
    }
}

impl<B: ComicBackend> ResilientComicStore<B> {
    /// Starts the pool for `backend` and wires the executor.
    ///
    /// The executor's retry ceiling is [`PoolConfig::backoff_timeout`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Startup`] if the store never answered the
    /// startup ping, or the context error if `ctx` ended first.
    pub async fn connect(
        backend: B,
        config: PoolConfig,
        tracer: Arc<dyn TracingProvider>,
        ctx: &QueryContext,
    ) -> Result<Self, StoreError> {
        let metrics = Arc::new(MetricsCollector::new());
        let backoff = BackoffPolicy::with_max_elapsed(config.backoff_timeout);
        let pool = ConnectionPool::connect(backend, config, Arc::clone(&metrics), ctx).await?;
        Ok(Self::from_executor(QueryExecutor::new(
            pool, metrics, tracer, backoff,
        )))
    }

    /// Wraps an already wired executor.
    #[must_use]
    pub const fn from_executor(executor: QueryExecutor<B>) -> Self {
        Self { executor }
    }

    /// The executor every call runs through.
    #[must_use]
    pub const fn executor(&self) -> &QueryExecutor<B> {
        &self.executor
    }

    /// The backend the pool opens connections with.
    #[must_use]
    pub fn backend(&self) -> &B {
        self.executor.pool().manager()
    }

    /// Shared `List` / `Search` body: count plus one page on the same
    /// connection.
    async fn page(
        &self,
        ctx: &QueryContext,
        operation: &'static str,
        query: &ComicQuery,
        request: PageRequest,
    ) -> Result<Page<Comic>, StoreError> {
        let pool = self.executor.pool();
        self.executor
            .execute(ctx, operation, || async move {
                let backend = pool.manager();
                let mut conn = pool.acquire(ctx).await?;
                let total = backend.count(conn.connection()?, query).await;
                let total = settle(&mut conn, total)?;
                let items = backend
                    .fetch_page(conn.connection()?, query, request.limit(), request.offset())
                    .await;
                let items = settle(&mut conn, items)?;
                Ok(Page::new(items, total, request))
            })
            .await
    }
}

#[async_trait]
impl<B: ComicBackend> ComicStore for ResilientComicStore<B> {
    async fn create(&self, ctx: &QueryContext, comic: &Comic) -> Result<ComicId, StoreError> {
        let pool = self.executor.pool();
        self.executor
            .execute(ctx, "Create", || async move {
                comic.validate()?;
                let mut conn = pool.acquire(ctx).await?;
                let id = pool
                    .manager()
                    .insert(conn.connection()?, comic, Utc::now())
                    .await;
                settle(&mut conn, id)
            })
            .await
    }

    async fn update(&self, ctx: &QueryContext, comic: &Comic) -> Result<(), StoreError> {
        let pool = self.executor.pool();
        self.executor
            .execute(ctx, "Update", || async move {
                comic.validate()?;
                let mut conn = pool.acquire(ctx).await?;
                let rows = pool
                    .manager()
                    .update(conn.connection()?, comic, Utc::now())
                    .await;
                found(settle(&mut conn, rows)?, ())
            })
            .await
    }

    async fn delete(&self, ctx: &QueryContext, id: ComicId) -> Result<(), StoreError> {
        let pool = self.executor.pool();
        self.executor
            .execute(ctx, "Delete", || async move {
                let mut conn = pool.acquire(ctx).await?;
                let rows = pool
                    .manager()
                    .soft_delete(conn.connection()?, id, Utc::now())
                    .await;
                found(settle(&mut conn, rows)?, ())
            })
            .await
    }

    async fn get_by_id(&self, ctx: &QueryContext, id: ComicId) -> Result<Comic, StoreError> {
        let pool = self.executor.pool();
        self.executor
            .execute(ctx, "GetByID", || async move {
                let mut conn = pool.acquire(ctx).await?;
                let row = pool.manager().find_by_id(conn.connection()?, id).await;
                settle(&mut conn, row)?.ok_or(StoreError::NotFound)
            })
            .await
    }

    async fn get_by_title(&self, ctx: &QueryContext, title: &str) -> Result<Comic, StoreError> {
        let pool = self.executor.pool();
        self.executor
            .execute(ctx, "GetByTitle", || async move {
                let title = title.trim();
                if title.is_empty() {
                    return Err(StoreError::InvalidArgument("title must not be empty".to_string()));
                }
                let mut conn = pool.acquire(ctx).await?;
                let row = pool.manager().find_by_title(conn.connection()?, title).await;
                settle(&mut conn, row)?.ok_or(StoreError::NotFound)
            })
            .await
    }

    async fn list(
        &self,
        ctx: &QueryContext,
        page: PageRequest,
        filter: ListFilter,
    ) -> Result<Page<Comic>, StoreError> {
        self.page(ctx, "List", &ComicQuery::All(filter), page).await
    }

    async fn search(
        &self,
        ctx: &QueryContext,
        term: &str,
        page: PageRequest,
    ) -> Result<Page<Comic>, StoreError> {
        let term = term.trim();
        if term.is_empty() {
            // Still recorded under `Search`, like any other failed call.
            return self
                .executor
                .execute(ctx, "Search", || async {
                    Err(StoreError::InvalidArgument("search term must not be empty".to_string()))
                })
                .await;
        }
        self.page(ctx, "Search", &ComicQuery::Search(term.to_string()), page)
            .await
    }

    async fn ping(&self, ctx: &QueryContext) -> Result<(), StoreError> {
        self.executor.ping(ctx).await
    }

    async fn close(&self, ctx: &QueryContext) -> Result<(), StoreError> {
        self.executor.pool().close(ctx).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        let metrics = self.executor.metrics();
        metrics.record_pool_state(&self.executor.pool().stats());
        metrics.snapshot()
    }
}

#[async_trait]
impl<B: ComicBackend> Pinger for ResilientComicStore<B> {
    async fn ping(&self, ctx: &QueryContext) -> Result<(), StoreError> {
        self.executor.ping(ctx).await
    }
}

//! End-to-end scenarios for `ResilientComicStore` over scripted and
//! in-memory backends.

#![allow(clippy::panic)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use comics_gateway::context::QueryContext;
use comics_gateway::db::{ConnectionManager, OtelTracingProvider, PoolConfig, TracingProvider};
use comics_gateway::domain::{Comic, ComicId, ListFilter, PageRequest};
use comics_gateway::error::StoreError;
use comics_gateway::health::{HealthChecker, HealthConfig, Pinger, ReadinessState};
use comics_gateway::persistence::{
    ComicBackend, ComicQuery, ComicStore, MemoryBackend, ResilientComicStore,
};

/// Backend whose queries either fail with a connection error or answer
/// with a fixed row count, recording every page window it is asked for.
#[derive(Debug, Default)]
struct ScriptedBackend {
    failing: AtomicBool,
    total: u64,
    queries: AtomicUsize,
    windows: Mutex<Vec<(u32, u64)>>,
}

impl ScriptedBackend {
    fn with_total(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    fn enter(&self) -> Result<(), StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("connection reset by peer".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionManager for ScriptedBackend {
    type Connection = ();

    async fn connect(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ping(&self, _conn: &mut ()) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl ComicBackend for ScriptedBackend {
    async fn insert(
        &self,
        _conn: &mut (),
        _comic: &Comic,
        _now: DateTime<Utc>,
    ) -> Result<ComicId, StoreError> {
        self.enter()?;
        Ok(ComicId::new(1))
    }

    async fn update(
        &self,
        _conn: &mut (),
        _comic: &Comic,
        _now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.enter()?;
        Ok(0)
    }

    async fn soft_delete(
        &self,
        _conn: &mut (),
        _id: ComicId,
        _now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.enter()?;
        Ok(0)
    }

    async fn find_by_id(&self, _conn: &mut (), id: ComicId) -> Result<Option<Comic>, StoreError> {
        self.enter()?;
        let mut comic = Comic::new("Scripted", "nobody");
        comic.id = id;
        Ok(Some(comic))
    }

    async fn find_by_title(
        &self,
        _conn: &mut (),
        _title: &str,
    ) -> Result<Option<Comic>, StoreError> {
        self.enter()?;
        Ok(None)
    }

    async fn count(&self, _conn: &mut (), _query: &ComicQuery) -> Result<u64, StoreError> {
        self.enter()?;
        Ok(self.total)
    }

    async fn fetch_page(
        &self,
        _conn: &mut (),
        _query: &ComicQuery,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Comic>, StoreError> {
        self.enter()?;
        if let Ok(mut windows) = self.windows.lock() {
            windows.push((limit, offset));
        }
        let remaining = self.total.saturating_sub(offset).min(u64::from(limit));
        Ok((0..remaining)
            .map(|i| Comic::new(format!("Row {}", offset + i), "nobody"))
            .collect())
    }
}

fn pool_config(backoff: Duration) -> PoolConfig {
    PoolConfig {
        max_size: 8,
        acquire_timeout: Duration::from_secs(1),
        backoff_timeout: backoff,
        ..PoolConfig::default()
    }
}

async fn start<B: ComicBackend>(backend: B, backoff: Duration) -> ResilientComicStore<B> {
    let tracer: Arc<dyn TracingProvider> = Arc::new(OtelTracingProvider::global("scenarios"));
    let Ok(store) = ResilientComicStore::connect(
        backend,
        pool_config(backoff),
        tracer,
        &QueryContext::background(),
    )
    .await
    else {
        panic!("store should start");
    };
    store
}

#[tokio::test(start_paused = true)]
async fn create_then_get_returns_input_with_assigned_id() {
    let store = start(MemoryBackend::with_next_id(7), Duration::from_secs(15)).await;
    let ctx = QueryContext::background();

    let input = Comic::new("A", "x");
    let Ok(id) = store.create(&ctx, &input).await else {
        panic!("create should succeed");
    };
    assert_eq!(id, ComicId::new(7));

    let Ok(stored) = store.get_by_id(&ctx, id).await else {
        panic!("get should succeed");
    };
    assert_ne!(stored.last_update, input.last_update);
    let expected = Comic {
        id,
        last_update: stored.last_update,
        ..input
    };
    assert_eq!(stored, expected);
}

#[tokio::test(start_paused = true)]
async fn update_of_missing_row_is_attempted_once() {
    let backend = MemoryBackend::new();
    let store = start(backend.clone(), Duration::from_secs(15)).await;

    let mut ghost = Comic::new("Ghost", "nobody");
    ghost.id = ComicId::new(999);
    let result = store.update(&QueryContext::background(), &ghost).await;

    assert_err!(&result);
    assert!(matches!(result, Err(StoreError::NotFound)));
    assert_eq!(backend.calls("update"), 1);
    assert_eq!(store.metrics_snapshot().total_retries, 0);
}

#[tokio::test(start_paused = true)]
async fn page_two_of_ten_reads_from_offset_ten() {
    let store = start(ScriptedBackend::with_total(25), Duration::from_secs(15)).await;

    let Ok(page) = store
        .list(
            &QueryContext::background(),
            PageRequest::new(2, 10),
            ListFilter::default(),
        )
        .await
    else {
        panic!("list should succeed");
    };

    assert_eq!(page.total, 25);
    assert_eq!(page.total_pages(), 3);
    assert_eq!(page.items.len(), 10);
    assert_eq!(page.items.first().and_then(Comic::title), Some("Row 10"));
    let windows = store
        .backend()
        .windows
        .lock()
        .map(|w| w.clone())
        .unwrap_or_default();
    assert_eq!(windows, vec![(10, 10)]);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_stop_at_the_backoff_ceiling() {
    let ceiling = Duration::from_secs(4);
    let store = start(ScriptedBackend::with_total(0), ceiling).await;
    store.backend().failing.store(true, Ordering::SeqCst);

    let started = Instant::now();
    let result = store
        .get_by_id(&QueryContext::background(), ComicId::new(1))
        .await;

    assert!(matches!(result, Err(StoreError::Connection(_))));
    assert!(started.elapsed() <= ceiling);
    let attempts = store.backend().queries.load(Ordering::SeqCst);
    assert!((2..20).contains(&attempts), "attempts = {attempts}");

    let snap = store.metrics_snapshot();
    assert_eq!(snap.total_queries, 1);
    assert_eq!(snap.failed_queries, 1);
    assert_eq!(snap.total_retries, attempts as u64 - 1);
    assert_eq!(snap.successful_retries, 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_ends_retries_within_one_delay() {
    let store = start(ScriptedBackend::with_total(0), Duration::from_secs(600)).await;
    store.backend().failing.store(true, Ordering::SeqCst);

    let ctx = QueryContext::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let result = store.get_by_id(&ctx, ComicId::new(1)).await;

    assert!(matches!(result, Err(StoreError::Canceled)));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn deadline_is_reported_as_deadline_exceeded() {
    let store = start(ScriptedBackend::with_total(0), Duration::from_secs(600)).await;
    store.backend().failing.store(true, Ordering::SeqCst);

    let ctx = QueryContext::with_timeout(Duration::from_millis(1_500));
    let result = store.get_by_id(&ctx, ComicId::new(1)).await;

    assert!(matches!(result, Err(StoreError::DeadlineExceeded)));
}

#[tokio::test(start_paused = true)]
async fn concurrent_calls_keep_metrics_consistent() {
    let backend = MemoryBackend::new();
    let store = Arc::new(start(backend, Duration::from_secs(15)).await);
    let ctx = QueryContext::background();
    let Ok(id) = store.create(&ctx, &Comic::new("Seed", "x")).await else {
        panic!("seed create should succeed");
    };
    let base = store.metrics_snapshot();

    let (successes, failures) = (30u64, 18u64);
    let handles = (0..successes + failures).map(|i| {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let ctx = QueryContext::background();
            let target = if i < successes { id } else { ComicId::new(10_000) };
            store.get_by_id(&ctx, target).await.is_ok()
        })
    });
    let ok = join_all(handles)
        .await
        .into_iter()
        .filter(|joined| matches!(joined, Ok(true)))
        .count() as u64;

    let snap = store.metrics_snapshot();
    assert_eq!(ok, successes);
    assert_eq!(snap.total_queries - base.total_queries, successes + failures);
    assert_eq!(snap.successful_queries - base.successful_queries, successes);
    assert_eq!(snap.failed_queries - base.failed_queries, failures);
    assert_eq!(snap.active_connections, 0);
}

#[tokio::test(start_paused = true)]
async fn close_twice_returns_promptly() {
    let store = start(MemoryBackend::new(), Duration::from_secs(15)).await;
    let ctx = QueryContext::with_timeout(Duration::from_millis(100));

    assert_ok!(store.close(&ctx).await);
    let started = Instant::now();
    assert_ok!(store.close(&ctx).await);
    assert!(started.elapsed() < Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn readiness_follows_store_pings() {
    let backend = MemoryBackend::new();
    let store = Arc::new(start(backend.clone(), Duration::from_millis(500)).await);
    let config = HealthConfig {
        interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(2),
        timeout: Duration::from_millis(800),
    };
    let checker = Arc::new(HealthChecker::new(
        Arc::clone(&store) as Arc<dyn Pinger>,
        config,
    ));
    assert_eq!(checker.state(), ReadinessState::NotReady);

    checker.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(checker.is_ready());

    // Enough injected faults to outlast one executor ping's retries.
    backend.fail_next(1_000);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(checker.state(), ReadinessState::NotReady);

    backend.fail_next(0);
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(checker.is_ready());

    checker.stop().await;
    backend.fail_next(1_000);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(checker.state(), ReadinessState::Stopped);
}

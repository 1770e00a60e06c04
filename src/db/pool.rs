//! Bounded connection pool.
//!
//! The pool hands out [`PooledConnection`] guards. A guard holds one
//! semaphore permit for its whole life, so the number of checked-out
//! connections never exceeds [`PoolConfig::max_size`]; dropping the guard
//! parks the connection back in the idle queue (or retires it) before the
//! permit is released.
//!
//! Idle connections are validated before reuse and reclaimed by a
//! background reaper once they sit idle longer than
//! [`PoolConfig::max_idle_time`]. Connections older than
//! [`PoolConfig::max_lifetime`] are retired on their next release.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::backoff::{BackoffPolicy, RetryError};
use super::metrics::MetricsCollector;
use crate::context::QueryContext;
use crate::error::StoreError;

/// Upper bound for the reaper period.
const MAX_REAP_INTERVAL: Duration = Duration::from_secs(30);
/// Lower bound for the reaper period.
const MIN_REAP_INTERVAL: Duration = Duration::from_millis(100);

/// Opens, checks and closes connections to the backing store.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    /// Live connection type.
    type Connection: Send + 'static;

    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Returns a transient error when the store cannot be reached.
    async fn connect(&self) -> Result<Self::Connection, StoreError>;

    /// Round-trips to the store over `conn`.
    ///
    /// # Errors
    ///
    /// Returns the error reported by the store or the transport.
    async fn ping(&self, conn: &mut Self::Connection) -> Result<(), StoreError>;

    /// Whether an idle connection may be handed out again.
    async fn is_valid(&self, conn: &mut Self::Connection) -> bool {
        self.ping(conn).await.is_ok()
    }

    /// Closes a connection the pool no longer wants.
    ///
    /// # Errors
    ///
    /// Returns the error raised while closing; the connection is gone
    /// either way.
    async fn close(&self, conn: Self::Connection) -> Result<(), StoreError> {
        drop(conn);
        Ok(())
    }
}

/// Pool sizing and timing. Fixed once the pool is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of checked-out connections.
    pub max_size: usize,
    /// Connections the reaper keeps open even when unused.
    pub min_size: usize,
    /// Idle connections older than this are closed by the reaper.
    pub max_idle_time: Duration,
    /// Connections older than this are retired on release.
    pub max_lifetime: Duration,
    /// Deadline for opening one connection.
    pub connect_timeout: Duration,
    /// Longest a caller waits for a free slot.
    pub acquire_timeout: Duration,
    /// Elapsed-time ceiling for retries, including the startup ping.
    pub backoff_timeout: Duration,
    /// Validate idle connections before handing them out.
    pub test_before_acquire: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 25,
            min_size: 0,
            max_idle_time: Duration::from_secs(5 * 60),
            max_lifetime: Duration::from_secs(60 * 60),
            connect_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(30),
            backoff_timeout: Duration::from_secs(15),
            test_before_acquire: true,
        }
    }
}

impl PoolConfig {
    /// How often the reaper runs: the idle timeout, bounded to
    /// `[100ms, 30s]`.
    #[must_use]
    pub fn reap_interval(&self) -> Duration {
        self.max_idle_time.clamp(MIN_REAP_INTERVAL, MAX_REAP_INTERVAL)
    }
}

/// Identifier attached to every physical connection for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Checked-out connections.
    pub active: usize,
    /// Parked connections.
    pub idle: usize,
    /// `active + idle`.
    pub total: usize,
    /// Configured maximum.
    pub max_size: usize,
}

impl PoolStats {
    /// Checked-out share of `max_size`, in percent.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            (self.active as f64 / self.max_size as f64) * 100.0
        }
    }
}

struct IdleConnection<C> {
    conn: C,
    id: ConnectionId,
    created_at: Instant,
    idle_since: Instant,
}

impl<C> IdleConnection<C> {
    fn is_expired(&self, config: &PoolConfig, now: Instant) -> bool {
        now.saturating_duration_since(self.idle_since) >= config.max_idle_time
            || now.saturating_duration_since(self.created_at) >= config.max_lifetime
    }
}

struct PoolState<C> {
    idle: VecDeque<IdleConnection<C>>,
    active: usize,
}

struct PoolInner<M: ConnectionManager> {
    manager: M,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState<M::Connection>>,
    metrics: Arc<MetricsCollector>,
    closed: AtomicBool,
    released: Notify,
    reaper: CancellationToken,
    reaper_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<M: ConnectionManager> PoolInner<M> {
    fn lock_state(&self) -> MutexGuard<'_, PoolState<M::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn stats(&self) -> PoolStats {
        let state = self.lock_state();
        PoolStats {
            active: state.active,
            idle: state.idle.len(),
            total: state.active + state.idle.len(),
            max_size: self.config.max_size,
        }
    }

    fn publish_stats(&self) {
        self.metrics.record_pool_state(&self.stats());
    }

    async fn close_connection(&self, conn: M::Connection, id: ConnectionId) {
        if let Err(err) = self.manager.close(conn).await {
            tracing::debug!(connection_id = %id, error = %err, "error while closing connection");
        }
        self.metrics.record_connection_closed();
        tracing::debug!(connection_id = %id, "connection closed");
    }

    async fn open_connection(&self) -> Result<M::Connection, StoreError> {
        let timeout = self.config.connect_timeout;
        let conn = tokio::time::timeout(timeout, self.manager.connect())
            .await
            .map_err(|_| StoreError::Connection(format!("connect timed out after {timeout:?}")))??;
        self.metrics.record_connection_created();
        Ok(conn)
    }

    /// Returns a connection from a dropped guard.
    fn release(
        this: &Arc<Self>,
        conn: M::Connection,
        id: ConnectionId,
        created_at: Instant,
        discard: bool,
    ) {
        let retire = discard || created_at.elapsed() >= this.config.max_lifetime;

        let to_close = {
            let mut state = this.lock_state();
            state.active = state.active.saturating_sub(1);
            // Checked under the lock so a concurrent close() cannot drain
            // the idle queue between the check and the push.
            if retire || this.is_closed() {
                Some(conn)
            } else {
                state.idle.push_back(IdleConnection {
                    conn,
                    id,
                    created_at,
                    idle_since: Instant::now(),
                });
                None
            }
        };
        this.publish_stats();
        this.released.notify_waiters();

        let Some(conn) = to_close else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(this);
                handle.spawn(async move {
                    inner.close_connection(conn, id).await;
                });
            }
            Err(_) => {
                drop(conn);
                this.metrics.record_connection_closed();
            }
        }
    }

    /// Closes idle connections past their idle timeout or lifetime.
    async fn reap_idle(&self) {
        let now = Instant::now();
        let expired: Vec<IdleConnection<M::Connection>> = {
            let mut state = self.lock_state();
            let (expired, keep): (Vec<_>, Vec<_>) = state
                .idle
                .drain(..)
                .partition(|idle| idle.is_expired(&self.config, now));
            state.idle = keep.into();
            expired
        };
        if expired.is_empty() {
            return;
        }
        tracing::debug!(count = expired.len(), "reaping idle connections");
        join_all(
            expired
                .into_iter()
                .map(|idle| self.close_connection(idle.conn, idle.id)),
        )
        .await;
        self.publish_stats();
    }

    /// Opens connections until `min_size` are live.
    async fn maintain_min(&self) {
        loop {
            if self.is_closed() {
                return;
            }
            let stats = self.stats();
            if stats.total >= self.config.min_size || stats.total >= self.config.max_size {
                return;
            }
            // Holding a permit keeps the top-up from racing past max_size.
            let Ok(_permit) = self.semaphore.try_acquire() else {
                return;
            };
            match self.open_connection().await {
                Ok(conn) => {
                    let now = Instant::now();
                    let id = ConnectionId::new();
                    let rejected = {
                        let mut state = self.lock_state();
                        if self.is_closed() {
                            Some(conn)
                        } else {
                            state.idle.push_back(IdleConnection {
                                conn,
                                id,
                                created_at: now,
                                idle_since: now,
                            });
                            None
                        }
                    };
                    if let Some(conn) = rejected {
                        self.close_connection(conn, id).await;
                        return;
                    }
                    self.publish_stats();
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to open warm connection");
                    return;
                }
            }
        }
    }
}

async fn run_reaper<M: ConnectionManager>(pool: Weak<PoolInner<M>>, token: CancellationToken, every: Duration) {
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            () = tokio::time::sleep(every) => {}
        }
        let Some(inner) = pool.upgrade() else {
            return;
        };
        inner.reap_idle().await;
        inner.maintain_min().await;
    }
}

/// A bounded pool of connections produced by a [`ConnectionManager`].
///
/// Cloning is cheap and yields a handle to the same pool.
pub struct ConnectionPool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ConnectionManager> fmt::Debug for ConnectionPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("stats", &self.inner.stats())
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

impl<M: ConnectionManager> ConnectionPool<M> {
    /// Builds the pool, confirms the store is reachable and starts the
    /// reaper.
    ///
    /// The startup ping is retried under [`BackoffPolicy`] with
    /// [`PoolConfig::backoff_timeout`] as its ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Startup`] wrapping the last ping error when the
    /// store never answered, or the context error if `ctx` ended first.
    pub async fn connect(
        manager: M,
        config: PoolConfig,
        metrics: Arc<MetricsCollector>,
        ctx: &QueryContext,
    ) -> Result<Self, StoreError> {
        let mut config = config;
        config.max_size = config.max_size.clamp(1, Semaphore::MAX_PERMITS);
        let policy = BackoffPolicy::with_max_elapsed(config.backoff_timeout);
        let pool = Self {
            inner: Arc::new(PoolInner {
                manager,
                semaphore: Arc::new(Semaphore::new(config.max_size)),
                config,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    active: 0,
                }),
                metrics: Arc::clone(&metrics),
                closed: AtomicBool::new(false),
                released: Notify::new(),
                reaper: CancellationToken::new(),
                reaper_handle: Mutex::new(None),
            }),
        };

        let startup = policy
            .retry(ctx, "PoolStartup", metrics.as_ref(), || async {
                pool.ping(ctx).await.map_err(RetryError::classify)
            })
            .await;

        if let Err(err) = startup {
            // Nothing is checked out yet, so this only drops idle connections.
            let _ = pool.close(&QueryContext::background()).await;
            return Err(match err {
                StoreError::Canceled | StoreError::DeadlineExceeded => err,
                other => StoreError::Startup {
                    source: Box::new(other),
                },
            });
        }

        pool.inner.maintain_min().await;
        let handle = tokio::spawn(run_reaper(
            Arc::downgrade(&pool.inner),
            pool.inner.reaper.clone(),
            pool.inner.config.reap_interval(),
        ));
        *pool
            .inner
            .reaper_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        tracing::info!(
            max_size = pool.inner.config.max_size,
            min_size = pool.inner.config.min_size,
            "connection pool ready"
        );
        Ok(pool)
    }

    /// The connection manager this pool was built with.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// The pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Current occupancy.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    /// Whether [`ConnectionPool::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Checks out a connection, waiting for a free slot if the pool is at
    /// capacity.
    ///
    /// # Errors
    ///
    /// - [`StoreError::PoolClosed`] once the pool is closed;
    /// - [`StoreError::PoolTimeout`] when no slot frees up within
    ///   [`PoolConfig::acquire_timeout`];
    /// - the context error as soon as `ctx` ends, even while waiting;
    /// - the connect error when a new connection cannot be opened.
    pub async fn acquire(&self, ctx: &QueryContext) -> Result<PooledConnection<M>, StoreError> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(StoreError::PoolClosed);
        }
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let wait = inner.config.acquire_timeout;
        let permit = tokio::select! {
            biased;
            err = ctx.done() => return Err(err),
            res = tokio::time::timeout(wait, Arc::clone(&inner.semaphore).acquire_owned()) => match res {
                Err(_) => return Err(StoreError::PoolTimeout(wait)),
                Ok(Err(_)) => return Err(StoreError::PoolClosed),
                Ok(Ok(permit)) => permit,
            },
        };

        loop {
            let candidate = inner.lock_state().idle.pop_back();
            let Some(mut idle) = candidate else {
                break;
            };
            if idle.is_expired(&inner.config, Instant::now()) {
                inner.close_connection(idle.conn, idle.id).await;
                continue;
            }
            if inner.config.test_before_acquire {
                let checked = ctx
                    .run(async { Ok(inner.manager.is_valid(&mut idle.conn).await) })
                    .await;
                match checked {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(connection_id = %idle.id, "discarding stale idle connection");
                        inner.close_connection(idle.conn, idle.id).await;
                        continue;
                    }
                    Err(err) => {
                        inner.close_connection(idle.conn, idle.id).await;
                        inner.publish_stats();
                        return Err(err);
                    }
                }
            }
            return Ok(self.check_out(idle.conn, idle.id, idle.created_at, permit));
        }

        let conn = match ctx.run(inner.open_connection()).await {
            Ok(conn) => conn,
            Err(err) => {
                inner.publish_stats();
                return Err(err);
            }
        };
        let id = ConnectionId::new();
        tracing::debug!(connection_id = %id, "opened connection");
        Ok(self.check_out(conn, id, Instant::now(), permit))
    }

    fn check_out(
        &self,
        conn: M::Connection,
        id: ConnectionId,
        created_at: Instant,
        permit: OwnedSemaphorePermit,
    ) -> PooledConnection<M> {
        self.inner.lock_state().active += 1;
        self.inner.publish_stats();
        PooledConnection {
            pool: Arc::clone(&self.inner),
            conn: Some(conn),
            id,
            created_at,
            discard: false,
            _permit: permit,
        }
    }

    /// Checks out a connection and round-trips to the store.
    ///
    /// # Errors
    ///
    /// Any error from [`ConnectionPool::acquire`] or the manager's ping.
    pub async fn ping(&self, ctx: &QueryContext) -> Result<(), StoreError> {
        let mut conn = self.acquire(ctx).await?;
        conn.ping(ctx).await
    }

    /// Runs one reaper pass immediately.
    pub async fn reap(&self) {
        self.inner.reap_idle().await;
        self.inner.maintain_min().await;
    }

    /// Closes the pool.
    ///
    /// New acquires fail with [`StoreError::PoolClosed`], idle connections
    /// are closed, and the call waits for checked-out connections to come
    /// back, which are then closed too. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the context error if `ctx` ends while connections are still
    /// checked out; those connections are closed when their guards drop.
    pub async fn close(&self, ctx: &QueryContext) -> Result<(), StoreError> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        inner.semaphore.close();
        inner.reaper.cancel();

        let idle: Vec<IdleConnection<M::Connection>> = inner.lock_state().idle.drain(..).collect();
        join_all(
            idle.into_iter()
                .map(|conn| inner.close_connection(conn.conn, conn.id)),
        )
        .await;
        inner.publish_stats();

        loop {
            let released = inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            let active = inner.lock_state().active;
            if active == 0 {
                break;
            }
            tracing::debug!(active, "waiting for checked-out connections");
            tokio::select! {
                biased;
                err = ctx.done() => {
                    tracing::warn!(active, error = %err, "pool closed with connections still checked out");
                    return Err(err);
                }
                () = &mut released => {}
            }
        }

        let handle = inner
            .reaper_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let stragglers: Vec<IdleConnection<M::Connection>> =
            inner.lock_state().idle.drain(..).collect();
        join_all(
            stragglers
                .into_iter()
                .map(|conn| inner.close_connection(conn.conn, conn.id)),
        )
        .await;
        inner.publish_stats();

        tracing::info!("connection pool closed");
        Ok(())
    }
}

/// A checked-out connection. Dropping it hands the connection back to the
/// pool.
pub struct PooledConnection<M: ConnectionManager> {
    pool: Arc<PoolInner<M>>,
    conn: Option<M::Connection>,
    id: ConnectionId,
    created_at: Instant,
    discard: bool,
    _permit: OwnedSemaphorePermit,
}

impl<M: ConnectionManager> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("discard", &self.discard)
            .finish_non_exhaustive()
    }
}

impl<M: ConnectionManager> PooledConnection<M> {
    /// The physical connection id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Mutable access to the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PoolClosed`] if the connection has already been
    /// handed back, which cannot happen while the guard is alive.
    pub fn connection(&mut self) -> Result<&mut M::Connection, StoreError> {
        self.conn.as_mut().ok_or(StoreError::PoolClosed)
    }

    /// Closes the connection instead of returning it to the pool.
    pub fn discard(&mut self) {
        self.discard = true;
    }

    /// Discards the connection if `err` leaves it in an unknown state.
    pub fn observe(&mut self, err: &StoreError) {
        if err.is_connection_fault() {
            tracing::debug!(connection_id = %self.id, error = %err, "discarding faulted connection");
            self.discard = true;
        }
    }

    /// Round-trips to the store over this connection.
    ///
    /// # Errors
    ///
    /// Returns the ping error or the context error.
    pub async fn ping(&mut self, ctx: &QueryContext) -> Result<(), StoreError> {
        let manager = &self.pool.manager;
        let conn = self.conn.as_mut().ok_or(StoreError::PoolClosed)?;
        let result = ctx.run(manager.ping(conn)).await;
        if let Err(err) = &result {
            self.observe(err);
        }
        result
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            PoolInner::release(&self.pool, conn, self.id, self.created_at, self.discard);
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Scriptable in-process connection manager.
    #[derive(Debug, Default)]
    pub(crate) struct MockManager {
        pub(crate) connects: AtomicUsize,
        pub(crate) closes: AtomicUsize,
        pub(crate) pings: AtomicUsize,
        pub(crate) fail_connect: AtomicBool,
        pub(crate) fail_ping: AtomicBool,
        pub(crate) invalid: AtomicBool,
        pub(crate) slow_connect: AtomicBool,
    }

    #[derive(Debug)]
    pub(crate) struct MockConn {
        pub(crate) serial: usize,
    }

    #[async_trait]
    impl ConnectionManager for MockManager {
        type Connection = MockConn;

        async fn connect(&self) -> Result<MockConn, StoreError> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(StoreError::Connection("connection refused".to_string()));
            }
            if self.slow_connect.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            let serial = self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(MockConn { serial })
        }

        async fn ping(&self, _conn: &mut MockConn) -> Result<(), StoreError> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            if self.fail_ping.load(Ordering::SeqCst) {
                return Err(StoreError::Connection("broken pipe".to_string()));
            }
            Ok(())
        }

        async fn is_valid(&self, _conn: &mut MockConn) -> bool {
            !self.invalid.load(Ordering::SeqCst)
        }

        async fn close(&self, _conn: MockConn) -> Result<(), StoreError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub(crate) fn config(max_size: usize) -> PoolConfig {
        PoolConfig {
            max_size,
            acquire_timeout: Duration::from_secs(1),
            backoff_timeout: Duration::from_secs(2),
            ..PoolConfig::default()
        }
    }

    async fn pool(config: PoolConfig) -> (ConnectionPool<MockManager>, Arc<MetricsCollector>) {
        let metrics = Arc::new(MetricsCollector::new());
        let Ok(pool) = ConnectionPool::connect(
            MockManager::default(),
            config,
            Arc::clone(&metrics),
            &QueryContext::background(),
        )
        .await
        else {
            panic!("pool should start");
        };
        (pool, metrics)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn startup_ping_leaves_one_idle_connection() {
        let (pool, metrics) = pool(config(4)).await;
        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 1);
        assert_eq!(pool.manager().connects.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().connections_created, 1);
        assert_eq!(metrics.snapshot().idle_connections, 1);
    }

    #[tokio::test]
    async fn idle_connections_are_reused() {
        let (pool, _) = pool(config(4)).await;
        for _ in 0..3 {
            let Ok(mut conn) = pool.acquire(&QueryContext::background()).await else {
                panic!("acquire failed");
            };
            assert!(matches!(conn.connection(), Ok(c) if c.serial == 0));
        }
        assert_eq!(pool.manager().connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_holders_get_distinct_connections() {
        let (pool, metrics) = pool(config(4)).await;
        let ctx = QueryContext::background();
        let (Ok(a), Ok(b)) = (pool.acquire(&ctx).await, pool.acquire(&ctx).await) else {
            panic!("acquire failed");
        };
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.stats().active, 2);
        assert_eq!(metrics.snapshot().active_connections, 2);
        drop(a);
        drop(b);
        assert_eq!(pool.stats().active, 0);
        assert_eq!(pool.stats().idle, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn full_pool_times_out() {
        let (pool, _) = pool(config(1)).await;
        let Ok(_held) = pool.acquire(&QueryContext::background()).await else {
            panic!("acquire failed");
        };
        let result = pool.acquire(&QueryContext::background()).await;
        assert!(matches!(result, Err(StoreError::PoolTimeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_unblocks_waiter() {
        let mut cfg = config(1);
        cfg.acquire_timeout = Duration::from_secs(600);
        let (pool, _) = pool(cfg).await;
        let Ok(_held) = pool.acquire(&QueryContext::background()).await else {
            panic!("acquire failed");
        };

        let ctx = QueryContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let started = Instant::now();
        let result = pool.acquire(&ctx).await;
        assert!(matches!(result, Err(StoreError::Canceled)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn released_slot_wakes_waiter() {
        let (pool, _) = pool(config(1)).await;
        let Ok(held) = pool.acquire(&QueryContext::background()).await else {
            panic!("acquire failed");
        };
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&QueryContext::background()).await.map(|c| c.id()) })
        };
        let held_id = held.id();
        settle().await;
        drop(held);
        let Ok(Ok(id)) = waiter.await else {
            panic!("waiter should get the released connection");
        };
        assert_eq!(id, held_id);
    }

    #[tokio::test]
    async fn discarded_connection_is_closed() {
        let (pool, metrics) = pool(config(2)).await;
        let Ok(mut conn) = pool.acquire(&QueryContext::background()).await else {
            panic!("acquire failed");
        };
        conn.observe(&StoreError::Connection("reset".to_string()));
        drop(conn);
        settle().await;

        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.manager().closes.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().connections_closed, 1);

        let Ok(mut fresh) = pool.acquire(&QueryContext::background()).await else {
            panic!("acquire failed");
        };
        assert!(matches!(fresh.connection(), Ok(c) if c.serial == 1));
    }

    #[tokio::test]
    async fn not_found_does_not_discard() {
        let (pool, _) = pool(config(2)).await;
        let Ok(mut conn) = pool.acquire(&QueryContext::background()).await else {
            panic!("acquire failed");
        };
        conn.observe(&StoreError::NotFound);
        drop(conn);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn invalid_idle_connection_is_replaced() {
        let (pool, _) = pool(config(2)).await;
        pool.manager().invalid.store(true, Ordering::SeqCst);
        let Ok(mut conn) = pool.acquire(&QueryContext::background()).await else {
            panic!("acquire failed");
        };
        assert!(matches!(conn.connection(), Ok(c) if c.serial == 1));
        assert_eq!(pool.manager().closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lifetime_retires_on_release() {
        let mut cfg = config(2);
        cfg.max_lifetime = Duration::from_secs(10);
        cfg.max_idle_time = Duration::from_secs(3600);
        let (pool, _) = pool(cfg).await;
        let Ok(conn) = pool.acquire(&QueryContext::background()).await else {
            panic!("acquire failed");
        };
        tokio::time::sleep(Duration::from_secs(11)).await;
        drop(conn);
        settle().await;
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.manager().closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_closes_idle_connections() {
        let mut cfg = config(2);
        cfg.max_idle_time = Duration::from_secs(5);
        let (pool, _) = pool(cfg).await;
        assert_eq!(pool.stats().idle, 1);
        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.manager().closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reap_tops_up_to_min_size() {
        let mut cfg = config(4);
        cfg.min_size = 3;
        let (pool, _) = pool(cfg).await;
        assert_eq!(pool.stats().idle, 3);

        let Ok(mut conn) = pool.acquire(&QueryContext::background()).await else {
            panic!("acquire failed");
        };
        conn.discard();
        drop(conn);
        settle().await;
        assert_eq!(pool.stats().idle, 2);

        pool.reap().await;
        assert_eq!(pool.stats().idle, 3);
        assert_eq!(pool.manager().connects.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn startup_fails_when_store_unreachable() {
        let manager = MockManager::default();
        manager.fail_connect.store(true, Ordering::SeqCst);
        let started = Instant::now();
        let result = ConnectionPool::connect(
            manager,
            config(2),
            Arc::new(MetricsCollector::new()),
            &QueryContext::background(),
        )
        .await;
        let Err(StoreError::Startup { source }) = result else {
            panic!("expected a startup error");
        };
        assert!(matches!(*source, StoreError::Connection(_)));
        assert!(started.elapsed() <= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (pool, _) = pool(config(2)).await;
        assert!(pool.close(&QueryContext::background()).await.is_ok());
        assert!(pool.close(&QueryContext::background()).await.is_ok());
        assert!(pool.is_closed());
        assert_eq!(pool.manager().closes.load(Ordering::SeqCst), 1);
        let result = pool.acquire(&QueryContext::background()).await;
        assert!(matches!(result, Err(StoreError::PoolClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_warm_up_leaves_no_idle_connection() {
        let mut cfg = config(2);
        cfg.min_size = 1;
        cfg.max_idle_time = Duration::from_secs(1);
        let (pool, metrics) = pool(cfg).await;
        let Ok(mut conn) = pool.acquire(&QueryContext::background()).await else {
            panic!("acquire failed");
        };
        conn.discard();
        drop(conn);
        settle().await;
        assert_eq!(pool.stats().idle, 0);

        // The reaper starts a 500ms top-up at t=1s; close lands mid-connect.
        pool.manager().slow_connect.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert!(pool.close(&QueryContext::background()).await.is_ok());

        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().total, 0);
        assert_eq!(pool.manager().connects.load(Ordering::SeqCst), 2);
        assert_eq!(pool.manager().closes.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.snapshot().idle_connections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn release_after_close_retires_the_connection() {
        let (pool, _) = pool(config(2)).await;
        let Ok(conn) = pool.acquire(&QueryContext::background()).await else {
            panic!("acquire failed");
        };
        let result = pool
            .close(&QueryContext::with_timeout(Duration::from_millis(50)))
            .await;
        assert!(matches!(result, Err(StoreError::DeadlineExceeded)));
        drop(conn);
        settle().await;
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.manager().closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_waits_for_checked_out_connections() {
        let (pool, _) = pool(config(2)).await;
        let Ok(conn) = pool.acquire(&QueryContext::background()).await else {
            panic!("acquire failed");
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(conn);
        });
        let started = Instant::now();
        assert!(pool.close(&QueryContext::background()).await.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_gives_up_when_context_ends() {
        let (pool, _) = pool(config(2)).await;
        let Ok(_conn) = pool.acquire(&QueryContext::background()).await else {
            panic!("acquire failed");
        };
        let result = pool
            .close(&QueryContext::with_timeout(Duration::from_millis(50)))
            .await;
        assert!(matches!(result, Err(StoreError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn oversized_pool_is_clamped() {
        let (pool, _) = pool(config(usize::MAX)).await;
        assert_eq!(pool.config().max_size, Semaphore::MAX_PERMITS);
        assert_eq!(pool.stats().max_size, Semaphore::MAX_PERMITS);
    }

    #[test]
    fn reap_interval_is_bounded() {
        let mut cfg = PoolConfig::default();
        assert_eq!(cfg.reap_interval(), Duration::from_secs(30));
        cfg.max_idle_time = Duration::from_secs(2);
        assert_eq!(cfg.reap_interval(), Duration::from_secs(2));
        cfg.max_idle_time = Duration::ZERO;
        assert_eq!(cfg.reap_interval(), Duration::from_millis(100));
    }

    #[test]
    fn utilization_percent() {
        let stats = PoolStats {
            active: 5,
            idle: 0,
            total: 5,
            max_size: 10,
        };
        assert!((stats.utilization() - 50.0).abs() < f64::EPSILON);
    }
}

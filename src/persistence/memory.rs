//! In-process comic backend.
//!
//! Rows live in a shared `BTreeMap` behind a mutex, so clones of a
//! [`MemoryBackend`] see the same table. Used by tests and by
//! `DATABASE_URL=memory://` for local runs without PostgreSQL.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ComicBackend, ComicQuery};
use crate::db::ConnectionManager;
use crate::domain::{Comic, ComicId};
use crate::error::StoreError;

#[derive(Debug)]
struct MemoryTable {
    rows: BTreeMap<ComicId, Comic>,
    next_id: u32,
}

#[derive(Debug)]
struct Shared {
    table: Mutex<MemoryTable>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: AtomicUsize,
    connections: AtomicUsize,
}

/// Handle returned by [`MemoryBackend::connect`]. Carries no state beyond
/// its serial number.
#[derive(Debug)]
pub struct MemoryConnection {
    serial: usize,
}

impl MemoryConnection {
    /// Order in which this connection was opened, starting at 0.
    #[must_use]
    pub const fn serial(&self) -> usize {
        self.serial
    }
}

/// Shared in-memory table with fault injection.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates an empty table whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::with_next_id(1)
    }

    /// Creates an empty table whose first assigned id is `next_id`.
    #[must_use]
    pub fn with_next_id(next_id: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(MemoryTable {
                    rows: BTreeMap::new(),
                    next_id: next_id.max(1),
                }),
                calls: Mutex::new(HashMap::new()),
                failures: AtomicUsize::new(0),
                connections: AtomicUsize::new(0),
            }),
        }
    }

    /// Makes the next `n` backend calls fail with a connection error.
    /// Opening a connection always succeeds.
    pub fn fail_next(&self, n: usize) {
        self.shared.failures.store(n, Ordering::SeqCst);
    }

    /// How many times the backend call `name` has run, failed calls
    /// included. Names are the [`ComicBackend`] method names plus `ping`
    /// and `connect`.
    #[must_use]
    pub fn calls(&self, name: &str) -> usize {
        self.shared
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Number of rows, deleted ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table().rows.len()
    }

    /// Whether the table holds no rows at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw row lookup that ignores the soft-delete flag.
    #[must_use]
    pub fn row(&self, id: ComicId) -> Option<Comic> {
        self.table().rows.get(&id).cloned()
    }

    fn table(&self) -> MutexGuard<'_, MemoryTable> {
        self.shared
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, name: &'static str) {
        *self
            .shared
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_insert(0) += 1;
    }

    /// Counts the call and consumes one injected failure if any are left.
    fn enter(&self, name: &'static str) -> Result<(), StoreError> {
        self.record(name);
        let injected = self
            .shared
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Connection(format!("injected fault in {name}")));
        }
        Ok(())
    }

    fn selected<'a>(table: &'a MemoryTable, query: &'a ComicQuery) -> impl Iterator<Item = &'a Comic> {
        let needle = match query {
            ComicQuery::Search(term) => term.trim().to_lowercase(),
            ComicQuery::All(_) => String::new(),
        };
        table.rows.values().filter(move |c| {
            !c.deleted
                && match query {
                    ComicQuery::All(filter) => {
                        (!filter.tracked_only || c.track)
                            && (!filter.unchecked_only || c.has_unread())
                    }
                    ComicQuery::Search(_) => c.matches_term(&needle),
                }
        })
    }
}

#[async_trait]
impl ConnectionManager for MemoryBackend {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, StoreError> {
        self.record("connect");
        let serial = self.shared.connections.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection { serial })
    }

    async fn ping(&self, _conn: &mut MemoryConnection) -> Result<(), StoreError> {
        self.enter("ping")
    }

    async fn is_valid(&self, _conn: &mut MemoryConnection) -> bool {
        true
    }
}

#[async_trait]
impl ComicBackend for MemoryBackend {
    async fn insert(
        &self,
        _conn: &mut MemoryConnection,
        comic: &Comic,
        now: DateTime<Utc>,
    ) -> Result<ComicId, StoreError> {
        self.enter("insert")?;
        let mut table = self.table();
        let id = ComicId::new(table.next_id);
        table.next_id = table
            .next_id
            .checked_add(1)
            .ok_or_else(|| StoreError::InvalidArgument("comic id space exhausted".to_string()))?;

        let mut row = comic.clone();
        row.id = id;
        row.last_update = now;
        row.deleted = false;
        table.rows.insert(id, row);
        Ok(id)
    }

    async fn update(
        &self,
        _conn: &mut MemoryConnection,
        comic: &Comic,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.enter("update")?;
        let mut table = self.table();
        match table.rows.get_mut(&comic.id) {
            Some(row) if !row.deleted => {
                *row = comic.clone();
                row.last_update = now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn soft_delete(
        &self,
        _conn: &mut MemoryConnection,
        id: ComicId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.enter("soft_delete")?;
        let mut table = self.table();
        match table.rows.get_mut(&id) {
            Some(row) if !row.deleted => {
                row.deleted = true;
                row.last_update = now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn find_by_id(
        &self,
        _conn: &mut MemoryConnection,
        id: ComicId,
    ) -> Result<Option<Comic>, StoreError> {
        self.enter("find_by_id")?;
        Ok(self.table().rows.get(&id).filter(|c| !c.deleted).cloned())
    }

    async fn find_by_title(
        &self,
        _conn: &mut MemoryConnection,
        title: &str,
    ) -> Result<Option<Comic>, StoreError> {
        self.enter("find_by_title")?;
        let needle = title.to_lowercase();
        Ok(self
            .table()
            .rows
            .values()
            .find(|c| !c.deleted && c.titles.iter().any(|t| t.to_lowercase().contains(&needle)))
            .cloned())
    }

    async fn count(
        &self,
        _conn: &mut MemoryConnection,
        query: &ComicQuery,
    ) -> Result<u64, StoreError> {
        self.enter("count")?;
        let table = self.table();
        Ok(Self::selected(&table, query).count() as u64)
    }

    async fn fetch_page(
        &self,
        _conn: &mut MemoryConnection,
        query: &ComicQuery,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Comic>, StoreError> {
        self.enter("fetch_page")?;
        let table = self.table();
        let mut rows: Vec<&Comic> = Self::selected(&table, query).collect();
        rows.sort_by(|a, b| {
            b.last_update
                .cmp(&a.last_update)
                .then_with(|| b.id.cmp(&a.id))
        });

        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(skip).take(take).cloned().collect())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::domain::ListFilter;

    fn conn() -> MemoryConnection {
        MemoryConnection { serial: 0 }
    }

    #[tokio::test]
    async fn ids_start_at_configured_value() {
        let backend = MemoryBackend::with_next_id(7);
        let now = Utc::now();
        let Ok(first) = backend.insert(&mut conn(), &Comic::new("A", "x"), now).await else {
            panic!("insert should succeed");
        };
        let Ok(second) = backend.insert(&mut conn(), &Comic::new("B", "y"), now).await else {
            panic!("insert should succeed");
        };
        assert_eq!(first, ComicId::new(7));
        assert_eq!(second, ComicId::new(8));
        assert_eq!(backend.row(first).map(|c| c.last_update), Some(now));
    }

    #[tokio::test]
    async fn deleted_rows_are_invisible() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let Ok(id) = backend.insert(&mut conn(), &Comic::new("A", "x"), now).await else {
            panic!("insert should succeed");
        };
        assert!(matches!(backend.soft_delete(&mut conn(), id, now).await, Ok(1)));
        assert!(matches!(backend.soft_delete(&mut conn(), id, now).await, Ok(0)));
        assert!(matches!(backend.find_by_id(&mut conn(), id).await, Ok(None)));

        let mut edit = Comic::new("A2", "x");
        edit.id = id;
        assert!(matches!(backend.update(&mut conn(), &edit, now).await, Ok(0)));
        assert!(backend.row(id).is_some_and(|c| c.deleted));
    }

    #[tokio::test]
    async fn pages_are_newest_first() {
        let backend = MemoryBackend::new();
        let base = Utc::now();
        for i in 0..5i64 {
            let comic = Comic::new(format!("C{i}"), "x");
            let at = base + TimeDelta::seconds(i);
            assert!(backend.insert(&mut conn(), &comic, at).await.is_ok());
        }
        let query = ComicQuery::All(ListFilter::default());
        let Ok(page) = backend.fetch_page(&mut conn(), &query, 2, 1).await else {
            panic!("fetch should succeed");
        };
        let titles: Vec<_> = page.iter().filter_map(Comic::title).collect();
        assert_eq!(titles, vec!["C3", "C2"]);
        assert!(matches!(backend.count(&mut conn(), &query).await, Ok(5)));
    }

    #[tokio::test]
    async fn filters_and_search_select_rows() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let mut tracked = Comic::new("Tower of God", "SIU");
        tracked.track = true;
        tracked.current_chap = 10;
        tracked.viewed_chap = 10;
        let mut unread = Comic::new("Lookism", "Park Tae-jun");
        unread.track = true;
        unread.current_chap = 5;
        let mut other = Comic::new("Vagabond", "Inoue");
        other.description = "A tale of the swordsman".to_string();
        for comic in [&tracked, &unread, &other] {
            assert!(backend.insert(&mut conn(), comic, now).await.is_ok());
        }

        let tracked_only = ComicQuery::All(ListFilter {
            tracked_only: true,
            unchecked_only: false,
        });
        let unchecked = ComicQuery::All(ListFilter {
            tracked_only: false,
            unchecked_only: true,
        });
        assert!(matches!(backend.count(&mut conn(), &tracked_only).await, Ok(2)));
        assert!(matches!(backend.count(&mut conn(), &unchecked).await, Ok(1)));

        let search = ComicQuery::Search(" SWORD ".to_string());
        let Ok(found) = backend.fetch_page(&mut conn(), &search, 10, 0).await else {
            panic!("search should succeed");
        };
        assert_eq!(found.first().and_then(Comic::title), Some("Vagabond"));

        let Ok(by_title) = backend.find_by_title(&mut conn(), "tower").await else {
            panic!("lookup should succeed");
        };
        assert_eq!(by_title.and_then(|c| c.title().map(str::to_string)).as_deref(), Some("Tower of God"));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let backend = MemoryBackend::new();
        backend.fail_next(2);
        assert!(matches!(
            backend.find_by_id(&mut conn(), ComicId::new(1)).await,
            Err(StoreError::Connection(_))
        ));
        assert!(backend.ping(&mut conn()).await.is_err());
        assert!(backend.ping(&mut conn()).await.is_ok());
        assert_eq!(backend.calls("ping"), 2);
        assert_eq!(backend.calls("find_by_id"), 1);
    }
}

//! PostgreSQL implementation of the comic backend.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;

use super::models::{COMIC_COLUMNS, ComicParams, ComicRow, comic_from_row};
use super::{ComicBackend, ComicQuery};
use crate::db::ConnectionManager;
use crate::domain::{Comic, ComicId};
use crate::error::StoreError;

const SEARCH_CLAUSE: &str = "WHERE NOT deleted AND (\
     EXISTS (SELECT 1 FROM unnest(titles) AS t(title) WHERE t.title ILIKE $1) \
     OR author ILIKE $1 OR description ILIKE $1)";

/// PostgreSQL-backed comic storage over single `sqlx` connections.
///
/// Pooling lives in [`crate::db::ConnectionPool`]; this type only knows how
/// to open a connection and run one statement on it.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    options: PgConnectOptions,
    migrations: PathBuf,
}

impl PostgresBackend {
    /// Creates a backend for the given connection URL.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] if the URL does not parse.
    pub fn from_url(url: &str, migrations: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| StoreError::InvalidArgument(format!("invalid database URL: {e}")))?;
        Ok(Self {
            options,
            migrations: migrations.into(),
        })
    }

    /// Directory migrations are read from.
    #[must_use]
    pub fn migrations_dir(&self) -> &Path {
        &self.migrations
    }

    /// Applies pending migrations over a dedicated connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Migration`] if the migration set cannot be read
    /// or a migration fails, or the driver error if the connection cannot
    /// be opened.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        let migrator = Migrator::new(self.migrations.as_path())
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        let mut conn = self.connect().await?;
        let result = migrator
            .run(&mut conn)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()));
        let _ = conn.close().await;
        result?;

        tracing::info!(
            dir = %self.migrations.display(),
            applied = migrator.iter().count(),
            "migrations up to date"
        );
        Ok(())
    }
}

/// Escapes `%`, `_` and `\` so `term` matches literally inside `ILIKE`.
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// `WHERE` clause and optional `$1` pattern for a list or search query.
fn filter_clause(query: &ComicQuery) -> (&'static str, Option<String>) {
    match query {
        ComicQuery::All(filter) if filter.unchecked_only => (
            "WHERE NOT deleted AND track AND viewed_chap < current_chap",
            None,
        ),
        ComicQuery::All(filter) if filter.tracked_only => ("WHERE NOT deleted AND track", None),
        ComicQuery::All(_) => ("WHERE NOT deleted", None),
        ComicQuery::Search(term) => (SEARCH_CLAUSE, Some(like_pattern(term.trim()))),
    }
}

#[async_trait]
impl ConnectionManager for PostgresBackend {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection, StoreError> {
        Ok(PgConnection::connect_with(&self.options).await?)
    }

    async fn ping(&self, conn: &mut PgConnection) -> Result<(), StoreError> {
        Ok(conn.ping().await?)
    }

    async fn close(&self, conn: PgConnection) -> Result<(), StoreError> {
        Ok(conn.close().await?)
    }
}

#[async_trait]
impl ComicBackend for PostgresBackend {
    async fn insert(
        &self,
        conn: &mut PgConnection,
        comic: &Comic,
        now: DateTime<Utc>,
    ) -> Result<ComicId, StoreError> {
        let p = ComicParams::from_comic(comic)?;
        let id = sqlx::query_scalar::<_, i32>(
            "INSERT INTO comics (titles, author, description, type, status, rating, cover, \
             current_chap, viewed_chap, publishers, genres, last_update, track, deleted) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, FALSE) RETURNING id",
        )
        .bind(p.titles)
        .bind(p.author)
        .bind(p.description)
        .bind(p.com_type)
        .bind(p.status)
        .bind(p.rating)
        .bind(p.cover)
        .bind(p.current_chap)
        .bind(p.viewed_chap)
        .bind(p.publishers)
        .bind(p.genres)
        .bind(now)
        .bind(p.track)
        .fetch_one(&mut *conn)
        .await?;

        ComicId::from_db(id)
    }

    async fn update(
        &self,
        conn: &mut PgConnection,
        comic: &Comic,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let p = ComicParams::from_comic(comic)?;
        let result = sqlx::query(
            "UPDATE comics SET titles = $1, author = $2, description = $3, type = $4, \
             status = $5, rating = $6, cover = $7, current_chap = $8, viewed_chap = $9, \
             publishers = $10, genres = $11, last_update = $12, track = $13, deleted = $14 \
             WHERE id = $15 AND NOT deleted",
        )
        .bind(p.titles)
        .bind(p.author)
        .bind(p.description)
        .bind(p.com_type)
        .bind(p.status)
        .bind(p.rating)
        .bind(p.cover)
        .bind(p.current_chap)
        .bind(p.viewed_chap)
        .bind(p.publishers)
        .bind(p.genres)
        .bind(now)
        .bind(p.track)
        .bind(p.deleted)
        .bind(comic.id.to_db()?)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    async fn soft_delete(
        &self,
        conn: &mut PgConnection,
        id: ComicId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE comics SET deleted = TRUE, last_update = $2 WHERE id = $1 AND NOT deleted",
        )
        .bind(id.to_db()?)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_by_id(
        &self,
        conn: &mut PgConnection,
        id: ComicId,
    ) -> Result<Option<Comic>, StoreError> {
        let sql = format!("SELECT {COMIC_COLUMNS} FROM comics WHERE id = $1 AND NOT deleted");
        let row = sqlx::query_as::<_, ComicRow>(&sql)
            .bind(id.to_db()?)
            .fetch_optional(&mut *conn)
            .await?;

        row.map(comic_from_row).transpose()
    }

    async fn find_by_title(
        &self,
        conn: &mut PgConnection,
        title: &str,
    ) -> Result<Option<Comic>, StoreError> {
        let sql = format!(
            "SELECT {COMIC_COLUMNS} FROM comics WHERE NOT deleted AND \
             EXISTS (SELECT 1 FROM unnest(titles) AS t(title) WHERE t.title ILIKE $1) \
             ORDER BY id ASC LIMIT 1"
        );
        let row = sqlx::query_as::<_, ComicRow>(&sql)
            .bind(like_pattern(title))
            .fetch_optional(&mut *conn)
            .await?;

        row.map(comic_from_row).transpose()
    }

    async fn count(&self, conn: &mut PgConnection, query: &ComicQuery) -> Result<u64, StoreError> {
        let (clause, pattern) = filter_clause(query);
        let sql = format!("SELECT COUNT(*) FROM comics {clause}");
        let mut q = sqlx::query_scalar::<_, i64>(&sql);
        if let Some(pattern) = pattern {
            q = q.bind(pattern);
        }
        let total = q.fetch_one(&mut *conn).await?;

        Ok(u64::try_from(total).unwrap_or_default())
    }

    async fn fetch_page(
        &self,
        conn: &mut PgConnection,
        query: &ComicQuery,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Comic>, StoreError> {
        let (clause, pattern) = filter_clause(query);
        let offset = i64::try_from(offset)
            .map_err(|_| StoreError::InvalidArgument(format!("offset {offset} out of range")))?;
        let next = if pattern.is_some() { 2 } else { 1 };
        let sql = format!(
            "SELECT {COMIC_COLUMNS} FROM comics {clause} \
             ORDER BY last_update DESC, id DESC LIMIT ${next} OFFSET ${}",
            next + 1
        );

        let mut q = sqlx::query_as::<_, ComicRow>(&sql);
        if let Some(pattern) = pattern {
            q = q.bind(pattern);
        }
        let rows = q
            .bind(i64::from(limit))
            .bind(offset)
            .fetch_all(&mut *conn)
            .await?;

        rows.into_iter().map(comic_from_row).collect()
    }
}

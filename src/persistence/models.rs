//! Row mapping between the `comics` table and [`Comic`].

use chrono::{DateTime, Utc};

use crate::domain::catalog::codes;
use crate::domain::{Comic, ComicId, ComicStatus, ComicType, Genre, Publisher, Rating};
use crate::error::StoreError;

/// Column list shared by every `SELECT` on `comics`, in [`ComicRow`] order.
pub const COMIC_COLUMNS: &str = "id, titles, author, description, type, status, rating, cover, \
     current_chap, viewed_chap, publishers, genres, last_update, track, deleted";

/// A `comics` row as returned by [`COMIC_COLUMNS`].
pub type ComicRow = (
    i32,
    Vec<String>,
    String,
    String,
    i32,
    i32,
    i32,
    String,
    i32,
    i32,
    Vec<i32>,
    Vec<i32>,
    DateTime<Utc>,
    bool,
    bool,
);

/// Column values bound by `INSERT` and `UPDATE`, already converted to the
/// database representation.
#[derive(Debug, Clone)]
pub struct ComicParams {
    /// `titles`.
    pub titles: Vec<String>,
    /// `author`.
    pub author: String,
    /// `description`.
    pub description: String,
    /// `type`.
    pub com_type: i32,
    /// `status`.
    pub status: i32,
    /// `rating`.
    pub rating: i32,
    /// `cover`.
    pub cover: String,
    /// `current_chap`.
    pub current_chap: i32,
    /// `viewed_chap`.
    pub viewed_chap: i32,
    /// `publishers`.
    pub publishers: Vec<i32>,
    /// `genres`.
    pub genres: Vec<i32>,
    /// `track`.
    pub track: bool,
    /// `deleted`.
    pub deleted: bool,
}

impl ComicParams {
    /// Converts a comic into bindable column values.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when a chapter counter does
    /// not fit the `INTEGER` column.
    pub fn from_comic(comic: &Comic) -> Result<Self, StoreError> {
        Ok(Self {
            titles: comic.titles.clone(),
            author: comic.author.clone(),
            description: comic.description.clone(),
            com_type: comic.com_type.code(),
            status: comic.status.code(),
            rating: comic.rating.code(),
            cover: comic.cover.clone(),
            current_chap: chapter_to_db(comic.current_chap)?,
            viewed_chap: chapter_to_db(comic.viewed_chap)?,
            publishers: codes(&comic.publishers, Publisher::code),
            genres: codes(&comic.genres, Genre::code),
            track: comic.track,
            deleted: comic.deleted,
        })
    }
}

fn chapter_to_db(chap: u32) -> Result<i32, StoreError> {
    i32::try_from(chap)
        .map_err(|_| StoreError::InvalidArgument(format!("chapter {chap} out of range")))
}

/// Builds a [`Comic`] from a row.
///
/// # Errors
///
/// Returns [`StoreError::Connection`] if the row carries a negative id.
pub fn comic_from_row(row: ComicRow) -> Result<Comic, StoreError> {
    let (
        id,
        titles,
        author,
        description,
        com_type,
        status,
        rating,
        cover,
        current_chap,
        viewed_chap,
        publishers,
        genres,
        last_update,
        track,
        deleted,
    ) = row;

    Ok(Comic {
        id: ComicId::from_db(id)?,
        titles,
        author,
        description,
        com_type: ComicType::from_code(com_type),
        status: ComicStatus::from_code(status),
        rating: Rating::from_code(rating),
        cover,
        current_chap: u32::try_from(current_chap).unwrap_or_default(),
        viewed_chap: u32::try_from(viewed_chap).unwrap_or_default(),
        publishers: publishers.into_iter().map(Publisher::from_code).collect(),
        genres: genres.into_iter().map(Genre::from_code).collect(),
        last_update,
        track,
        deleted,
    })
}

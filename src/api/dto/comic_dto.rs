//! DTOs for the comic endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PaginationMeta;
use crate::domain::{
    Comic, ComicId, ComicStatus, ComicType, Genre, Page, Publisher, Rating,
};

/// Request body for `POST /comics` and `PUT /comics/{id}`.
///
/// Every field but `titles` is optional and defaults to its zero value;
/// `id`, `last_update` and `deleted` are owned by the store.
#[derive(Debug, Clone, Deserialize)]
pub struct ComicRequest {
    /// Titles in preference order.
    pub titles: Vec<String>,
    /// Author name.
    #[serde(default)]
    pub author: String,
    /// Synopsis.
    #[serde(default)]
    pub description: String,
    /// Publication format.
    #[serde(default, rename = "type")]
    pub com_type: ComicType,
    /// Publication status.
    #[serde(default)]
    pub status: ComicStatus,
    /// Reader rating.
    #[serde(default)]
    pub rating: Rating,
    /// Cover image URI.
    #[serde(default)]
    pub cover: String,
    /// Latest released chapter.
    #[serde(default)]
    pub current_chap: u32,
    /// Latest chapter read.
    #[serde(default)]
    pub viewed_chap: u32,
    /// Publishing sites.
    #[serde(default)]
    pub publishers: Vec<Publisher>,
    /// Genres.
    #[serde(default)]
    pub genres: Vec<Genre>,
    /// Follow new chapters.
    #[serde(default)]
    pub track: bool,
}

impl ComicRequest {
    /// Builds the domain record for `id` (ignored on create).
    #[must_use]
    pub fn into_comic(self, id: ComicId) -> Comic {
        Comic {
            id,
            titles: self.titles,
            author: self.author,
            description: self.description,
            com_type: self.com_type,
            status: self.status,
            rating: self.rating,
            cover: self.cover,
            current_chap: self.current_chap,
            viewed_chap: self.viewed_chap,
            publishers: self.publishers,
            genres: self.genres,
            last_update: DateTime::<Utc>::UNIX_EPOCH,
            track: self.track,
            deleted: false,
        }
    }
}

/// Comic as returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct ComicDto {
    /// Identifier.
    pub id: ComicId,
    /// Titles in preference order.
    pub titles: Vec<String>,
    /// Author name.
    pub author: String,
    /// Synopsis.
    pub description: String,
    /// Publication format.
    #[serde(rename = "type")]
    pub com_type: ComicType,
    /// Publication status.
    pub status: ComicStatus,
    /// Reader rating.
    pub rating: Rating,
    /// Cover image URI.
    pub cover: String,
    /// Latest released chapter.
    pub current_chap: u32,
    /// Latest chapter read.
    pub viewed_chap: u32,
    /// Whether unread chapters are out.
    pub has_unread: bool,
    /// Publishing sites.
    pub publishers: Vec<Publisher>,
    /// Genres.
    pub genres: Vec<Genre>,
    /// Timestamp of the last write.
    pub last_update: DateTime<Utc>,
    /// Follow new chapters.
    pub track: bool,
}

impl From<Comic> for ComicDto {
    fn from(comic: Comic) -> Self {
        Self {
            has_unread: comic.has_unread(),
            id: comic.id,
            titles: comic.titles,
            author: comic.author,
            description: comic.description,
            com_type: comic.com_type,
            status: comic.status,
            rating: comic.rating,
            cover: comic.cover,
            current_chap: comic.current_chap,
            viewed_chap: comic.viewed_chap,
            publishers: comic.publishers,
            genres: comic.genres,
            last_update: comic.last_update,
            track: comic.track,
        }
    }
}

/// Response body for `POST /comics`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateComicResponse {
    /// Assigned identifier.
    pub id: ComicId,
}

/// Paginated comic list.
#[derive(Debug, Clone, Serialize)]
pub struct ComicListResponse {
    /// Comics on this page.
    pub data: Vec<ComicDto>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

impl From<Page<Comic>> for ComicListResponse {
    fn from(page: Page<Comic>) -> Self {
        let pagination = PaginationMeta::from(&page);
        Self {
            data: page.items.into_iter().map(ComicDto::from).collect(),
            pagination,
        }
    }
}

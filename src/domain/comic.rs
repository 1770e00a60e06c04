//! The comic record persisted by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ComicId;
use super::catalog::{ComicStatus, ComicType, Genre, Publisher, Rating};
use crate::error::StoreError;

/// A catalog entry.
///
/// `id` and `last_update` are owned by the store: create assigns both,
/// update refreshes `last_update`. `viewed_chap <= current_chap` is a soft
/// invariant maintained by callers. Records are never hard-deleted; delete
/// flips `deleted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comic {
    /// Server-assigned identifier; ignored on create.
    pub id: ComicId,
    /// Titles in preference order; the first one is the display title.
    pub titles: Vec<String>,
    /// Author name.
    pub author: String,
    /// Free-form synopsis.
    pub description: String,
    /// Publication format.
    pub com_type: ComicType,
    /// Publication status.
    pub status: ComicStatus,
    /// Reader rating.
    pub rating: Rating,
    /// Cover image URI.
    pub cover: String,
    /// Latest released chapter.
    pub current_chap: u32,
    /// Latest chapter the reader has seen.
    pub viewed_chap: u32,
    /// Sites publishing this comic, in insertion order.
    pub publishers: Vec<Publisher>,
    /// Genres, in insertion order.
    pub genres: Vec<Genre>,
    /// Timestamp of the last write.
    pub last_update: DateTime<Utc>,
    /// Whether the reader follows new chapters.
    pub track: bool,
    /// Soft-delete flag.
    pub deleted: bool,
}

impl Comic {
    /// Creates a comic with the given first title and author and every
    /// other field at its default.
    #[must_use]
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: ComicId::default(),
            titles: vec![title.into()],
            author: author.into(),
            description: String::new(),
            com_type: ComicType::Unknown,
            status: ComicStatus::Unknown,
            rating: Rating::Unknown,
            cover: String::new(),
            current_chap: 0,
            viewed_chap: 0,
            publishers: Vec::new(),
            genres: Vec::new(),
            last_update: DateTime::<Utc>::UNIX_EPOCH,
            track: false,
            deleted: false,
        }
    }

    /// The display title (first entry of `titles`).
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.titles.first().map(String::as_str)
    }

    /// Whether a new chapter is out that the reader has not seen.
    #[must_use]
    pub const fn has_unread(&self) -> bool {
        self.track && self.viewed_chap < self.current_chap
    }

    /// Checks the invariants a write must satisfy.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] if `titles` is empty or
    /// contains a blank title.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.titles.is_empty() {
            return Err(StoreError::InvalidArgument(
                "a comic needs at least one title".to_string(),
            ));
        }
        if self.titles.iter().any(|t| t.trim().is_empty()) {
            return Err(StoreError::InvalidArgument(
                "titles must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    /// Case-insensitive substring match against titles, author and
    /// description. `needle` must already be lowercase.
    pub(crate) fn matches_term(&self, needle: &str) -> bool {
        self.titles.iter().any(|t| t.to_lowercase().contains(needle))
            || self.author.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
    }
}

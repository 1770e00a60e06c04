//! Type-safe comic identifier.
//!
//! [`ComicId`] is a newtype over the server-assigned row identifier so that
//! comic ids cannot be confused with page numbers, counters or other
//! integers flowing through the store.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Unique identifier for a comic.
///
/// Assigned by the store on create and immutable thereafter.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ComicId(u32);

impl ComicId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Converts the identifier into the signed column type used by
    /// PostgreSQL `SERIAL` keys.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidArgument`] when the id does not fit in
    /// an `i32`; such an id can never have been issued by the database.
    pub fn to_db(self) -> Result<i32, StoreError> {
        i32::try_from(self.0)
            .map_err(|_| StoreError::InvalidArgument(format!("comic id {} out of range", self.0)))
    }

    /// Builds an identifier from a database key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the database returned a
    /// negative key, which indicates a corrupted response.
    pub fn from_db(raw: i32) -> Result<Self, StoreError> {
        u32::try_from(raw)
            .map(Self)
            .map_err(|_| StoreError::Connection(format!("invalid comic id {raw} from database")))
    }
}

impl fmt::Display for ComicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ComicId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<ComicId> for u32 {
    fn from(id: ComicId) -> Self {
        id.0
    }
}

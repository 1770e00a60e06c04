//! Domain layer: the comic record and the types that describe queries
//! over it.
//!
//! Nothing in here touches the database; the persistence layer maps these
//! types to rows and the HTTP layer maps them to DTOs.

pub mod catalog;
pub mod comic;
pub mod comic_id;
pub mod page;

pub use catalog::{ComicStatus, ComicType, Genre, Publisher, Rating};
pub use comic::Comic;
pub use comic_id::ComicId;
pub use page::{ListFilter, Page, PageRequest};

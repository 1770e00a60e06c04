//! Data Transfer Objects for REST request/response serialization.
//!
//! Catalog enums are serialized as snake_case strings; the database integer
//! codes never leave the persistence layer.

pub mod comic_dto;
pub mod common_dto;

pub use comic_dto::*;
pub use common_dto::*;

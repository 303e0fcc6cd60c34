//! Error types for the marksync engine.

use crate::{BookmarkId, SchemaVersion};
use thiserror::Error;

/// All possible errors from the marksync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("bookmark not found: {0}")]
    BookmarkNotFound(BookmarkId),

    #[error("operation on deleted bookmark: {0}")]
    BookmarkDeleted(BookmarkId),

    #[error("invalid bookmark: {0}")]
    InvalidBookmark(String),

    // Wire errors
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("schema version {found} is newer than supported version {supported}")]
    SchemaVersionTooNew {
        supported: SchemaVersion,
        found: SchemaVersion,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

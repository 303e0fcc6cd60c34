//! The bookmark entity and its mutations.

use crate::{page::KeysetCursor, BookmarkId, Error, Timestamp};
use serde::{Deserialize, Serialize};

/// Generate a new bookmark id.
///
/// Ids are UUID v7 in their hyphenated text form: globally unique and
/// lexicographically ordered by creation time.
pub fn new_id() -> BookmarkId {
    uuid::Uuid::now_v7().to_string()
}

/// A bookmark row, as stored locally and exchanged on the wire.
///
/// Deletion is a tombstone: `deleted_at` is set and the row is kept, with
/// its title and url, so that a delete and a concurrent edit can be merged
/// by `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Client-generated id, never reused or changed
    pub id: BookmarkId,
    pub title: String,
    pub url: String,
    /// Set once on creation. Older rows and some deltas omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    /// Set on every local or remote mutation
    pub updated_at: Timestamp,
    /// Tombstone marker
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl Bookmark {
    /// Create a new, active bookmark.
    pub fn new(
        id: impl Into<BookmarkId>,
        title: impl Into<String>,
        url: impl Into<String>,
        at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            created_at: Some(at),
            updated_at: at,
            deleted_at: None,
        }
    }

    /// Check if the bookmark is active (not tombstoned).
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Replace title and url.
    pub fn edit(&mut self, title: impl Into<String>, url: impl Into<String>, at: Timestamp) {
        self.title = title.into();
        self.url = url.into();
        self.updated_at = at;
    }

    /// Mark the bookmark as deleted.
    pub fn tombstone(&mut self, at: Timestamp) {
        self.deleted_at = Some(at);
        self.updated_at = at;
    }

    /// Position of this row in `(updated_at, id)` order.
    pub fn cursor(&self) -> KeysetCursor {
        KeysetCursor::new(self.updated_at, self.id.clone())
    }

    /// Case-insensitive title search. Tombstones never match.
    pub fn matches(&self, query: &str) -> bool {
        if !self.is_active() {
            return false;
        }
        let query = query.trim();
        query.is_empty() || self.title.to_lowercase().contains(&query.to_lowercase())
    }

    /// The url with an `https://` scheme added when none is present.
    pub fn normalized_url(&self) -> String {
        let url = self.url.trim();
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{url}")
        }
    }

    /// Check that the user-editable fields are filled in.
    pub fn validate(&self) -> crate::error::Result<()> {
        validate_fields(&self.title, &self.url)
    }
}

pub(crate) fn validate_fields(title: &str, url: &str) -> crate::error::Result<()> {
    if title.trim().is_empty() {
        return Err(Error::InvalidBookmark("title is required".into()));
    }
    if url.trim().is_empty() {
        return Err(Error::InvalidBookmark("url is required".into()));
    }
    Ok(())
}

//! Wire types of the remote sync service.
//!
//! All messages are JSON with snake_case field names. Bookmarks travel in
//! the same shape they are stored in.

use crate::{clock::epoch, error::Result, page::BATCH_SIZE, Bookmark, Error, Timestamp};
use serde::{Deserialize, Serialize};

fn default_limit() -> usize {
    BATCH_SIZE
}

/// Query of `GET /bootstrap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapQuery {
    /// Opaque continuation from the previous page, absent on the first request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Maximum number of rows in the page
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Only rows with `updated_at` strictly after this instant
    #[serde(default = "epoch")]
    pub from: Timestamp,
}

impl BootstrapQuery {
    /// First page of rows changed after `from`.
    pub fn first(from: Timestamp, limit: usize) -> Self {
        Self {
            cursor: None,
            limit,
            from,
        }
    }

    /// The same query, continued at `cursor`.
    pub fn next(&self, cursor: impl Into<String>) -> Self {
        Self {
            cursor: Some(cursor.into()),
            ..self.clone()
        }
    }

    /// The cursor, treating an empty one as absent.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref().filter(|c| !c.is_empty())
    }
}

/// Response of `GET /bootstrap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapPage {
    pub bookmarks: Vec<Bookmark>,
    /// Cursor for the next page; null or empty on the last page
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl BootstrapPage {
    /// The next cursor, treating an empty one as absent.
    pub fn next_cursor(&self) -> Option<&str> {
        self.next_cursor.as_deref().filter(|c| !c.is_empty())
    }
}

/// Body of `POST /sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub bookmarks: Vec<Bookmark>,
}

/// Response of `POST /sync`.
///
/// Clients only look at the status code; the counts are informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PushResponse {
    /// Rows written
    pub accepted: usize,
    /// Rows ignored because the stored row was newer
    pub stale: usize,
}

/// Decode a single-record delta from the real-time stream.
pub fn parse_delta(text: &str) -> Result<Bookmark> {
    let row: Bookmark =
        serde_json::from_str(text).map_err(|e| Error::MalformedPayload(e.to_string()))?;
    if row.id.is_empty() {
        return Err(Error::MalformedPayload("empty bookmark id".into()));
    }
    Ok(row)
}

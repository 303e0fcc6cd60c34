//! Pagination primitives shared by the pull and push paths.
//!
//! Pulls follow an opaque server cursor; pushes walk local rows with a
//! keyset over `(updated_at, id)`. The id breaks ties between rows that
//! share a timestamp, so the order is total and a walk never skips or
//! repeats a row.

use crate::{error::Result, BookmarkId, Error, Timestamp};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Rows per request, for both pull and push.
pub const BATCH_SIZE: usize = 500;

/// Separator between the timestamp and id in an encoded cursor.
const CURSOR_SEPARATOR: char = '|';

/// A position in `(updated_at, id)` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetCursor {
    pub updated_at: Timestamp,
    pub id: BookmarkId,
}

impl KeysetCursor {
    pub fn new(updated_at: Timestamp, id: impl Into<BookmarkId>) -> Self {
        Self {
            updated_at,
            id: id.into(),
        }
    }

    /// Encode as opaque cursor text: `<rfc3339>|<id>`.
    pub fn encode(&self) -> String {
        format!(
            "{}{}{}",
            self.updated_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            CURSOR_SEPARATOR,
            self.id
        )
    }

    /// Parse cursor text produced by [`KeysetCursor::encode`].
    pub fn decode(text: &str) -> Result<Self> {
        let (timestamp, id) = text
            .split_once(CURSOR_SEPARATOR)
            .ok_or_else(|| Error::InvalidCursor(text.to_string()))?;
        if id.is_empty() {
            return Err(Error::InvalidCursor(text.to_string()));
        }
        let updated_at = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|e| Error::InvalidCursor(format!("{text}: {e}")))?
            .with_timezone(&Utc);
        Ok(Self::new(updated_at, id))
    }
}

impl Ord for KeysetCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.updated_at.cmp(&other.updated_at) {
            Ordering::Equal => self.id.cmp(&other.id),
            other => other,
        }
    }
}

impl PartialOrd for KeysetCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The range of `updated_at` values still to be pushed:
/// `lower < updated_at <= upper`, with no upper bound when `upper` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWindow {
    pub lower: Timestamp,
    pub upper: Option<Timestamp>,
}

impl PendingWindow {
    /// Everything changed after `lower`.
    pub fn after(lower: Timestamp) -> Self {
        Self { lower, upper: None }
    }

    /// Everything changed after `lower` and no later than `upper`.
    pub fn between(lower: Timestamp, upper: Timestamp) -> Self {
        Self {
            lower,
            upper: Some(upper),
        }
    }

    pub fn contains(&self, at: Timestamp) -> bool {
        at > self.lower && self.upper.map_or(true, |upper| at <= upper)
    }
}

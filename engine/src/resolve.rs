//! Conflict resolution between a stored row and an incoming one.
//!
//! Rows are merged whole, per id, by `updated_at`. A delete is just a row
//! with `deleted_at` set, so edits and deletes compete on the same footing:
//! whichever carries the later `updated_at` survives, in any arrival order.
//!
//! Rows pulled from the remote are applied with
//! [`MergeStrategy::RemoteAuthoritative`]: the remote has already settled
//! conflicts between devices before handing the row out. The remote itself
//! applies pushes with [`MergeStrategy::LastWriteWins`].

use crate::Bookmark;
use serde::{Deserialize, Serialize};

/// Merge strategy for an incoming row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// Incoming row always replaces the stored one (default)
    #[default]
    RemoteAuthoritative,
    /// Later `updated_at` wins; ties go to the incoming row
    LastWriteWins,
}

/// What happens to the store when an incoming row is merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// No row with this id existed
    Insert,
    /// The incoming row replaces the stored one
    Replace,
    /// The incoming row is identical to the stored one
    Unchanged,
    /// The stored row is newer and is kept
    Stale,
}

impl Resolution {
    /// Whether the store must be written.
    pub fn is_write(self) -> bool {
        matches!(self, Resolution::Insert | Resolution::Replace)
    }
}

/// Decide how `incoming` merges with `existing`.
pub fn resolve(
    existing: Option<&Bookmark>,
    incoming: &Bookmark,
    strategy: MergeStrategy,
) -> Resolution {
    let Some(existing) = existing else {
        return Resolution::Insert;
    };

    if merged(existing, incoming) == *existing {
        return Resolution::Unchanged;
    }

    match strategy {
        MergeStrategy::RemoteAuthoritative => Resolution::Replace,
        MergeStrategy::LastWriteWins => {
            if incoming.updated_at >= existing.updated_at {
                Resolution::Replace
            } else {
                Resolution::Stale
            }
        }
    }
}

/// The row that results from `incoming` replacing `existing`.
///
/// `created_at` is set once: a known value is never overwritten.
pub fn merged(existing: &Bookmark, incoming: &Bookmark) -> Bookmark {
    let mut row = incoming.clone();
    if existing.created_at.is_some() {
        row.created_at = existing.created_at;
    }
    row
}

/// Merge `incoming` into `existing`, returning the resolution and the row
/// to store when the store must be written.
pub fn apply(
    existing: Option<&Bookmark>,
    incoming: &Bookmark,
    strategy: MergeStrategy,
) -> (Resolution, Option<Bookmark>) {
    let resolution = resolve(existing, incoming, strategy);
    let row = match (resolution, existing) {
        (Resolution::Insert, _) => Some(incoming.clone()),
        (Resolution::Replace, Some(existing)) => Some(merged(existing, incoming)),
        _ => None,
    };
    (resolution, row)
}

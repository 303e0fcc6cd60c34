//! On-disk form of a [`Store`](crate::Store).
//!
//! The same rows and sync state always encode to the same bytes: rows are
//! kept in id order.

use crate::{
    error::Result, schema::CURRENT_SCHEMA_VERSION, Bookmark, BookmarkId, Error, SchemaVersion,
    SyncState,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Layout version of the snapshot file itself, independent of the row schema.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Rows and sync state of a store at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Layout version, see [`SNAPSHOT_FORMAT_VERSION`]
    pub format_version: u32,
    /// Schema version the rows were written with
    pub schema_version: SchemaVersion,
    /// Watermark and sync switch
    #[serde(default)]
    pub sync_state: SyncState,
    /// All rows, tombstones included, by id
    pub bookmarks: BTreeMap<BookmarkId, Bookmark>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSnapshot {
    /// An empty snapshot at the current schema version.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version: CURRENT_SCHEMA_VERSION,
            sync_state: SyncState::default(),
            bookmarks: BTreeMap::new(),
        }
    }

    /// Insert `row`, replacing any row with the same id.
    pub fn add_bookmark(&mut self, row: Bookmark) {
        self.bookmarks.insert(row.id.clone(), row);
    }

    /// Rows, tombstones included.
    pub fn bookmark_count(&self) -> usize {
        self.bookmarks.len()
    }

    pub fn active_count(&self) -> usize {
        self.bookmarks.values().filter(|b| b.is_active()).count()
    }

    /// Validate a snapshot that has been migrated to the current schema.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != CURRENT_SCHEMA_VERSION {
            crate::schema::check_version(self.schema_version)?;
            return Err(Error::InvalidSnapshot(format!(
                "schema version {} has not been migrated to {}",
                self.schema_version, CURRENT_SCHEMA_VERSION
            )));
        }

        for (id, row) in &self.bookmarks {
            if *id != row.id {
                return Err(Error::InvalidSnapshot(format!(
                    "bookmark keyed as '{}' has id '{}'",
                    id, row.id
                )));
            }
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(invalid)
    }

    /// Parse a snapshot file.
    ///
    /// The versions are read before the rows, so a file from a newer
    /// schema fails with [`Error::SchemaVersionTooNew`] whatever its rows
    /// look like.
    pub fn from_json(json: &str) -> Result<Self> {
        let header: SnapshotHeader = serde_json::from_str(json).map_err(invalid)?;
        if !(1..=SNAPSHOT_FORMAT_VERSION).contains(&header.format_version) {
            return Err(Error::InvalidSnapshot(format!(
                "snapshot layout {} is not readable (expected 1..={SNAPSHOT_FORMAT_VERSION})",
                header.format_version
            )));
        }
        crate::schema::check_version(header.schema_version)?;

        serde_json::from_str(json).map_err(invalid)
    }
}

/// Version fields of a snapshot file, read ahead of its rows.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotHeader {
    format_version: u32,
    schema_version: SchemaVersion,
}

fn invalid(err: serde_json::Error) -> Error {
    Error::InvalidSnapshot(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(id: &str) -> Bookmark {
        Bookmark::new(id, "t", "u", Utc.timestamp_opt(1000, 0).single().unwrap())
    }

    #[test]
    fn empty_snapshot_is_valid() {
        let snapshot = StoreSnapshot::new();
        assert_eq!(snapshot.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(snapshot.bookmark_count(), 0);
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn counts_skip_tombstones() {
        let mut snapshot = StoreSnapshot::new();
        snapshot.add_bookmark(row("a"));
        let mut gone = row("b");
        gone.tombstone(Utc.timestamp_opt(2000, 0).single().unwrap());
        snapshot.add_bookmark(gone);

        assert_eq!(snapshot.bookmark_count(), 2);
        assert_eq!(snapshot.active_count(), 1);
    }

    #[test]
    fn json_is_deterministic() {
        let mut first = StoreSnapshot::new();
        first.add_bookmark(row("b"));
        first.add_bookmark(row("a"));

        let mut second = StoreSnapshot::new();
        second.add_bookmark(row("a"));
        second.add_bookmark(row("b"));

        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }

    #[test]
    fn sync_state_survives_reload() {
        let mut snapshot = StoreSnapshot::new();
        snapshot.add_bookmark(row("a"));
        snapshot.sync_state.sync_enabled = true;

        let parsed = StoreSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert!(parsed.sync_state.sync_enabled);
        assert_eq!(parsed.bookmarks, snapshot.bookmarks);
    }

    #[test]
    fn unknown_layout_is_rejected() {
        for layout in [0, SNAPSHOT_FORMAT_VERSION + 1] {
            let mut snapshot = StoreSnapshot::new();
            snapshot.format_version = layout;
            let json = snapshot.to_json().unwrap();
            let err = StoreSnapshot::from_json(&json).unwrap_err();
            assert!(matches!(err, Error::InvalidSnapshot(_)));
        }
    }

    #[test]
    fn newer_schema_fails_validation() {
        let mut snapshot = StoreSnapshot::new();
        snapshot.schema_version = CURRENT_SCHEMA_VERSION + 1;
        assert!(matches!(
            snapshot.validate(),
            Err(Error::SchemaVersionTooNew { .. })
        ));
    }

    #[test]
    fn newer_schema_is_reported_before_rows_are_read() {
        let json = format!(
            r#"{{"formatVersion":1,"schemaVersion":{},"bookmarks":[{{"key":"a","value":7}}]}}"#,
            CURRENT_SCHEMA_VERSION + 1
        );
        assert!(matches!(
            StoreSnapshot::from_json(&json),
            Err(Error::SchemaVersionTooNew { found, .. }) if found == CURRENT_SCHEMA_VERSION + 1
        ));
    }

    #[test]
    fn mismatched_key_fails_validation() {
        let mut snapshot = StoreSnapshot::new();
        snapshot.bookmarks.insert("x".into(), row("a"));
        assert!(matches!(
            snapshot.validate(),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn missing_sync_state_defaults() {
        let json = r#"{"formatVersion":1,"schemaVersion":1,"bookmarks":{}}"#;
        let snapshot = StoreSnapshot::from_json(json).unwrap();
        assert_eq!(snapshot.sync_state, SyncState::default());
    }
}

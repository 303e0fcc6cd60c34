//! Store - the in-memory Local Store.
//!
//! Holds every bookmark row, tombstones included, keyed by id, plus the
//! scalar sync state. A secondary index over `(updated_at, id)` serves the
//! keyset range queries of the push path.

use crate::{
    bookmark::validate_fields,
    clock::{epoch, next_mutation_time, Clock},
    error::Result,
    new_id,
    page::{KeysetCursor, PendingWindow},
    resolve::{apply, MergeStrategy, Resolution},
    Bookmark, BookmarkId, Error, StoreSnapshot, Timestamp,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Default number of rows returned by [`Store::search`].
pub const SEARCH_LIMIT: usize = 50;

/// Scalar sync state, kept outside the row collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Exclusive lower bound of changes not yet reconciled
    pub last_synced_at: Timestamp,
    /// Whether this device syncs at all
    pub sync_enabled: bool,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            last_synced_at: epoch(),
            sync_enabled: false,
        }
    }
}

/// The store holding all local state.
#[derive(Debug, Clone, Default)]
pub struct Store {
    /// Rows by id, tombstones included
    bookmarks: BTreeMap<BookmarkId, Bookmark>,
    /// `(updated_at, id)` of every row
    by_update: BTreeSet<KeysetCursor>,
    sync_state: SyncState,
    /// Local mutations committed since load
    revision: u64,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a row by id, including tombstones.
    pub fn get(&self, id: &str) -> Option<&Bookmark> {
        self.bookmarks.get(id)
    }

    /// Get an active row by id.
    pub fn get_active(&self, id: &str) -> Option<&Bookmark> {
        self.get(id).filter(|b| b.is_active())
    }

    /// Write a row as-is, replacing any row with the same id.
    pub fn put(&mut self, row: Bookmark) {
        if let Some(previous) = self.bookmarks.get(&row.id) {
            self.by_update.remove(&previous.cursor());
        }
        self.by_update.insert(row.cursor());
        self.bookmarks.insert(row.id.clone(), row);
    }

    /// Merge an incoming row: read, resolve, then write if needed.
    ///
    /// Applying the same row twice leaves the store as applying it once.
    pub fn upsert(&mut self, incoming: &Bookmark, strategy: MergeStrategy) -> Resolution {
        let (resolution, row) = apply(self.get(&incoming.id), incoming, strategy);
        if let Some(row) = row {
            self.put(row);
        }
        resolution
    }

    /// Number of rows, tombstones included.
    pub fn count(&self) -> usize {
        self.bookmarks.len()
    }

    /// Number of active rows.
    pub fn active_count(&self) -> usize {
        self.bookmarks.values().filter(|b| b.is_active()).count()
    }

    /// Check if the store holds no rows at all.
    pub fn is_empty(&self) -> bool {
        self.bookmarks.is_empty()
    }

    /// Rows inside `window`, strictly after `after`, in `(updated_at, id)`
    /// order, at most `limit` of them.
    pub fn pending(
        &self,
        window: PendingWindow,
        after: Option<&KeysetCursor>,
        limit: usize,
    ) -> Vec<Bookmark> {
        // Smallest key strictly above `window.lower`.
        let floor = KeysetCursor::new(window.lower + Duration::nanoseconds(1), "");
        let start = match after {
            Some(cursor) if *cursor >= floor => Bound::Excluded(cursor.clone()),
            _ => Bound::Included(floor),
        };

        self.by_update
            .range((start, Bound::Unbounded))
            .take_while(|key| window.contains(key.updated_at))
            .take(limit)
            .filter_map(|key| self.bookmarks.get(&key.id).cloned())
            .collect()
    }

    /// Active rows whose title matches `query`, newest first.
    pub fn search(&self, query: &str, limit: usize) -> Vec<&Bookmark> {
        self.bookmarks
            .values()
            .rev()
            .filter(|b| b.matches(query))
            .take(limit)
            .collect()
    }

    /// Create a bookmark locally.
    pub fn create(
        &mut self,
        title: impl Into<String>,
        url: impl Into<String>,
        clock: &dyn Clock,
    ) -> Result<Bookmark> {
        let (title, url) = (title.into(), url.into());
        validate_fields(&title, &url)?;

        let row = Bookmark::new(new_id(), title, url, self.stamp(clock, None));
        self.commit_local(row.clone());
        Ok(row)
    }

    /// Edit an active bookmark locally.
    pub fn edit(
        &mut self,
        id: &str,
        title: impl Into<String>,
        url: impl Into<String>,
        clock: &dyn Clock,
    ) -> Result<Bookmark> {
        let (title, url) = (title.into(), url.into());
        validate_fields(&title, &url)?;

        let mut row = self.active_row(id)?;
        let at = self.stamp(clock, Some(row.updated_at));
        row.edit(title, url, at);
        self.commit_local(row.clone());
        Ok(row)
    }

    /// Tombstone an active bookmark locally.
    pub fn delete(&mut self, id: &str, clock: &dyn Clock) -> Result<Bookmark> {
        let mut row = self.active_row(id)?;
        let at = self.stamp(clock, Some(row.updated_at));
        row.tombstone(at);
        self.commit_local(row.clone());
        Ok(row)
    }

    /// Mutation timestamp strictly after both the row's previous stamp and
    /// the watermark, so a fresh mutation always lands in the next push
    /// window.
    fn stamp(&self, clock: &dyn Clock, previous: Option<Timestamp>) -> Timestamp {
        let floor = previous.map_or(self.sync_state.last_synced_at, |previous| {
            previous.max(self.sync_state.last_synced_at)
        });
        next_mutation_time(clock, Some(floor))
    }

    fn commit_local(&mut self, row: Bookmark) {
        self.put(row);
        self.revision += 1;
    }

    /// Number of local mutations committed since the store was created or
    /// loaded. Remote rows merged by [`Store::upsert`] do not count.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn active_row(&self, id: &str) -> Result<Bookmark> {
        let row = self
            .get(id)
            .ok_or_else(|| Error::BookmarkNotFound(id.to_string()))?;
        if !row.is_active() {
            return Err(Error::BookmarkDeleted(id.to_string()));
        }
        Ok(row.clone())
    }

    /// Current sync state.
    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    /// Advance the watermark. Returns false, leaving it untouched, if `at`
    /// is earlier than the current watermark.
    pub fn set_last_synced_at(&mut self, at: Timestamp) -> bool {
        if at < self.sync_state.last_synced_at {
            return false;
        }
        self.sync_state.last_synced_at = at;
        true
    }

    /// Advance the watermark to `at` only if no local mutation was
    /// committed after [`Store::revision`] returned `revision`.
    pub fn set_last_synced_at_if_unchanged(&mut self, at: Timestamp, revision: u64) -> bool {
        self.revision == revision && self.set_last_synced_at(at)
    }

    /// Turn syncing on or off.
    pub fn set_sync_enabled(&mut self, enabled: bool) {
        self.sync_state.sync_enabled = enabled;
    }

    /// Export the current store state as a snapshot.
    pub fn export_state(&self) -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::new();
        snapshot.sync_state = self.sync_state;
        for row in self.bookmarks.values() {
            snapshot.add_bookmark(row.clone());
        }
        snapshot
    }

    /// Replace the store's state with a snapshot's, migrating it first.
    ///
    /// Fails with [`Error::SchemaVersionTooNew`] if the snapshot was written
    /// by a newer schema.
    pub fn import_state(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        let snapshot = crate::schema::migrate(snapshot)?;
        snapshot.validate()?;

        self.bookmarks.clear();
        self.by_update.clear();
        self.sync_state = snapshot.sync_state;
        for (_, row) in snapshot.bookmarks {
            self.put(row);
        }
        Ok(())
    }

    /// Build a store from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        let mut store = Self::new();
        store.import_state(snapshot)?;
        Ok(store)
    }
}

//! Local Store capability contract and its snapshot-file implementation.
//!
//! The sync engine only talks to the store through [`LocalStore`]. All
//! writers (local mutations, bootstrap pulls and the real-time listener)
//! go through the same read-check-write merge of [`LocalStore::upsert`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use marksync_engine::{
    resolve::apply, Bookmark, Clock, KeysetCursor, MergeStrategy, PendingWindow, Resolution,
    Store, StoreSnapshot, SyncState, Timestamp,
};
use tokio::sync::Mutex;

use crate::error::Result;

/// Capabilities the sync engine needs from durable local storage.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Row by id, tombstones included.
    async fn get(&self, id: &str) -> Result<Option<Bookmark>>;

    /// Merge a row by id with the given strategy.
    async fn upsert(&self, row: &Bookmark, strategy: MergeStrategy) -> Result<Resolution>;

    /// Merge rows in order as one durable write.
    async fn upsert_many(
        &self,
        rows: &[Bookmark],
        strategy: MergeStrategy,
    ) -> Result<Vec<Resolution>>;

    /// Number of rows, tombstones included.
    async fn count(&self) -> Result<usize>;

    /// Rows in `window` strictly after `after`, ordered by `(updated_at, id)`.
    async fn pending(
        &self,
        window: PendingWindow,
        after: Option<KeysetCursor>,
        limit: usize,
    ) -> Result<Vec<Bookmark>>;

    /// Active rows whose title matches `query`, newest first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Bookmark>>;

    async fn sync_state(&self) -> Result<SyncState>;

    /// Advance the watermark. Never moves it backwards.
    async fn set_last_synced_at(&self, at: Timestamp) -> Result<()>;

    /// Counter bumped by every committed create, edit or delete.
    async fn revision(&self) -> Result<u64>;

    /// Advance the watermark only if no local mutation was committed since
    /// [`LocalStore::revision`] returned `revision`. Returns whether it moved.
    async fn set_last_synced_at_if_unchanged(&self, at: Timestamp, revision: u64) -> Result<bool>;

    async fn set_sync_enabled(&self, enabled: bool) -> Result<()>;

    /// Create a bookmark stamped with the store's clock.
    async fn create(&self, title: String, url: String) -> Result<Bookmark>;

    async fn edit(&self, id: &str, title: String, url: String) -> Result<Bookmark>;

    /// Tombstone a bookmark.
    async fn delete(&self, id: &str) -> Result<Bookmark>;
}

/// [`Store`] behind an async mutex, optionally persisted to a JSON snapshot
/// file.
///
/// A change reaches memory only after its snapshot is on disk, so a failed
/// write leaves the store as it was.
pub struct SnapshotStore {
    inner: Mutex<Store>,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl SnapshotStore {
    /// A store that lives only in memory.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Store::new()),
            path: None,
            clock,
        }
    }

    /// Open the snapshot file at `path`, starting empty if it does not exist.
    ///
    /// Fails with an engine error if the file was written by a newer schema.
    pub async fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.into();
        let store = match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                let snapshot = StoreSnapshot::from_json(&json)?;
                let from_version = snapshot.schema_version;
                let store = Store::from_snapshot(snapshot)?;
                tracing::info!(
                    path = %path.display(),
                    rows = store.count(),
                    schema_version = from_version,
                    "Opened local store"
                );
                store
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Creating new local store");
                Store::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            inner: Mutex::new(store),
            path: Some(path),
            clock,
        })
    }

    /// Path of the snapshot file, if persisted.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply `change` to a copy of `store`, persist the copy, then swap it in.
    async fn commit<T>(
        &self,
        store: &mut Store,
        change: impl FnOnce(&mut Store) -> marksync_engine::error::Result<T>,
    ) -> Result<T> {
        let Some(path) = &self.path else {
            return Ok(change(store)?);
        };

        let mut next = store.clone();
        let out = change(&mut next)?;
        persist(path, &next).await?;
        *store = next;
        Ok(out)
    }
}

/// Write the snapshot to a temporary file, then rename it into place.
async fn persist(path: &Path, store: &Store) -> Result<()> {
    let json = store.export_state().to_json()?;
    let mut tmp = path.to_path_buf().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl LocalStore for SnapshotStore {
    async fn get(&self, id: &str) -> Result<Option<Bookmark>> {
        Ok(self.inner.lock().await.get(id).cloned())
    }

    async fn upsert(&self, row: &Bookmark, strategy: MergeStrategy) -> Result<Resolution> {
        let mut store = self.inner.lock().await;
        let (resolution, merged) = apply(store.get(&row.id), row, strategy);
        if let Some(merged) = merged {
            self.commit(&mut store, |store| {
                store.put(merged);
                Ok(())
            })
            .await?;
        }
        Ok(resolution)
    }

    async fn upsert_many(
        &self,
        rows: &[Bookmark],
        strategy: MergeStrategy,
    ) -> Result<Vec<Resolution>> {
        let mut store = self.inner.lock().await;
        let writes = rows
            .iter()
            .any(|row| apply(store.get(&row.id), row, strategy).0.is_write());
        if !writes {
            return Ok(rows
                .iter()
                .map(|row| apply(store.get(&row.id), row, strategy).0)
                .collect());
        }

        self.commit(&mut store, |store| {
            Ok(rows.iter().map(|row| store.upsert(row, strategy)).collect())
        })
        .await
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.lock().await.count())
    }

    async fn pending(
        &self,
        window: PendingWindow,
        after: Option<KeysetCursor>,
        limit: usize,
    ) -> Result<Vec<Bookmark>> {
        Ok(self
            .inner
            .lock()
            .await
            .pending(window, after.as_ref(), limit))
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Bookmark>> {
        let store = self.inner.lock().await;
        Ok(store.search(query, limit).into_iter().cloned().collect())
    }

    async fn sync_state(&self) -> Result<SyncState> {
        Ok(self.inner.lock().await.sync_state())
    }

    async fn set_last_synced_at(&self, at: Timestamp) -> Result<()> {
        let mut store = self.inner.lock().await;
        if at < store.sync_state().last_synced_at {
            tracing::debug!(
                current = %store.sync_state().last_synced_at,
                requested = %at,
                "Ignoring watermark that would move backwards"
            );
            return Ok(());
        }
        self.commit(&mut store, |store| {
            store.set_last_synced_at(at);
            Ok(())
        })
        .await
    }

    async fn revision(&self) -> Result<u64> {
        Ok(self.inner.lock().await.revision())
    }

    async fn set_last_synced_at_if_unchanged(&self, at: Timestamp, revision: u64) -> Result<bool> {
        let mut store = self.inner.lock().await;
        if store.revision() != revision || at < store.sync_state().last_synced_at {
            return Ok(false);
        }
        self.commit(&mut store, |store| {
            Ok(store.set_last_synced_at_if_unchanged(at, revision))
        })
        .await
    }

    async fn set_sync_enabled(&self, enabled: bool) -> Result<()> {
        let mut store = self.inner.lock().await;
        self.commit(&mut store, |store| {
            store.set_sync_enabled(enabled);
            Ok(())
        })
        .await
    }

    async fn create(&self, title: String, url: String) -> Result<Bookmark> {
        let mut store = self.inner.lock().await;
        let clock = self.clock.as_ref();
        self.commit(&mut store, |store| store.create(title, url, clock))
            .await
    }

    async fn edit(&self, id: &str, title: String, url: String) -> Result<Bookmark> {
        let mut store = self.inner.lock().await;
        let clock = self.clock.as_ref();
        self.commit(&mut store, |store| store.edit(id, title, url, clock))
            .await
    }

    async fn delete(&self, id: &str) -> Result<Bookmark> {
        let mut store = self.inner.lock().await;
        let clock = self.clock.as_ref();
        self.commit(&mut store, |store| store.delete(id, clock))
            .await
    }
}

//! In-process remote sync service for client tests.
//!
//! Keeps the server's rows in an engine [`Store`] merged last-write-wins,
//! records every request, and can fail or hold individual calls.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use marksync_client::{
    FrameStream, LocalStore, Notifier, RemoteService, Result, SnapshotStore, SyncCoordinator, SyncError,
};
use marksync_engine::{
    Bookmark, BootstrapPage, BootstrapQuery, KeysetCursor, ManualClock, MergeStrategy,
    PendingWindow, PushResponse, Store, Timestamp,
};
use tokio::sync::{mpsc, oneshot, Notify};

pub fn at(secs: i64) -> Timestamp {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

pub fn row(id: &str, title: &str, secs: i64) -> Bookmark {
    Bookmark::new(id, title, format!("https://{id}.example"), at(secs))
}

/// `n` rows with ids `R0000..` and one-second-apart timestamps from `start`.
pub fn rows(n: usize, start: i64) -> Vec<Bookmark> {
    (0..n)
        .map(|i| row(&format!("R{i:04}"), "seeded", start + i as i64))
        .collect()
}

/// Sender side of a fake event stream.
pub type FrameSender = mpsc::UnboundedSender<Result<String>>;

#[derive(Default)]
pub struct FakeRemote {
    server: Mutex<Store>,
    queries: Mutex<Vec<BootstrapQuery>>,
    pushes: Mutex<Vec<Vec<Bookmark>>>,
    fail_bootstrap_at: Mutex<Option<usize>>,
    fail_push_at: Mutex<Option<usize>>,
    push_gate: Mutex<Option<oneshot::Receiver<()>>>,
    streams: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<String>>>>,
    subscribes: Mutex<usize>,
    /// Notified every time a push reaches the remote
    pub push_entered: Notify,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store rows on the server.
    pub fn seed(&self, rows: impl IntoIterator<Item = Bookmark>) {
        let mut server = self.server.lock().unwrap();
        for row in rows {
            server.upsert(&row, MergeStrategy::LastWriteWins);
        }
    }

    pub fn server_row(&self, id: &str) -> Option<Bookmark> {
        self.server.lock().unwrap().get(id).cloned()
    }

    pub fn server_count(&self) -> usize {
        self.server.lock().unwrap().count()
    }

    pub fn queries(&self) -> Vec<BootstrapQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn pushes(&self) -> Vec<Vec<Bookmark>> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn pushed_ids(&self) -> Vec<String> {
        self.pushes()
            .into_iter()
            .flatten()
            .map(|row| row.id)
            .collect()
    }

    pub fn subscribe_count(&self) -> usize {
        *self.subscribes.lock().unwrap()
    }

    /// Fail the `n`th bootstrap request from now (0-based), once.
    pub fn fail_bootstrap_at(&self, n: usize) {
        let already = self.queries.lock().unwrap().len();
        *self.fail_bootstrap_at.lock().unwrap() = Some(already + n);
    }

    /// Fail the `n`th push request from now (0-based), once.
    pub fn fail_push_at(&self, n: usize) {
        let already = self.pushes.lock().unwrap().len();
        *self.fail_push_at.lock().unwrap() = Some(already + n);
    }

    /// Hold the next push until the returned sender fires or is dropped.
    pub fn hold_next_push(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        *self.push_gate.lock().unwrap() = Some(gate);
        release
    }

    /// Queue an event stream for the next `subscribe`. With no stream
    /// queued, `subscribe` fails as if offline.
    pub fn queue_stream(&self) -> FrameSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().push_back(rx);
        tx
    }
}

fn take_failure(slot: &Mutex<Option<usize>>, index: usize) -> bool {
    let mut slot = slot.lock().unwrap();
    if *slot == Some(index) {
        *slot = None;
        true
    } else {
        false
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn bootstrap(&self, query: &BootstrapQuery) -> Result<BootstrapPage> {
        let index = {
            let mut queries = self.queries.lock().unwrap();
            queries.push(query.clone());
            queries.len() - 1
        };
        if take_failure(&self.fail_bootstrap_at, index) {
            return Err(SyncError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }

        let after = query.cursor().map(KeysetCursor::decode).transpose()?;
        let mut bookmarks = self.server.lock().unwrap().pending(
            PendingWindow::after(query.from),
            after.as_ref(),
            query.limit + 1,
        );
        let has_more = bookmarks.len() > query.limit;
        bookmarks.truncate(query.limit);
        let next_cursor = if has_more {
            bookmarks.last().map(|row| row.cursor().encode())
        } else {
            None
        };

        Ok(BootstrapPage {
            bookmarks,
            next_cursor,
        })
    }

    async fn push(&self, rows: &[Bookmark]) -> Result<PushResponse> {
        self.push_entered.notify_one();
        let gate = self.push_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let index = {
            let mut pushes = self.pushes.lock().unwrap();
            pushes.push(rows.to_vec());
            pushes.len() - 1
        };
        if take_failure(&self.fail_push_at, index) {
            return Err(SyncError::Network("connection reset".into()));
        }

        let mut response = PushResponse::default();
        let mut server = self.server.lock().unwrap();
        for row in rows {
            if server.upsert(row, MergeStrategy::LastWriteWins).is_write() {
                response.accepted += 1;
            } else {
                response.stale += 1;
            }
        }
        Ok(response)
    }

    async fn subscribe(&self) -> Result<FrameStream> {
        *self.subscribes.lock().unwrap() += 1;
        let Some(rx) = self.streams.lock().unwrap().pop_front() else {
            return Err(SyncError::Network("offline".into()));
        };
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        })
        .boxed())
    }
}

/// A coordinator over an in-memory store and a [`FakeRemote`].
pub struct Harness {
    pub clock: ManualClock,
    pub store: Arc<SnapshotStore>,
    pub remote: Arc<FakeRemote>,
    pub notifier: Arc<Notifier>,
    pub coordinator: Arc<SyncCoordinator>,
}

impl Harness {
    pub async fn new(batch_size: usize) -> Self {
        Self::with_strategy(batch_size, MergeStrategy::RemoteAuthoritative).await
    }

    pub async fn with_strategy(batch_size: usize, strategy: MergeStrategy) -> Self {
        let clock = ManualClock::new(at(1_000_000));
        let store = Arc::new(SnapshotStore::in_memory(Arc::new(clock.clone())));
        let remote = FakeRemote::new();
        let notifier = Notifier::new_shared();
        let coordinator = Arc::new(
            SyncCoordinator::new(
                store.clone(),
                remote.clone(),
                notifier.clone(),
                Arc::new(clock.clone()),
                batch_size,
            )
            .with_strategy(strategy),
        );

        store.set_sync_enabled(true).await.unwrap();

        Self {
            clock,
            store,
            remote,
            notifier,
            coordinator,
        }
    }
}

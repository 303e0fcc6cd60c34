//! Sync Coordinator: bootstrap and incremental passes.
//!
//! A pass reads the watermark, moves rows between the Local Store and the
//! remote, and only then advances the watermark. Any failure aborts the
//! pass with the watermark untouched; both sides upsert idempotently, so
//! the next trigger simply runs the whole pass again.
//!
//! At most one pass runs at a time. A trigger that arrives while a pass is
//! in flight is coalesced into a single follow-up pass.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use marksync_engine::{
    Bookmark, BootstrapQuery, Clock, KeysetCursor, MergeStrategy, PendingWindow, Resolution,
    Timestamp,
};
use tokio::sync::Notify;

use crate::error::{Result, SyncError};
use crate::notify::{ChangeSource, Notifier};
use crate::remote::RemoteService;
use crate::store::LocalStore;

/// Kind of sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Pull everything changed since the watermark, then push local changes
    Bootstrap,
    /// Push local changes only
    Incremental,
}

impl PassKind {
    /// The pass that covers both `self` and `other`.
    pub fn covering(self, other: PassKind) -> PassKind {
        if self == PassKind::Bootstrap || other == PassKind::Bootstrap {
            PassKind::Bootstrap
        } else {
            PassKind::Incremental
        }
    }
}

/// Counts from one or more completed passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Rows received from the remote
    pub pulled: usize,
    /// Rows sent to the remote
    pub pushed: usize,
    /// Remote requests made
    pub requests: usize,
    /// Watermark written by the last pass
    pub watermark: Option<Timestamp>,
}

impl PassReport {
    fn absorb(&mut self, other: PassReport) {
        self.pulled += other.pulled;
        self.pushed += other.pushed;
        self.requests += other.requests;
        self.watermark = other.watermark.or(self.watermark);
    }
}

/// Result of asking the coordinator to run a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The pass ran, plus any follow-up passes coalesced into it
    Completed(PassReport),
    /// Another pass was in flight; it will run one more pass
    Coalesced,
    /// Sync is turned off
    Disabled,
}

/// Merge a row received from the remote into the Local Store.
///
/// The single write path for pulled rows and real-time deltas.
pub async fn apply_remote(
    store: &dyn LocalStore,
    row: &Bookmark,
    strategy: MergeStrategy,
) -> Result<Resolution> {
    let resolution = store.upsert(row, strategy).await?;
    tracing::trace!(id = %row.id, ?resolution, "Applied remote row");
    Ok(resolution)
}

/// Merge a pulled page into the Local Store as one write.
pub async fn apply_remote_page(
    store: &dyn LocalStore,
    rows: &[Bookmark],
    strategy: MergeStrategy,
) -> Result<Vec<Resolution>> {
    let resolutions = store.upsert_many(rows, strategy).await?;
    tracing::trace!(
        rows = rows.len(),
        writes = resolutions.iter().filter(|r| r.is_write()).count(),
        "Applied remote page"
    );
    Ok(resolutions)
}

#[derive(Debug, Default)]
struct Flight {
    running: bool,
    /// Single slot for triggers that arrived mid-pass
    pending: Option<PassKind>,
}

/// Marks a pass as in flight until dropped or finished.
struct InFlight<'a> {
    flight: &'a Mutex<Flight>,
    idle: &'a Notify,
    finished: bool,
}

impl InFlight<'_> {
    /// Take the coalesced trigger, or release the guard if there is none.
    fn next_follow_up(&mut self) -> Option<PassKind> {
        let mut flight = lock(self.flight);
        let next = flight.pending.take();
        if next.is_none() {
            flight.running = false;
            self.finished = true;
            self.idle.notify_waiters();
        }
        next
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // Failed or cancelled: drop coalesced triggers, the next one retries.
            let mut flight = lock(self.flight);
            flight.running = false;
            flight.pending = None;
            self.idle.notify_waiters();
        }
    }
}

fn lock(flight: &Mutex<Flight>) -> MutexGuard<'_, Flight> {
    flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Orchestrates sync passes between a [`LocalStore`] and a [`RemoteService`].
pub struct SyncCoordinator {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteService>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
    strategy: MergeStrategy,
    flight: Mutex<Flight>,
    /// Woken when the guard is released
    idle: Notify,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteService>,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            remote,
            notifier,
            clock,
            batch_size: batch_size.max(1),
            strategy: MergeStrategy::RemoteAuthoritative,
            flight: Mutex::new(Flight::default()),
            idle: Notify::new(),
        }
    }

    /// Use `strategy` when merging pulled rows.
    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    pub fn remote(&self) -> &Arc<dyn RemoteService> {
        &self.remote
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Whether a pass is currently in flight.
    pub fn is_running(&self) -> bool {
        lock(&self.flight).running
    }

    /// Wait until no pass is in flight, coalesced follow-ups included.
    pub async fn wait_idle(&self) {
        loop {
            let released = self.idle.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if !self.is_running() {
                return;
            }
            released.await;
        }
    }

    /// Run a pass unless one is already in flight.
    ///
    /// Triggers arriving while this pass runs are answered with
    /// [`RunOutcome::Coalesced`]; this call then runs exactly one more pass
    /// before returning, however many triggers arrived. The follow-up is
    /// incremental unless one of them asked for a bootstrap.
    pub async fn run(&self, kind: PassKind) -> Result<RunOutcome> {
        if !self.store.sync_state().await?.sync_enabled {
            tracing::debug!(?kind, "Sync disabled, skipping pass");
            return Ok(RunOutcome::Disabled);
        }

        {
            let mut flight = lock(&self.flight);
            if flight.running {
                flight.pending = Some(match flight.pending {
                    Some(pending) => pending.covering(kind),
                    None => kind,
                });
                tracing::debug!(?kind, "Pass in flight, coalescing trigger");
                return Ok(RunOutcome::Coalesced);
            }
            flight.running = true;
        }
        let mut guard = InFlight {
            flight: &self.flight,
            idle: &self.idle,
            finished: false,
        };

        let mut report = self.pass(kind).await?;
        while let Some(next) = guard.next_follow_up() {
            tracing::debug!(kind = ?next, "Running coalesced follow-up pass");
            report.absorb(self.pass(next).await?);
        }

        Ok(RunOutcome::Completed(report))
    }

    async fn pass(&self, kind: PassKind) -> Result<PassReport> {
        let result = match kind {
            PassKind::Bootstrap => self.bootstrap().await,
            PassKind::Incremental => self.incremental_sync().await,
        };
        if let Err(e) = &result {
            tracing::warn!(?kind, error = %e, retryable = e.is_retryable(), "Sync pass failed");
        }
        result
    }

    /// Pull every remote row changed since the watermark, then, on a device
    /// that already held rows, push local changes made since it.
    ///
    /// Calls the remote directly; use [`SyncCoordinator::run`] to honor the
    /// single-flight guard.
    pub async fn bootstrap(&self) -> Result<PassReport> {
        let lower = self.store.sync_state().await?.last_synced_at;
        let sync_started_at = self.clock.now();
        let revision = self.store.revision().await?;
        let had_rows = self.store.count().await? > 0;
        let mut report = PassReport::default();

        tracing::info!(from = %lower, resuming = had_rows, "Bootstrap started");

        let mut query = BootstrapQuery::first(lower, self.batch_size);
        loop {
            let page = self.remote.bootstrap(&query).await?;
            report.requests += 1;

            apply_remote_page(self.store.as_ref(), &page.bookmarks, self.strategy).await?;
            report.pulled += page.bookmarks.len();

            tracing::debug!(
                rows = page.bookmarks.len(),
                next_cursor = ?page.next_cursor(),
                "Pulled bootstrap page"
            );

            match page.next_cursor() {
                Some(cursor) if query.cursor() == Some(cursor) => {
                    return Err(SyncError::Malformed(format!(
                        "remote repeated cursor {cursor}"
                    )));
                }
                Some(cursor) => query = query.next(cursor),
                None => break,
            }
        }

        if had_rows {
            let window = PendingWindow::between(lower, sync_started_at);
            self.push_window(window, &mut report).await?;
        }

        let watermark = self
            .commit_watermark(sync_started_at, sync_started_at, lower, revision)
            .await?;
        report.watermark = Some(watermark);

        tracing::info!(
            pulled = report.pulled,
            pushed = report.pushed,
            requests = report.requests,
            watermark = %watermark,
            "Bootstrap finished"
        );

        if report.pulled > 0 {
            let source = if had_rows {
                ChangeSource::Pull
            } else {
                ChangeSource::Bootstrap
            };
            self.notifier.state_changed(source);
        }

        Ok(report)
    }

    /// Push every local row changed since the watermark.
    ///
    /// Calls the remote directly; use [`SyncCoordinator::run`] to honor the
    /// single-flight guard.
    pub async fn incremental_sync(&self) -> Result<PassReport> {
        let lower = self.store.sync_state().await?.last_synced_at;
        let sync_started_at = self.clock.now();
        let revision = self.store.revision().await?;
        let mut report = PassReport::default();

        self.push_window(PendingWindow::after(lower), &mut report)
            .await?;

        let finished_at = self.clock.now();
        let watermark = self
            .commit_watermark(finished_at, sync_started_at, lower, revision)
            .await?;
        report.watermark = Some(watermark);

        tracing::info!(
            pushed = report.pushed,
            requests = report.requests,
            watermark = %watermark,
            "Incremental sync finished"
        );

        Ok(report)
    }

    /// Write `target` as the watermark if no local mutation was committed
    /// since `revision` was read at `started_at`.
    ///
    /// Otherwise that mutation may sit behind the keyset position already
    /// walked, so the watermark stops just below `started_at` instead. The
    /// store stamps mutations strictly after the watermark, so rows written
    /// once it is set always fall in the next window.
    async fn commit_watermark(
        &self,
        target: Timestamp,
        started_at: Timestamp,
        lower: Timestamp,
        revision: u64,
    ) -> Result<Timestamp> {
        if self
            .store
            .set_last_synced_at_if_unchanged(target, revision)
            .await?
        {
            return Ok(target);
        }

        let watermark = (started_at - Duration::milliseconds(1)).max(lower);
        tracing::debug!(%target, %watermark, "Watermark target not written, holding back");
        self.store.set_last_synced_at(watermark).await?;
        Ok(watermark)
    }

    /// Push rows in `window` in `(updated_at, id)` order, one batch per
    /// request, until a batch comes back short.
    async fn push_window(&self, window: PendingWindow, report: &mut PassReport) -> Result<()> {
        let mut after: Option<KeysetCursor> = None;
        loop {
            let batch = self
                .store
                .pending(window, after.take(), self.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }

            self.remote.push(&batch).await?;
            report.requests += 1;
            report.pushed += batch.len();

            tracing::debug!(rows = batch.len(), "Pushed batch");

            if batch.len() < self.batch_size {
                break;
            }
            after = batch.last().map(Bookmark::cursor);
        }
        Ok(())
    }
}

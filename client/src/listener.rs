//! Real-time Listener.
//!
//! Applies single-record deltas from the remote's event stream as they
//! arrive. It is a low-latency side channel only: it never touches the
//! watermark, and the pull passes remain the source of truth.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use marksync_engine::{parse_delta, MergeStrategy, Resolution};
use tokio::sync::{mpsc, watch};

use crate::coordinator::{apply_remote, SyncCoordinator};
use crate::error::Result;
use crate::notify::{ChangeSource, Notifier};
use crate::remote::{FrameStream, RemoteService};
use crate::session::Trigger;
use crate::store::LocalStore;

/// First reconnect delay.
pub const RECONNECT_BASE: Duration = Duration::from_secs(1);
/// Longest reconnect delay.
pub const RECONNECT_MAX: Duration = Duration::from_secs(60);

/// Exponential backoff: `min(base * 2^failures, max)`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    /// Delay before the next attempt. Each call doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.failures);
        self.failures = self.failures.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(RECONNECT_BASE, RECONNECT_MAX)
    }
}

/// How one connection's stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The remote closed the stream
    Closed,
    /// The listener was told to stop
    Stopped,
}

/// Consumes the event stream and writes deltas to the Local Store.
pub struct Listener {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteService>,
    notifier: Arc<Notifier>,
    strategy: MergeStrategy,
    backoff: Backoff,
    reconnects: Option<mpsc::UnboundedSender<Trigger>>,
}

impl Listener {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteService>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            store,
            remote,
            notifier,
            strategy: MergeStrategy::RemoteAuthoritative,
            backoff: Backoff::default(),
            reconnects: None,
        }
    }

    /// A listener writing through the same store, remote and strategy as
    /// `coordinator`.
    pub fn for_coordinator(coordinator: &SyncCoordinator) -> Self {
        let mut listener = Self::new(
            coordinator.store().clone(),
            coordinator.remote().clone(),
            coordinator.notifier().clone(),
        );
        listener.strategy = coordinator.strategy();
        listener
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Send [`Trigger::OnReconnect`] on `triggers` after every reconnect.
    pub fn with_reconnect_trigger(mut self, triggers: mpsc::UnboundedSender<Trigger>) -> Self {
        self.reconnects = Some(triggers);
        self
    }

    /// Apply one frame.
    ///
    /// Returns `Ok(None)` for a malformed frame, which is dropped. Store
    /// failures are returned.
    pub async fn handle_frame(&self, text: &str) -> Result<Option<Resolution>> {
        let row = match parse_delta(text) {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed event");
                return Ok(None);
            }
        };

        let resolution = apply_remote(self.store.as_ref(), &row, self.strategy).await?;
        if resolution.is_write() {
            self.notifier.state_changed(ChangeSource::Realtime);
        }

        tracing::debug!(id = %row.id, ?resolution, "Applied real-time delta");

        Ok(Some(resolution))
    }

    /// Apply frames until the stream ends or `stop` fires.
    pub async fn consume(
        &self,
        mut frames: FrameStream,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<StreamEnd> {
        loop {
            let frame = tokio::select! {
                frame = frames.next() => frame,
                _ = stop.changed() => return Ok(StreamEnd::Stopped),
            };

            match frame {
                Some(Ok(text)) => {
                    self.handle_frame(&text).await?;
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(StreamEnd::Closed),
            }
        }
    }

    /// Stay connected until `stop` is set, reconnecting with backoff.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let mut connected_before = false;

        while !*stop.borrow() {
            let attempt = tokio::select! {
                attempt = self.remote.subscribe() => attempt,
                _ = stop.changed() => break,
            };

            match attempt {
                Ok(frames) => {
                    tracing::info!(reconnect = connected_before, "Event stream connected");
                    self.backoff.reset();
                    if connected_before {
                        if let Some(triggers) = &self.reconnects {
                            let _ = triggers.send(Trigger::OnReconnect);
                        }
                    }
                    connected_before = true;

                    match self.consume(frames, &mut stop).await {
                        Ok(StreamEnd::Stopped) => break,
                        Ok(StreamEnd::Closed) => tracing::info!("Event stream closed"),
                        Err(e) => tracing::warn!(error = %e, "Event stream failed"),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, retryable = e.is_retryable(), "Event stream connect failed");
                }
            }

            let delay = self.backoff.next_delay();
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Reconnecting event stream");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.changed() => break,
            }
        }

        tracing::info!("Listener stopped");
    }
}

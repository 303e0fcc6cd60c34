//! Session wiring: explicit triggers, the periodic timer and the listener.
//!
//! Every sync pass is started by a [`Trigger`] sent to the session's
//! trigger loop, which hands it to the coordinator's single-flight
//! [`run`](SyncCoordinator::run).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use marksync_engine::{Bookmark, SEARCH_LIMIT};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::Config;
use crate::coordinator::{PassKind, RunOutcome, SyncCoordinator};
use crate::error::Result;
use crate::listener::{Backoff, Listener, RECONNECT_BASE, RECONNECT_MAX};
use crate::notify::{ChangeSource, Subscription};

/// Why a sync pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A local create, edit or delete was committed
    OnMutation,
    /// The periodic timer fired
    OnTimer,
    /// The event stream came back after a disconnect
    OnReconnect,
    /// Sync was turned on
    OnEnable,
}

impl Trigger {
    /// Pass run for this trigger. Reconnects and enabling catch up with a
    /// pull, since real-time events may have been missed.
    pub fn pass_kind(self) -> PassKind {
        match self {
            Trigger::OnMutation | Trigger::OnTimer => PassKind::Incremental,
            Trigger::OnReconnect | Trigger::OnEnable => PassKind::Bootstrap,
        }
    }
}

/// Timing knobs of a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub sync_interval: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(60),
            reconnect_base: RECONNECT_BASE,
            reconnect_max: RECONNECT_MAX,
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            sync_interval: config.sync_interval,
            ..Self::default()
        }
    }
}

struct AttachedListener {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// A running sync session for one device.
pub struct Session {
    coordinator: Arc<SyncCoordinator>,
    options: SessionOptions,
    triggers: mpsc::UnboundedSender<Trigger>,
    shutdown: watch::Sender<bool>,
    listener: Mutex<Option<AttachedListener>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Start a session: bootstrap if sync is enabled, then attach the
    /// listener and start the timer.
    ///
    /// A failed bootstrap is logged; the next trigger retries it.
    pub async fn start(
        coordinator: Arc<SyncCoordinator>,
        options: SessionOptions,
    ) -> Result<Arc<Self>> {
        let (triggers, trigger_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let session = Arc::new(Self {
            coordinator: coordinator.clone(),
            options,
            triggers,
            shutdown,
            listener: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });

        let enabled = coordinator.store().sync_state().await?.sync_enabled;
        if enabled {
            if let Err(e) = coordinator.run(PassKind::Bootstrap).await {
                tracing::warn!(error = %e, "Initial bootstrap failed");
            }
            session.attach_listener();
        }

        let trigger_loop = tokio::spawn(Self::trigger_loop(
            coordinator,
            trigger_rx,
            session.shutdown.subscribe(),
        ));
        let timer = tokio::spawn(Self::timer_loop(
            session.triggers.clone(),
            session.options.sync_interval,
            session.shutdown.subscribe(),
        ));
        lock(&session.tasks).extend([trigger_loop, timer]);

        tracing::info!(sync_enabled = enabled, "Session started");

        Ok(session)
    }

    /// Runs each trigger in its own task so the coordinator's guard can
    /// coalesce overlapping ones.
    async fn trigger_loop(
        coordinator: Arc<SyncCoordinator>,
        mut triggers: mpsc::UnboundedReceiver<Trigger>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut passes = JoinSet::new();
        loop {
            tokio::select! {
                trigger = triggers.recv() => {
                    let Some(trigger) = trigger else { break };
                    tracing::debug!(?trigger, "Sync triggered");
                    let coordinator = coordinator.clone();
                    passes.spawn(async move {
                        // Failures are logged by the coordinator; the next trigger retries.
                        let _ = coordinator.run(trigger.pass_kind()).await;
                    });
                }
                Some(_) = passes.join_next(), if !passes.is_empty() => {}
                _ = shutdown.changed() => break,
            }
        }
        passes.abort_all();
    }

    async fn timer_loop(
        triggers: mpsc::UnboundedSender<Trigger>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if triggers.send(Trigger::OnTimer).is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Request a sync pass. Returns immediately.
    pub fn trigger(&self, trigger: Trigger) {
        if self.triggers.send(trigger).is_err() {
            tracing::debug!(?trigger, "Session shut down, trigger ignored");
        }
    }

    /// Run a pass now and wait for it.
    pub async fn sync_now(&self, kind: PassKind) -> Result<RunOutcome> {
        self.coordinator.run(kind).await
    }

    /// Register an observer of state changes.
    pub fn subscribe(&self) -> Subscription {
        self.coordinator.notifier().subscribe()
    }

    /// Whether the listener is attached.
    pub fn is_listening(&self) -> bool {
        lock(&self.listener).is_some()
    }

    pub async fn create(&self, title: impl Into<String>, url: impl Into<String>) -> Result<Bookmark> {
        let row = self
            .coordinator
            .store()
            .create(title.into(), url.into())
            .await?;
        self.mutation_committed(&row, "Created bookmark");
        Ok(row)
    }

    pub async fn edit(
        &self,
        id: &str,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> Result<Bookmark> {
        let row = self
            .coordinator
            .store()
            .edit(id, title.into(), url.into())
            .await?;
        self.mutation_committed(&row, "Edited bookmark");
        Ok(row)
    }

    pub async fn delete(&self, id: &str) -> Result<Bookmark> {
        let row = self.coordinator.store().delete(id).await?;
        self.mutation_committed(&row, "Deleted bookmark");
        Ok(row)
    }

    fn mutation_committed(&self, row: &Bookmark, message: &'static str) {
        tracing::info!(id = %row.id, updated_at = %row.updated_at, "{}", message);
        self.coordinator
            .notifier()
            .state_changed(ChangeSource::LocalMutation);
        self.trigger(Trigger::OnMutation);
    }

    /// Active bookmarks whose title matches `query`, newest first.
    pub async fn search(&self, query: &str) -> Result<Vec<Bookmark>> {
        self.coordinator.store().search(query, SEARCH_LIMIT).await
    }

    /// Turn syncing on or off.
    ///
    /// Turning it on catches up with a bootstrap and attaches the listener;
    /// turning it off detaches the listener.
    pub async fn set_sync_enabled(&self, enabled: bool) -> Result<()> {
        self.coordinator.store().set_sync_enabled(enabled).await?;
        tracing::info!(enabled, "Sync switched");

        if enabled {
            self.attach_listener();
            self.trigger(Trigger::OnEnable);
        } else if let Some(listener) = self.detach_listener() {
            let _ = listener.await;
        }
        Ok(())
    }

    fn attach_listener(&self) {
        let mut slot = lock(&self.listener);
        if slot.is_some() {
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        let listener = Listener::for_coordinator(&self.coordinator)
            .with_backoff(Backoff::new(
                self.options.reconnect_base,
                self.options.reconnect_max,
            ))
            .with_reconnect_trigger(self.triggers.clone());
        let task = tokio::spawn(listener.run(stop_rx));

        *slot = Some(AttachedListener { stop, task });
    }

    fn detach_listener(&self) -> Option<JoinHandle<()>> {
        let attached = lock(&self.listener).take()?;
        attached.stop.send_replace(true);
        Some(attached.task)
    }

    /// Stop the timer, the trigger loop and the listener, and wait for them.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let mut tasks: Vec<_> = std::mem::take(&mut *lock(&self.tasks));
        tasks.extend(self.detach_listener());
        for task in tasks {
            let _ = task.await;
        }

        tracing::info!("Session shut down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(attached) = lock(&self.listener).take() {
            attached.stop.send_replace(true);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

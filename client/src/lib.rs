//! # marksync client
//!
//! Per-device sync runtime. Keeps a local bookmark store convergent with
//! the remote sync service through three paths:
//!
//! - **Bootstrap**: pull everything changed since the watermark, then push
//!   local changes made since it
//! - **Incremental sync**: push local changes after every mutation and on
//!   a timer
//! - **Real-time**: apply single-record deltas from the event stream
//!
//! All three write through the same idempotent upsert, so repeated,
//! reordered and interrupted application converges.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use marksync_client::{
//!     Config, HttpRemote, Notifier, Session, SessionOptions, SnapshotStore, SyncCoordinator,
//! };
//! use marksync_engine::SystemClock;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::new("http://localhost:3000");
//! let clock = Arc::new(SystemClock);
//! let store = Arc::new(SnapshotStore::open(&config.state_path, clock.clone()).await?);
//! let remote = Arc::new(HttpRemote::new(&config)?);
//!
//! let coordinator = Arc::new(SyncCoordinator::new(
//!     store,
//!     remote,
//!     Notifier::new_shared(),
//!     clock,
//!     config.batch_size,
//! ));
//! let session = Session::start(coordinator, SessionOptions::from(&config)).await?;
//!
//! session.set_sync_enabled(true).await?;
//! session.create("Rust", "rust-lang.org").await?;
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod listener;
pub mod notify;
pub mod remote;
pub mod session;
pub mod store;

pub use config::{Config, ConfigError};
pub use coordinator::{apply_remote, apply_remote_page, PassKind, PassReport, RunOutcome, SyncCoordinator};
pub use error::{Result, SyncError};
pub use listener::{Backoff, Listener, StreamEnd};
pub use notify::{ChangeSource, Notifier, Subscription, SyncEvent};
pub use remote::{FrameStream, HttpRemote, RemoteService};
pub use session::{Session, SessionOptions, Trigger};
pub use store::{LocalStore, SnapshotStore};

//! # marksync engine
//!
//! The deterministic core of marksync: keeps a per-device copy of a
//! bookmark collection convergent with a remote authoritative store.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine knows nothing about files, network or platform
//! - **Deterministic**: same inputs always produce the same state
//! - **Testable**: pure logic, time comes from a [`Clock`]
//!
//! ## Core Concepts
//!
//! ### Bookmarks
//!
//! A [`Bookmark`] has a client-generated id, a title and url, and three
//! timestamps. `updated_at` moves on every mutation; `deleted_at` marks a
//! tombstone. Rows are never physically removed by sync.
//!
//! ### Conflict Resolution
//!
//! [`resolve`](resolve::resolve) merges whole rows per id. Rows pulled from
//! the remote overwrite local ones ([`MergeStrategy::RemoteAuthoritative`]);
//! the remote applies pushes with [`MergeStrategy::LastWriteWins`], where
//! the larger `updated_at` wins whether it belongs to an edit or a delete.
//!
//! ### Pagination
//!
//! Pushes walk local rows in `(updated_at, id)` order with a
//! [`KeysetCursor`]; pulls thread the server's opaque cursor. Both use
//! [`BATCH_SIZE`] rows per request.
//!
//! ## Quick Start
//!
//! ```rust
//! use marksync_engine::{ManualClock, MergeStrategy, PendingWindow, Store, BATCH_SIZE};
//! use chrono::{TimeZone, Utc};
//!
//! let clock = ManualClock::new(Utc.timestamp_opt(1_706_745_600, 0).unwrap());
//! let mut store = Store::new();
//!
//! // Local mutation
//! let created = store.create("Rust", "rust-lang.org", &clock).unwrap();
//!
//! // Rows waiting to be pushed
//! let window = PendingWindow::after(store.sync_state().last_synced_at);
//! let batch = store.pending(window, None, BATCH_SIZE);
//! assert_eq!(batch, vec![created.clone()]);
//!
//! // Re-applying the same remote row changes nothing
//! store.upsert(&created, MergeStrategy::RemoteAuthoritative);
//! assert_eq!(store.count(), 1);
//! ```
//!
//! ## Persistence
//!
//! Use [`Store::export_state`] and [`Store::import_state`] with
//! [`StoreSnapshot`]. Snapshots carry a schema version; older ones are
//! migrated on import and newer ones are refused.

pub mod bookmark;
pub mod clock;
pub mod error;
pub mod page;
pub mod resolve;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod wire;

// Re-export main types at crate root
pub use bookmark::{new_id, Bookmark};
pub use clock::{epoch, Clock, ManualClock, SystemClock};
pub use error::Error;
pub use page::{KeysetCursor, PendingWindow, BATCH_SIZE};
pub use resolve::{MergeStrategy, Resolution};
pub use schema::CURRENT_SCHEMA_VERSION;
pub use snapshot::{StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{Store, SyncState, SEARCH_LIMIT};
pub use wire::{parse_delta, BootstrapPage, BootstrapQuery, PushRequest, PushResponse};

/// Type aliases for clarity
pub type BookmarkId = String;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
pub type SchemaVersion = u32;

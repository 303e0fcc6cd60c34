//! WebSocket connection manager.
//!
//! Tracks active event-stream connections per owner and fans accepted rows
//! out to them.

use std::sync::Arc;

use dashmap::DashMap;
use marksync_engine::Bookmark;
use tokio::sync::mpsc;

/// Sender for deltas queued to one connection.
pub type DeltaSender = mpsc::UnboundedSender<Bookmark>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Owner key of the authenticated caller
    pub owner: String,
    /// Channel to send deltas to this connection
    pub sender: DeltaSender,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// All active connections, keyed by connection ID.
    connections: DashMap<String, Connection>,
    /// Index of connections by owner.
    by_owner: DashMap<String, Vec<String>>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID.
    pub fn register(&self, owner: String, sender: DeltaSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        let connection = Connection {
            id: conn_id.clone(),
            owner: owner.clone(),
            sender,
        };

        self.connections.insert(conn_id.clone(), connection);
        self.by_owner
            .entry(owner)
            .or_default()
            .push(conn_id.clone());

        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");

        conn_id
    }

    /// Unregister a connection.
    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            if let Some(mut conn_ids) = self.by_owner.get_mut(&conn.owner) {
                conn_ids.retain(|id| id != conn_id);
                if conn_ids.is_empty() {
                    drop(conn_ids);
                    self.by_owner.remove(&conn.owner);
                }
            }

            tracing::info!(conn_id = %conn.id, owner = %conn.owner, "WebSocket connection unregistered");
        }
    }

    /// Queue `rows` on every connection of `owner`.
    ///
    /// Returns the number of connections that received them.
    pub fn broadcast_to_owner(&self, owner: &str, rows: &[Bookmark]) -> usize {
        if rows.is_empty() {
            return 0;
        }

        let conn_ids = match self.by_owner.get(owner) {
            Some(ids) => ids.clone(),
            None => return 0,
        };

        let mut sent_count = 0;
        for conn_id in &conn_ids {
            let Some(conn) = self.connections.get(conn_id) else {
                continue;
            };
            if rows.iter().all(|row| conn.sender.send(row.clone()).is_ok()) {
                sent_count += 1;
            }
        }

        tracing::debug!(
            owner = %owner,
            rows = rows.len(),
            recipients = sent_count,
            "Broadcast deltas to connections"
        );

        sent_count
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get the number of owners with at least one connection.
    pub fn owner_count(&self) -> usize {
        self.by_owner.len()
    }
}

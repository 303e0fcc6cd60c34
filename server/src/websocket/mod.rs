//! WebSocket support for real-time sync.
//!
//! Clients keep one WebSocket open on `GET /events`. Every row accepted by
//! `POST /sync` is pushed to all of its owner's connections as a text frame
//! holding the bookmark's JSON.

mod manager;

pub use manager::ConnectionManager;

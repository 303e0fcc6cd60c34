//! Push handler - applies rows sent by clients.

use std::collections::HashMap;

use crate::db;
use crate::error::{AppError, Result};
use marksync_engine::{Bookmark, PushRequest, PushResponse};
use sqlx::PgPool;

/// Outcome of a push: the counts for the client and the rows to broadcast.
#[derive(Debug, Default)]
pub struct PushOutcome {
    pub response: PushResponse,
    /// Rows that replaced the stored state
    pub written: Vec<Bookmark>,
}

/// Keep one row per id: the one with the largest `updated_at`, the later
/// one on ties. Order of first appearance is preserved.
pub fn dedupe_rows(rows: Vec<Bookmark>) -> Vec<Bookmark> {
    let mut position: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    let mut unique: Vec<Bookmark> = Vec::with_capacity(rows.len());

    for row in rows {
        match position.get(&row.id) {
            Some(&idx) => {
                if row.updated_at >= unique[idx].updated_at {
                    unique[idx] = row;
                }
            }
            None => {
                position.insert(row.id.clone(), unique.len());
                unique.push(row);
            }
        }
    }

    unique
}

/// Apply a push from `owner` in a single transaction.
pub async fn handle_push(pool: &PgPool, owner: &str, request: PushRequest) -> Result<PushOutcome> {
    if request.bookmarks.is_empty() {
        return Ok(PushOutcome::default());
    }

    if request.bookmarks.iter().any(|row| row.id.trim().is_empty()) {
        return Err(AppError::BadRequest("bookmark id is required".to_string()));
    }

    let rows = dedupe_rows(request.bookmarks);

    let mut outcome = PushOutcome::default();
    let mut tx = pool.begin().await?;
    for row in rows {
        if db::upsert_bookmark(&mut *tx, owner, &row).await? {
            outcome.response.accepted += 1;
            outcome.written.push(row);
        } else {
            outcome.response.stale += 1;
        }
    }
    tx.commit().await?;

    tracing::info!(
        owner = %owner,
        accepted = outcome.response.accepted,
        stale = outcome.response.stale,
        "Processed push"
    );

    Ok(outcome)
}

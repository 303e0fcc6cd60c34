//! Bootstrap handler - serves pages of changed rows to clients.

use crate::db;
use crate::error::Result;
use marksync_engine::{BootstrapPage, BootstrapQuery, KeysetCursor};
use sqlx::PgPool;

/// Maximum page size a client may ask for.
pub const MAX_LIMIT: usize = 1000;

/// Clamp a requested page size to `[1, MAX_LIMIT]`.
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_LIMIT)
}

/// Serve one page of `owner`'s rows changed after `query.from`.
pub async fn handle_bootstrap(
    pool: &PgPool,
    owner: &str,
    query: BootstrapQuery,
) -> Result<BootstrapPage> {
    let limit = clamp_limit(query.limit);
    let after = query.cursor().map(KeysetCursor::decode).transpose()?;

    // Fetch one more than requested to check if there are more
    let mut rows = db::fetch_page(pool, owner, query.from, after.as_ref(), limit as i64 + 1).await?;

    let has_more = rows.len() > limit;
    rows.truncate(limit);

    let bookmarks: Vec<_> = rows.into_iter().map(|row| row.into_bookmark()).collect();
    let next_cursor = if has_more {
        bookmarks.last().map(|row| row.cursor().encode())
    } else {
        None
    };

    tracing::debug!(
        owner = %owner,
        returned = bookmarks.len(),
        has_more,
        "Served bootstrap page"
    );

    Ok(BootstrapPage {
        bookmarks,
        next_cursor,
    })
}

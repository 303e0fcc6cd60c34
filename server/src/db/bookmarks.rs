//! Database operations for the bookmarks table.

use chrono::{DateTime, Utc};
use marksync_engine::{Bookmark, KeysetCursor, Timestamp};
use sqlx::{PgExecutor, PgPool, Row};

/// A stored bookmark row from the database.
#[derive(Debug)]
pub struct StoredBookmark {
    pub id: String,
    pub title: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredBookmark {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredBookmark {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            url: row.try_get("url")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

impl StoredBookmark {
    /// Convert a database row to its wire shape.
    pub fn into_bookmark(self) -> Bookmark {
        Bookmark {
            id: self.id,
            title: self.title,
            url: self.url,
            created_at: Some(self.created_at),
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }
}

/// Insert or update a row, last write wins by `updated_at`.
///
/// Ties go to the incoming row. A row owned by someone else is never
/// touched. Returns false when the stored row was kept.
pub async fn upsert_bookmark<'e>(
    executor: impl PgExecutor<'e>,
    owner: &str,
    bookmark: &Bookmark,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO bookmarks (id, owner, title, url, created_at, updated_at, deleted_at)
        VALUES ($1, $2, $3, $4, COALESCE($5, $6), $6, $7)
        ON CONFLICT (id) DO UPDATE SET
            title = EXCLUDED.title,
            url = EXCLUDED.url,
            updated_at = EXCLUDED.updated_at,
            deleted_at = EXCLUDED.deleted_at
        WHERE EXCLUDED.updated_at >= bookmarks.updated_at
          AND bookmarks.owner = EXCLUDED.owner
        "#,
    )
    .bind(&bookmark.id)
    .bind(owner)
    .bind(&bookmark.title)
    .bind(&bookmark.url)
    .bind(bookmark.created_at)
    .bind(bookmark.updated_at)
    .bind(bookmark.deleted_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Rows of `owner` changed after `from`, in `(updated_at, id)` order,
/// strictly after `after` when given.
pub async fn fetch_page(
    pool: &PgPool,
    owner: &str,
    from: Timestamp,
    after: Option<&KeysetCursor>,
    limit: i64,
) -> Result<Vec<StoredBookmark>, sqlx::Error> {
    sqlx::query_as::<_, StoredBookmark>(
        r#"
        SELECT id, title, url, created_at, updated_at, deleted_at
        FROM bookmarks
        WHERE owner = $1
          AND updated_at > $2
          AND ($3::timestamptz IS NULL OR (updated_at, id) > ($3, $4))
        ORDER BY updated_at, id
        LIMIT $5
        "#,
    )
    .bind(owner)
    .bind(from)
    .bind(after.map(|c| c.updated_at))
    .bind(after.map(|c| c.id.as_str()))
    .bind(limit)
    .fetch_all(pool)
    .await
}


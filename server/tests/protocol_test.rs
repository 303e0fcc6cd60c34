//! Wire protocol tests for the sync endpoints.
//!
//! These check the JSON shapes exchanged with clients and do not need a
//! database.

use chrono::{TimeZone, Utc};
use marksync_engine::{
    parse_delta, Bookmark, BootstrapPage, BootstrapQuery, KeysetCursor, PushRequest,
    PushResponse, BATCH_SIZE,
};
use serde_json::json;

fn test_bookmark(id: &str, secs: i64) -> Bookmark {
    Bookmark::new(
        id,
        "Rust",
        "https://www.rust-lang.org",
        Utc.timestamp_opt(secs, 0).single().unwrap(),
    )
}

#[cfg(test)]
mod bootstrap_tests {
    use super::*;

    #[test]
    fn test_query_defaults() {
        let query: BootstrapQuery = serde_json::from_value(json!({})).unwrap();
        assert_eq!(query.cursor(), None);
        assert_eq!(query.limit, BATCH_SIZE);
    }

    #[test]
    fn test_query_with_cursor() {
        let query: BootstrapQuery = serde_json::from_value(json!({
            "cursor": "2024-02-01T00:00:00Z|X1",
            "limit": 100,
            "from": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        let cursor = KeysetCursor::decode(query.cursor().unwrap()).unwrap();
        assert_eq!(cursor.id, "X1");
        assert_eq!(query.limit, 100);
        assert!(query.from < cursor.updated_at);
    }

    #[test]
    fn test_page_serialization() {
        let row = test_bookmark("X1", 1000);
        let page = BootstrapPage {
            next_cursor: Some(row.cursor().encode()),
            bookmarks: vec![row],
        };

        let value = serde_json::to_value(&page).unwrap();
        assert_eq!(value["bookmarks"][0]["id"], "X1");
        assert_eq!(value["bookmarks"][0]["deleted_at"], serde_json::Value::Null);
        assert!(value["next_cursor"].as_str().unwrap().ends_with("|X1"));
    }

    #[test]
    fn test_last_page_has_null_cursor() {
        let page = BootstrapPage {
            bookmarks: vec![],
            next_cursor: None,
        };
        let value = serde_json::to_value(&page).unwrap();
        assert!(value["next_cursor"].is_null());
    }

    #[test]
    fn test_cursor_round_trips_through_text() {
        let row = test_bookmark("01J0-abc", 1706745600);
        let decoded = KeysetCursor::decode(&row.cursor().encode()).unwrap();
        assert_eq!(decoded, row.cursor());
    }
}

#[cfg(test)]
mod push_tests {
    use super::*;

    #[test]
    fn test_push_request_deserialization() {
        let request: PushRequest = serde_json::from_value(json!({
            "bookmarks": [{
                "id": "X1",
                "title": "Rust",
                "url": "https://www.rust-lang.org",
                "updated_at": "2024-02-01T00:00:00.000Z",
                "deleted_at": null
            }]
        }))
        .unwrap();

        assert_eq!(request.bookmarks.len(), 1);
        assert_eq!(request.bookmarks[0].created_at, None);
        assert!(request.bookmarks[0].is_active());
    }

    #[test]
    fn test_push_response_serialization() {
        let response = PushResponse {
            accepted: 2,
            stale: 1,
        };
        let value = serde_json::to_value(response).unwrap();
        assert_eq!(value, json!({"accepted": 2, "stale": 1}));
    }

    #[test]
    fn test_tombstone_is_pushed_with_fields() {
        let mut row = test_bookmark("X1", 1000);
        row.tombstone(Utc.timestamp_opt(2000, 0).single().unwrap());

        let value = serde_json::to_value(PushRequest {
            bookmarks: vec![row],
        })
        .unwrap();
        let pushed = &value["bookmarks"][0];
        assert_eq!(pushed["title"], "Rust");
        assert!(pushed["deleted_at"].is_string());
        assert_eq!(pushed["deleted_at"], pushed["updated_at"]);
    }
}

#[cfg(test)]
mod event_tests {
    use super::*;

    #[test]
    fn test_outbound_delta_is_parsed_by_clients() {
        let row = test_bookmark("X1", 1000);
        let text = serde_json::to_string(&row).unwrap();
        assert_eq!(parse_delta(&text).unwrap(), row);
    }

    #[test]
    fn test_malformed_delta_rejected() {
        assert!(parse_delta("not json").is_err());
        assert!(parse_delta(r#"{"id": "X1"}"#).is_err());
    }
}

//! Sync endpoint routes.

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use marksync_engine::{BootstrapPage, BootstrapQuery, PushRequest, PushResponse};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_bootstrap, handle_event_stream, handle_push};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/bootstrap", get(bootstrap_handler))
        .route("/sync", post(push_handler))
        .route("/events", get(events_handler))
}

/// GET /bootstrap - Pull a page of changed rows.
async fn bootstrap_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<BootstrapQuery>,
) -> Result<Json<BootstrapPage>> {
    let page = handle_bootstrap(&state.pool, &auth.owner, query).await?;
    Ok(Json(page))
}

/// POST /sync - Push rows to the server, then fan them out.
async fn push_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    let outcome = handle_push(&state.pool, &auth.owner, request).await?;
    state
        .conn_manager
        .broadcast_to_owner(&auth.owner, &outcome.written);
    Ok(Json(outcome.response))
}

/// GET /events - Upgrade to the real-time event stream.
async fn events_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    let conn_manager = state.conn_manager.clone();
    ws.on_upgrade(move |socket| handle_event_stream(socket, conn_manager, auth.owner))
}

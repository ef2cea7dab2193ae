//! Sync API endpoints
//!
//! - `POST /api/sync?compress=` accepts a batch of change entries
//! - `GET /api/sync?user=&timestamp=&limit=&page=&compress=` returns entries

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::sync::{
    compress_flag, MessageResponse, PullQuery, PullResponse, PushQuery, PushRequest,
};

/// Create the sync router
pub fn router() -> Router<AppState> {
    Router::new().route("/api/sync", get(pull_changes).post(push_changes))
}

/// Push local changes to the server
async fn push_changes(
    State(state): State<AppState>,
    Query(query): Query<PushQuery>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<MessageResponse>> {
    // An unreadable body has no changes list either
    let request = match body {
        Ok(Json(value)) => match value.get("changes") {
            None | Some(Value::Null) => PushRequest::default(),
            Some(changes) => PushRequest {
                changes: Some(
                    serde_json::from_value(changes.clone())
                        .map_err(|e| AppError::InvalidInput(format!("invalid changes: {}", e)))?,
                ),
            },
        },
        Err(rejection) => {
            tracing::debug!("Rejected push body: {}", rejection);
            PushRequest::default()
        }
    };

    state
        .sync()
        .push(request, compress_flag(query.compress.as_deref()))
        .await?;

    Ok(Json(MessageResponse::success()))
}

/// Pull changes from the server
async fn pull_changes(
    State(state): State<AppState>,
    query: std::result::Result<Query<PullQuery>, QueryRejection>,
) -> Result<Json<PullResponse>> {
    let Query(query) = query.map_err(|e| AppError::InvalidInput(e.body_text()))?;

    let response = state.sync().pull(query).await?;
    Ok(Json(response))
}

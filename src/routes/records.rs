//! Record API routes
//!
//! Mutations made here go through change capture, so they show up in the
//! change log for other clients to pull.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::records::Record;
use crate::state::AppState;

/// Create the records router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/records/:table", post(create_record))
        .route(
            "/api/records/:table/:id",
            get(get_record).patch(update_record).delete(delete_record),
        )
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub hlc: Option<String>,
}

/// Create a record
async fn create_record(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(body): Json<Map<String, Value>>,
) -> Result<(StatusCode, Json<Record>)> {
    let record = state.records().create(&table, body).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Get a record
async fn get_record(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
) -> Result<Json<Record>> {
    let record = state.records().get(&table, &id).await?;
    Ok(Json(record))
}

/// Update fields of a record
async fn update_record(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    Json(patch): Json<Map<String, Value>>,
) -> Result<Json<Record>> {
    let record = state.records().update(&table, &id, patch).await?;
    Ok(Json(record))
}

/// Delete a record
async fn delete_record(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode> {
    state
        .records()
        .delete(&table, &id, query.hlc.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

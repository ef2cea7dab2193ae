//! LWW Sync Server
//!
//! An offline-first synchronization server. Clients record every mutation
//! as column-level change entries stamped with a Hybrid Logical Clock,
//! push them to the server and pull the entries of other clients. Each
//! column resolves independently by last-write-wins, so replicas converge
//! regardless of delivery order or duplication.
//!
//! # Modules
//!
//! - `hlc`: Hybrid Logical Clock timestamps
//! - `sync`: change entries, capture, change log, merge and push/pull
//! - `records`: schema-less record store with change capture
//! - `routes`: HTTP endpoints

pub mod config;
pub mod db;
pub mod error;
pub mod hlc;
pub mod records;
pub mod routes;
pub mod state;
pub mod sync;

#[cfg(test)]
mod testing;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the HTTP application
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::router())
        .merge(routes::sync::router())
        .merge(routes::records::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

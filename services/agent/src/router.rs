//! Axum Router Configuration
//!
//! Routes for the room relay: the client WebSocket and a liveness probe.

use crate::relay::{RelayState, ws_handler};
use axum::{Json, Router, extract::State, routing::get};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Creates the relay's router.
pub fn create_router(state: Arc<RelayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
        .layer(cors)
}

async fn health(State(state): State<Arc<RelayState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "room": state.room(),
        "participants": state.participants().len(),
    }))
}

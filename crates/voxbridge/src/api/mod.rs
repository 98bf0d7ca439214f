//! HTTP surface: router, shared state, health, static UI assets.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::history::HistoryStore;
use crate::session::SessionManager;
use crate::ws::handler::ws_handler;
use crate::ws::hub::WsHub;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionManager>,
    pub history: Arc<HistoryStore>,
    pub hub: Arc<WsHub>,
}

/// Build the full router: websocket, health, static UI.
pub fn router(state: AppState, config: &AppConfig) -> Router {
    let static_dir = config.ui.resolve_static_dir();
    let index = static_dir.join("index.html");

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/health", get(health))
        .fallback_service(ServeDir::new(&static_dir).fallback(ServeFile::new(index)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /api/health
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "session": state.session.state().await.to_string(),
        "connections": state.hub.connection_count(),
    }))
}

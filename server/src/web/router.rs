use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::services::ServeDir;

use super::app_state::AppState;
use super::ws_handler;

/// Build the axum router: the chat WebSocket plus the static client files.
pub fn build_router(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.static_dir);

    Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .fallback_service(static_files)
        .with_state(state)
}

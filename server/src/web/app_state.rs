use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::engine::chat_engine::ChatEngine;

/// Shared state handed to every axum handler.
pub struct AppState {
    pub engine: Arc<ChatEngine>,
    /// Root of the static client files.
    pub static_dir: PathBuf,
    /// Cancelled on shutdown. Upgraded sockets outlive axum's graceful
    /// shutdown, so each one watches this token to run its disconnect.
    pub shutdown: CancellationToken,
}

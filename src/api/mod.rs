pub mod board;
pub mod error;
pub mod health;

pub use error::{internal_error, ErrorResponse};

use std::sync::Arc;

use axum::Router;
use tokio::sync::RwLock;

use crate::board::BoardQuery;
use crate::store::RecordStore;
use crate::sync::SyncStatus;

pub fn router(
    board: Arc<BoardQuery>,
    store: Arc<dyn RecordStore>,
    sync_status: Arc<RwLock<SyncStatus>>,
    categories: Vec<String>,
) -> Router {
    Router::new()
        .nest("/transit", board::router(board))
        .nest("/health", health::router(store, sync_status, categories))
}

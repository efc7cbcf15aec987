use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;
use utoipa::ToSchema;

use crate::store::RecordStore;
use crate::sync::SyncStatus;

#[derive(Clone)]
pub struct HealthState {
    pub store: Arc<dyn RecordStore>,
    pub sync_status: Arc<RwLock<SyncStatus>>,
    /// Distinct category tags to count tracked legs across
    pub categories: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Whether the service is running
    pub healthy: bool,
    /// Number of legs currently tracked across all board categories
    pub tracked_legs: usize,
    /// Per-source sync loop status
    pub sync: SyncStatus,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    let mut tracked_legs = 0usize;
    for category in &state.categories {
        match state.store.find_by_tag(category).await {
            Ok(records) => tracked_legs += records.len(),
            Err(e) => warn!(category = %category, error = %e, "Failed to count tracked legs"),
        }
    }
    let sync = state.sync_status.read().await.clone();

    Json(HealthResponse {
        healthy: true,
        tracked_legs,
        sync,
    })
}

pub fn router(
    store: Arc<dyn RecordStore>,
    sync_status: Arc<RwLock<SyncStatus>>,
    categories: Vec<String>,
) -> Router {
    let state = HealthState {
        store,
        sync_status,
        categories,
    };
    Router::new()
        .route("/", get(health_check))
        .with_state(state)
}

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::api::{internal_error, ErrorResponse};
use crate::board::{BoardQuery, BoardSnapshot};
use crate::models::TransitMode;

#[derive(Clone)]
pub struct BoardApiState {
    pub board: Arc<BoardQuery>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct BoardParams {
    /// Restrict the board to one transport mode
    /// (flight, train, tram, bus or metro)
    pub mode: Option<String>,
}

/// Current departure board, ordered by effective departure time
#[utoipa::path(
    get,
    path = "/transit/board",
    params(BoardParams),
    responses(
        (status = 200, description = "Ordered departure board", body = BoardSnapshot),
        (status = 400, description = "Unknown mode value", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "board"
)]
pub async fn get_board(
    State(state): State<BoardApiState>,
    Query(params): Query<BoardParams>,
) -> Result<Json<BoardSnapshot>, (StatusCode, Json<ErrorResponse>)> {
    let mode = match params.mode.as_deref() {
        Some(raw) => match TransitMode::from_param(raw) {
            Some(mode) => Some(mode),
            None => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: format!("Unknown mode: {raw}"),
                    }),
                ));
            }
        },
        None => None,
    };

    let departures = state
        .board
        .query(mode, Utc::now())
        .await
        .map_err(internal_error)?;
    Ok(Json(BoardSnapshot { departures }))
}

pub fn router(board: Arc<BoardQuery>) -> Router {
    let state = BoardApiState { board };
    Router::new()
        .route("/board", get(get_board))
        .with_state(state)
}

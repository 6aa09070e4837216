//! /sessions: uploads still waiting for chunks.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use parcel_core::SessionProgress;

use super::{internal, ApiState};

pub async fn handle_sessions(
    State(state): State<ApiState>,
) -> Result<Json<Vec<SessionProgress>>, (StatusCode, String)> {
    Ok(Json(state.store.open_sessions().await.map_err(internal)?))
}

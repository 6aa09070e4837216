//! /files listing and /uploads/{*name} downloads.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use parcel_core::{ArtifactInfo, FileIdentifier};

use super::{internal, ApiState};

pub async fn handle_files(
    State(state): State<ApiState>,
) -> Result<Json<Vec<ArtifactInfo>>, (StatusCode, String)> {
    let files = state.store.list_files().await.map_err(internal)?;
    Ok(Json(files))
}

pub async fn handle_download(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Response, (StatusCode, String)> {
    let not_found = || (StatusCode::NOT_FOUND, format!("no such file: {name}"));

    let id = FileIdentifier::parse(&name).map_err(|_| not_found())?;
    let data = state
        .store
        .read_artifact(&id)
        .await
        .map_err(internal)?
        .ok_or_else(not_found)?;

    let mime = mime_guess::from_path(id.file_name()).first_or_octet_stream();
    Ok(([(header::CONTENT_TYPE, mime.to_string())], data).into_response())
}

//! /upload-chunk: accept one chunk of one upload.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;

use parcel_core::protocol::{
    FIELD_CHUNK, FIELD_CHUNK_INDEX, FIELD_FILENAME_ALIAS, FIELD_FILE_IDENTIFIER, FIELD_TOTAL_CHUNKS,
};
use parcel_core::{ChunkResponse, FileIdentifier, ProtocolViolation};

use super::{bad_request, store_error, ApiState, UploadError};

#[derive(Default)]
struct ChunkForm {
    payload: Option<Bytes>,
    file_identifier: Option<String>,
    filename: Option<String>,
    chunk_index: Option<String>,
    total_chunks: Option<String>,
}

fn parse_count(field: &'static str, raw: Option<String>) -> Result<u32, ProtocolViolation> {
    let raw = raw.ok_or(ProtocolViolation::MissingField(field))?;
    raw.trim()
        .parse::<u32>()
        .map_err(|e| ProtocolViolation::InvalidField {
            field,
            reason: format!("{raw:?}: {e}"),
        })
}

pub async fn handle_upload_chunk(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ChunkResponse>), UploadError> {
    let mut form = ChunkForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        if field_name == FIELD_CHUNK {
            let data = field.bytes().await.map_err(|e| bad_request(e.to_string()))?;
            if data.len() > state.max_chunk_bytes {
                return Err(bad_request(
                    ProtocolViolation::ChunkTooLarge {
                        len: data.len(),
                        max: state.max_chunk_bytes,
                    }
                    .to_string(),
                ));
            }
            form.payload = Some(data);
            continue;
        }

        let slot = match field_name.as_str() {
            FIELD_FILE_IDENTIFIER => &mut form.file_identifier,
            FIELD_FILENAME_ALIAS => &mut form.filename,
            FIELD_CHUNK_INDEX => &mut form.chunk_index,
            FIELD_TOTAL_CHUNKS => &mut form.total_chunks,
            _ => {
                tracing::debug!(field = field_name, "ignoring unknown multipart field");
                continue;
            }
        };
        *slot = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?);
    }

    let payload = form
        .payload
        .ok_or_else(|| bad_request(ProtocolViolation::MissingField(FIELD_CHUNK).to_string()))?;
    let raw_id = form
        .file_identifier
        .or(form.filename)
        .ok_or_else(|| bad_request(ProtocolViolation::MissingField(FIELD_FILE_IDENTIFIER).to_string()))?;
    let file_id = FileIdentifier::parse(&raw_id).map_err(|e| bad_request(e.to_string()))?;
    let chunk_index =
        parse_count(FIELD_CHUNK_INDEX, form.chunk_index).map_err(|e| bad_request(e.to_string()))?;
    let total_chunks =
        parse_count(FIELD_TOTAL_CHUNKS, form.total_chunks).map_err(|e| bad_request(e.to_string()))?;

    let receipt = state
        .store
        .store_chunk(&file_id, chunk_index, total_chunks, payload)
        .await
        .map_err(store_error)?;

    Ok((StatusCode::OK, Json(ChunkResponse::from(&receipt))))
}

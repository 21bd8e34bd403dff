//! Stream session endpoints
//!
//! Broadcasters mint sessions here; the returned stream key is shown once
//! and never again. Details lookups expose the live viewer count but not
//! the key.

use actix_web::{web, HttpResponse};
use tracing::error;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::services::streaming::{
    CreateStreamRequest, CreateStreamResponse, StreamDetails,
};
use crate::AppState;

pub async fn create_stream(
    state: web::Data<AppState>,
    payload: web::Json<CreateStreamRequest>,
) -> Result<HttpResponse, AppError> {
    payload.validate().map_err(AppError::from)?;

    let stream = state
        .sessions
        .create_session(&payload.streamer_address, payload.category.as_deref())
        .await
        .map_err(|e| {
            error!(error = ?e, "Failed to create stream session");
            AppError::Internal(e.to_string())
        })?;

    Ok(HttpResponse::Created().json(CreateStreamResponse {
        stream_id: stream.id,
        stream_key: stream.stream_key,
        status: stream.status,
        created_at: stream.created_at,
    }))
}

pub async fn get_stream(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let stream_id = path.into_inner();
    let stream = state
        .repo
        .find_by_id(stream_id)
        .await
        .map_err(|e| {
            error!(%stream_id, error = ?e, "Failed to fetch stream");
            AppError::Internal(e.to_string())
        })?
        .ok_or_else(|| AppError::NotFound(format!("Stream {stream_id} not found")))?;

    Ok(HttpResponse::Ok().json(StreamDetails::from(stream)))
}

//! SRS webhook endpoint
//!
//! One route for all callback actions. Protocol-level problems come back
//! as `{code: 1}` with HTTP 200; only storage faults become HTTP 500.

use actix_web::{web, HttpResponse};
use tracing::error;

use crate::error::AppError;
use crate::services::streaming::WebhookRequest;
use crate::AppState;

pub async fn srs_webhook(
    state: web::Data<AppState>,
    payload: web::Json<WebhookRequest>,
) -> Result<HttpResponse, AppError> {
    let response = state.ingestor.handle(&payload).await.map_err(|e| {
        error!(action = %payload.action, error = ?e, "Webhook processing failed");
        AppError::Internal(e.to_string())
    })?;

    Ok(HttpResponse::Ok().json(response))
}

//! Reward maintenance endpoints
//!
//! Settlement is normally triggered by the unpublish transition; this API
//! exists for operators: manual distribution and ledger-entry visibility.
//! Reward failures are invisible to end users by design, so entry status
//! is the only window into them.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::services::settlement::SettlementResult;
use crate::services::streaming::SessionSnapshot;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct DistributeRewardRequest {
    #[validate(length(min = 1, max = 128))]
    pub streamer_address: String,

    #[validate(range(min = 0))]
    pub duration_in_minutes: i64,

    // Bounded to i32 so the ledger-entry cast below cannot wrap.
    #[validate(range(min = 0, max = 2147483647))]
    pub viewers: i64,

    #[validate(length(min = 1, max = 50))]
    pub category: String,
}

#[derive(Debug, Serialize)]
pub struct DistributeRewardResponse {
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

pub async fn distribute(
    state: web::Data<AppState>,
    payload: web::Json<DistributeRewardRequest>,
) -> Result<HttpResponse, AppError> {
    payload.validate().map_err(AppError::from)?;

    // Manual distributions get a synthetic session identity so they flow
    // through the same idempotent settlement path.
    let stream_id = Uuid::new_v4();
    let snapshot = SessionSnapshot {
        stream_id,
        idempotency_key: format!("manual:{stream_id}"),
        streamer_address: payload.streamer_address.clone(),
        duration_minutes: payload.duration_in_minutes,
        viewer_count: payload.viewers as i32,
        category: Some(payload.category.clone()),
    };

    let result = state.dispatcher.settle(snapshot).await.map_err(|e| {
        error!(error = ?e, "Manual reward distribution failed");
        AppError::Internal(e.to_string())
    })?;

    let response = match result {
        SettlementResult::Confirmed { tx_reference } => DistributeRewardResponse {
            msg: "Rewards distributed successfully".to_string(),
            tx_hash: Some(tx_reference),
        },
        SettlementResult::Pending { tx_reference } => DistributeRewardResponse {
            msg: "Reward submission pending".to_string(),
            tx_hash: tx_reference,
        },
        SettlementResult::Failed { reason } => {
            return Err(AppError::Internal(reason));
        }
        SettlementResult::Skipped => DistributeRewardResponse {
            msg: "Settlement already in progress".to_string(),
            tx_hash: None,
        },
    };

    Ok(HttpResponse::Ok().json(response))
}

pub async fn get_reward(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let idempotency_key = path.into_inner();
    let entry = state
        .repo
        .get_ledger_entry(&idempotency_key)
        .await
        .map_err(|e| {
            error!(%idempotency_key, error = ?e, "Failed to fetch ledger entry");
            AppError::Internal(e.to_string())
        })?
        .ok_or_else(|| {
            AppError::NotFound(format!("Ledger entry {idempotency_key} not found"))
        })?;

    Ok(HttpResponse::Ok().json(entry))
}

//! External ledger client capability
//!
//! The dispatcher talks to the reward contract through this trait so the
//! backend can be swapped (or stubbed in tests) without touching the
//! settlement logic. The production implementation calls an HTTP gateway
//! that fronts the chain node.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Faults from the ledger, split by retry semantics.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("ledger request timed out")]
    Timeout,

    /// The ledger rejected the submission outright (invalid parameters,
    /// reverted transaction). Retrying will not help.
    #[error("ledger rejected submission: {0}")]
    Rejected(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}

/// Handle for a submitted, not-yet-final transaction.
#[derive(Debug, Clone)]
pub struct TxHandle {
    pub tx_hash: String,
}

/// Finality report for a submitted transaction.
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub confirmed: bool,
    pub reference: String,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a reward distribution to the contract.
    async fn submit_reward(
        &self,
        streamer_address: &str,
        duration_minutes: i64,
        viewers: i64,
        category: &str,
    ) -> Result<TxHandle, LedgerError>;

    /// Wait for the ledger to report finality for a submitted transaction.
    async fn await_confirmation(&self, handle: &TxHandle) -> Result<Confirmation, LedgerError>;
}

#[derive(Debug, Serialize)]
struct SubmitRewardBody<'a> {
    streamer_address: &'a str,
    duration_in_minutes: i64,
    viewers: i64,
    category: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitRewardReply {
    tx_hash: String,
}

#[derive(Debug, Deserialize)]
struct ConfirmationReply {
    confirmed: bool,
    #[serde(default)]
    block_hash: Option<String>,
}

/// Ledger client speaking JSON to the contract gateway.
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLedgerClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn map_send_error(err: reqwest::Error) -> LedgerError {
        if err.is_timeout() {
            LedgerError::Timeout
        } else {
            LedgerError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn submit_reward(
        &self,
        streamer_address: &str,
        duration_minutes: i64,
        viewers: i64,
        category: &str,
    ) -> Result<TxHandle, LedgerError> {
        let url = format!("{}/rewards/distribute", self.base_url);
        let body = SubmitRewardBody {
            streamer_address,
            duration_in_minutes: duration_minutes,
            viewers,
            category,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected(format!("{status}: {detail}")));
        }
        if !status.is_success() {
            return Err(LedgerError::Transport(format!(
                "gateway returned {status}"
            )));
        }

        let reply: SubmitRewardReply = response
            .json()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        info!(tx_hash = %reply.tx_hash, %streamer_address, "Reward submitted to ledger gateway");
        Ok(TxHandle {
            tx_hash: reply.tx_hash,
        })
    }

    async fn await_confirmation(&self, handle: &TxHandle) -> Result<Confirmation, LedgerError> {
        let url = format!("{}/transactions/{}", self.base_url, handle.tx_hash);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected(format!("{status}: {detail}")));
        }
        if !status.is_success() {
            return Err(LedgerError::Transport(format!(
                "gateway returned {status}"
            )));
        }

        let reply: ConfirmationReply = response
            .json()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        Ok(Confirmation {
            confirmed: reply.confirmed,
            reference: reply.block_hash.unwrap_or_else(|| handle.tx_hash.clone()),
        })
    }
}

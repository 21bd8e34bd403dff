//! Settlement dispatcher
//!
//! Turns a terminal session snapshot into exactly one ledger entry and at
//! most one external submission, no matter how many times the trigger is
//! delivered. Idempotency is layered: an in-process single-flight guard
//! per idempotency key, plus the first-writer-wins ledger insert at the
//! repository. Submission runs detached from the webhook path; the
//! response never waits on the chain.

use super::calculator::{reward, RewardConfig};
use super::ledger::{LedgerClient, LedgerError, TxHandle};
use crate::metrics;
use crate::services::streaming::models::{
    LedgerEntryStatus, RewardLedgerEntry, SessionSnapshot,
};
use crate::services::streaming::repository::StreamRepository;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

/// Retry and confirmation tuning. The bounds matter more than the exact
/// numbers; all of it is overridable from the environment.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub confirmation_timeout: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            confirmation_timeout: Duration::from_secs(15),
        }
    }
}

/// Where one settlement run left the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementResult {
    /// Ledger reported finality; entry is immutable now
    Confirmed { tx_reference: String },
    /// Submitted or retry budget spent; a reconcile pass picks it up
    Pending { tx_reference: Option<String> },
    /// Fatally rejected; needs operator remediation
    Failed { reason: String },
    /// Another trigger already owns or finished this key
    Skipped,
}

pub struct SettlementDispatcher {
    repo: Arc<dyn StreamRepository>,
    ledger: Arc<dyn LedgerClient>,
    rewards: RewardConfig,
    config: SettlementConfig,
    in_flight: Mutex<HashSet<String>>,
}

impl SettlementDispatcher {
    pub fn new(
        repo: Arc<dyn StreamRepository>,
        ledger: Arc<dyn LedgerClient>,
        rewards: RewardConfig,
        config: SettlementConfig,
    ) -> Self {
        Self {
            repo,
            ledger,
            rewards,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Worker loop consuming session-end snapshots. Each settlement runs
    /// on its own task so one slow ledger round-trip never backs up the
    /// queue.
    pub fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<SessionSnapshot>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                let dispatcher = Arc::clone(&self);
                tokio::spawn(async move {
                    let key = snapshot.idempotency_key.clone();
                    if let Err(e) = dispatcher.settle(snapshot).await {
                        error!(idempotency_key = %key, error = ?e, "Settlement run failed");
                    }
                });
            }
        })
    }

    /// Settle one session. Safe to call any number of times with the same
    /// snapshot: exactly one entry and at most one submission result.
    pub async fn settle(&self, snapshot: SessionSnapshot) -> Result<SettlementResult> {
        let key = snapshot.idempotency_key.clone();
        if !self.begin(&key).await {
            metrics::observe_settlement("skipped");
            return Ok(SettlementResult::Skipped);
        }
        let result = self.settle_inner(&snapshot).await;
        self.finish(&key).await;
        result
    }

    /// Sweep Pending entries left behind by timeouts, exhausted retry
    /// budgets, or a crash between insert and submit. Returns how many
    /// reached Confirmed.
    pub async fn reconcile_pending(&self) -> Result<usize> {
        let entries = self
            .repo
            .list_ledger_entries(LedgerEntryStatus::Pending)
            .await?;
        let mut confirmed = 0;
        for entry in entries {
            let key = entry.idempotency_key.clone();
            if !self.begin(&key).await {
                continue;
            }
            let result = self.resume(entry).await;
            self.finish(&key).await;
            match result {
                Ok(SettlementResult::Confirmed { .. }) => confirmed += 1,
                Ok(_) => {}
                Err(e) => error!(idempotency_key = %key, error = ?e, "Reconcile failed"),
            }
        }
        Ok(confirmed)
    }

    async fn begin(&self, key: &str) -> bool {
        self.in_flight.lock().await.insert(key.to_string())
    }

    async fn finish(&self, key: &str) {
        self.in_flight.lock().await.remove(key);
    }

    async fn settle_inner(&self, snapshot: &SessionSnapshot) -> Result<SettlementResult> {
        let key = &snapshot.idempotency_key;

        if let Some(existing) = self.repo.get_ledger_entry(key).await? {
            match existing.status {
                // A non-Failed entry means a prior trigger already owns
                // this session; take no new action.
                LedgerEntryStatus::Confirmed | LedgerEntryStatus::Pending => {
                    metrics::observe_settlement("skipped");
                    return Ok(SettlementResult::Skipped);
                }
                LedgerEntryStatus::Failed => {
                    info!(idempotency_key = %key, "Retrying previously failed settlement");
                    self.repo
                        .update_ledger_entry(key, LedgerEntryStatus::Pending, None, existing.attempts)
                        .await?;
                    return self.submit_and_confirm(snapshot, existing.attempts).await;
                }
            }
        }

        let amount = reward(
            snapshot.duration_minutes,
            snapshot.viewer_count as i64,
            snapshot.category.as_deref(),
            &self.rewards,
        );
        let entry = RewardLedgerEntry::pending(snapshot, amount);
        if self.repo.insert_ledger_entry(&entry).await?.is_none() {
            // Lost the insert race to another process.
            metrics::observe_settlement("skipped");
            return Ok(SettlementResult::Skipped);
        }
        info!(
            idempotency_key = %key,
            amount,
            duration_minutes = snapshot.duration_minutes,
            viewer_count = snapshot.viewer_count,
            "Reward ledger entry created"
        );

        self.submit_and_confirm(snapshot, 0).await
    }

    /// Continue an existing entry: with a transaction reference the
    /// submission already happened and only confirmation is outstanding;
    /// without one it is safe to submit.
    async fn resume(&self, entry: RewardLedgerEntry) -> Result<SettlementResult> {
        match entry.tx_reference.clone() {
            Some(tx_hash) => {
                self.confirm(&entry.idempotency_key, TxHandle { tx_hash }, entry.attempts)
                    .await
            }
            None => self.submit_and_confirm(&entry.snapshot(), entry.attempts).await,
        }
    }

    async fn submit_and_confirm(
        &self,
        snapshot: &SessionSnapshot,
        prior_attempts: i32,
    ) -> Result<SettlementResult> {
        let key = &snapshot.idempotency_key;
        let category = snapshot.category.as_deref().unwrap_or("Uncategorized");
        let mut attempts = prior_attempts;
        let mut backoff = self.config.initial_backoff;

        loop {
            attempts += 1;
            let submitted = self
                .ledger
                .submit_reward(
                    &snapshot.streamer_address,
                    snapshot.duration_minutes,
                    snapshot.viewer_count as i64,
                    category,
                )
                .await;

            match submitted {
                Ok(handle) => {
                    self.repo
                        .update_ledger_entry(
                            key,
                            LedgerEntryStatus::Pending,
                            Some(&handle.tx_hash),
                            attempts,
                        )
                        .await?;
                    return self.confirm(key, handle, attempts).await;
                }
                Err(e) if e.is_retryable() && attempts < prior_attempts + self.config.max_attempts as i32 => {
                    warn!(
                        idempotency_key = %key,
                        attempt = attempts,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Retryable ledger fault, backing off"
                    );
                    self.repo
                        .update_ledger_entry(key, LedgerEntryStatus::Pending, None, attempts)
                        .await?;
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff, &self.config);
                }
                Err(e) if e.is_retryable() => {
                    // Budget spent; leave the entry Pending for the
                    // reconcile pass rather than dropping it.
                    warn!(
                        idempotency_key = %key,
                        attempt = attempts,
                        error = %e,
                        "Retry budget exhausted, leaving entry pending"
                    );
                    self.repo
                        .update_ledger_entry(key, LedgerEntryStatus::Pending, None, attempts)
                        .await?;
                    metrics::observe_settlement("pending");
                    return Ok(SettlementResult::Pending { tx_reference: None });
                }
                Err(e) => {
                    error!(
                        idempotency_key = %key,
                        attempt = attempts,
                        error = %e,
                        "Ledger rejected settlement, marking failed"
                    );
                    self.repo
                        .update_ledger_entry(key, LedgerEntryStatus::Failed, None, attempts)
                        .await?;
                    metrics::observe_settlement("failed");
                    return Ok(SettlementResult::Failed {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn confirm(
        &self,
        key: &str,
        handle: TxHandle,
        attempts: i32,
    ) -> Result<SettlementResult> {
        let awaited = tokio::time::timeout(
            self.config.confirmation_timeout,
            self.ledger.await_confirmation(&handle),
        )
        .await;

        match awaited {
            Ok(Ok(confirmation)) if confirmation.confirmed => {
                self.repo
                    .update_ledger_entry(
                        key,
                        LedgerEntryStatus::Confirmed,
                        Some(&confirmation.reference),
                        attempts,
                    )
                    .await?;
                info!(
                    idempotency_key = %key,
                    tx_reference = %confirmation.reference,
                    "Settlement confirmed"
                );
                metrics::observe_settlement("confirmed");
                Ok(SettlementResult::Confirmed {
                    tx_reference: confirmation.reference,
                })
            }
            Ok(Ok(_)) => {
                warn!(idempotency_key = %key, tx_hash = %handle.tx_hash, "Transaction not yet final");
                metrics::observe_settlement("pending");
                Ok(SettlementResult::Pending {
                    tx_reference: Some(handle.tx_hash),
                })
            }
            Ok(Err(e @ LedgerError::Rejected(_))) => {
                error!(idempotency_key = %key, error = %e, "Transaction rejected after submission");
                self.repo
                    .update_ledger_entry(key, LedgerEntryStatus::Failed, None, attempts)
                    .await?;
                metrics::observe_settlement("failed");
                Ok(SettlementResult::Failed {
                    reason: e.to_string(),
                })
            }
            Ok(Err(e)) => {
                warn!(idempotency_key = %key, error = %e, "Confirmation probe failed, leaving pending");
                metrics::observe_settlement("pending");
                Ok(SettlementResult::Pending {
                    tx_reference: Some(handle.tx_hash),
                })
            }
            Err(_) => {
                warn!(
                    idempotency_key = %key,
                    tx_hash = %handle.tx_hash,
                    "Confirmation timed out, leaving pending"
                );
                metrics::observe_settlement("pending");
                Ok(SettlementResult::Pending {
                    tx_reference: Some(handle.tx_hash),
                })
            }
        }
    }
}

fn next_backoff(current: Duration, config: &SettlementConfig) -> Duration {
    let scaled = current.as_secs_f64() * config.backoff_multiplier;
    Duration::from_secs_f64(scaled.min(config.max_backoff.as_secs_f64()))
}

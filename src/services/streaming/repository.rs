//! Storage layer for streams and reward ledger entries
//!
//! Per-stream serialization is enforced here with storage-level
//! compare-and-swap: state transitions are conditional updates that only
//! apply when the record is still in the expected state, and viewer-count
//! mutation is a single atomic read-modify-write clamped at zero. The
//! service layer never does a read-then-write two-step on these fields.

use super::models::{LedgerEntryStatus, RewardLedgerEntry, Stream, StreamStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Storage capability consumed by the session state machine and the
/// settlement dispatcher.
#[async_trait]
pub trait StreamRepository: Send + Sync {
    /// Insert a new Idle session with a freshly issued key.
    async fn create_session(
        &self,
        streamer_address: &str,
        stream_key: &str,
        category: Option<&str>,
    ) -> Result<Stream>;

    async fn find_by_key(&self, stream_key: &str) -> Result<Option<Stream>>;

    async fn find_by_id(&self, stream_id: Uuid) -> Result<Option<Stream>>;

    /// Atomically move a stream from `from` to `to`. Going Live stamps
    /// `started_at` and resets the viewer count; going Ended stamps
    /// `ended_at`. Returns the updated record, or `None` if the stream was
    /// no longer in `from` (the caller lost the race).
    async fn transition(
        &self,
        stream_id: Uuid,
        from: StreamStatus,
        to: StreamStatus,
    ) -> Result<Option<Stream>>;

    /// Atomically add `delta` to the viewer count, clamped at a floor of 0.
    /// Only applies while the stream is Live, so a join racing an
    /// unpublish cannot mutate an Ended record after its settlement
    /// snapshot was taken. Returns the new count, or `None` if the stream
    /// does not exist or is no longer Live.
    async fn increment_viewers(&self, stream_id: Uuid, delta: i32) -> Result<Option<i32>>;

    /// Insert a ledger entry keyed by its idempotency key. Returns `None`
    /// when an entry for the key already exists (the caller lost the race).
    async fn insert_ledger_entry(
        &self,
        entry: &RewardLedgerEntry,
    ) -> Result<Option<RewardLedgerEntry>>;

    async fn get_ledger_entry(&self, idempotency_key: &str) -> Result<Option<RewardLedgerEntry>>;

    async fn update_ledger_entry(
        &self,
        idempotency_key: &str,
        status: LedgerEntryStatus,
        tx_reference: Option<&str>,
        attempts: i32,
    ) -> Result<()>;

    /// Entries in a given status, oldest first (reconciliation pass).
    async fn list_ledger_entries(
        &self,
        status: LedgerEntryStatus,
    ) -> Result<Vec<RewardLedgerEntry>>;
}

const STREAM_COLUMNS: &str = "id, streamer_address, stream_key, category, status, \
     viewer_count, created_at, started_at, ended_at";

const LEDGER_COLUMNS: &str = "idempotency_key, stream_id, streamer_address, amount, \
     duration_minutes, viewer_count, category, status, tx_reference, attempts, \
     created_at, updated_at";

/// PostgreSQL-backed repository.
#[derive(Clone)]
pub struct PgStreamRepository {
    pool: PgPool,
}

impl PgStreamRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StreamRepository for PgStreamRepository {
    async fn create_session(
        &self,
        streamer_address: &str,
        stream_key: &str,
        category: Option<&str>,
    ) -> Result<Stream> {
        let sql = format!(
            "INSERT INTO streams (streamer_address, stream_key, category, status) \
             VALUES ($1, $2, $3, 'idle') \
             RETURNING {STREAM_COLUMNS}"
        );
        let row = sqlx::query_as::<_, Stream>(&sql)
            .bind(streamer_address)
            .bind(stream_key)
            .bind(category)
            .fetch_one(&self.pool)
            .await
            .context("Failed to insert stream session")?;

        Ok(row)
    }

    async fn find_by_key(&self, stream_key: &str) -> Result<Option<Stream>> {
        let sql = format!("SELECT {STREAM_COLUMNS} FROM streams WHERE stream_key = $1");
        let row = sqlx::query_as::<_, Stream>(&sql)
            .bind(stream_key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch stream by key")?;

        Ok(row)
    }

    async fn find_by_id(&self, stream_id: Uuid) -> Result<Option<Stream>> {
        let sql = format!("SELECT {STREAM_COLUMNS} FROM streams WHERE id = $1");
        let row = sqlx::query_as::<_, Stream>(&sql)
            .bind(stream_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch stream by id")?;

        Ok(row)
    }

    async fn transition(
        &self,
        stream_id: Uuid,
        from: StreamStatus,
        to: StreamStatus,
    ) -> Result<Option<Stream>> {
        // Conditional UPDATE doubles as the per-stream serialization point:
        // of two racing transitions only one matches the `status = from`
        // predicate; the loser gets no row back.
        let sql = match to {
            StreamStatus::Live => format!(
                "UPDATE streams \
                 SET status = 'live', started_at = NOW(), viewer_count = 0 \
                 WHERE id = $1 AND status = $2 \
                 RETURNING {STREAM_COLUMNS}"
            ),
            StreamStatus::Ended => format!(
                "UPDATE streams \
                 SET status = 'ended', ended_at = NOW() \
                 WHERE id = $1 AND status = $2 \
                 RETURNING {STREAM_COLUMNS}"
            ),
            StreamStatus::Idle => format!(
                "UPDATE streams SET status = 'idle' \
                 WHERE id = $1 AND status = $2 \
                 RETURNING {STREAM_COLUMNS}"
            ),
        };

        let row = sqlx::query_as::<_, Stream>(&sql)
            .bind(stream_id)
            .bind(from)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to transition stream state")?;

        Ok(row)
    }

    async fn increment_viewers(&self, stream_id: Uuid, delta: i32) -> Result<Option<i32>> {
        let count = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE streams
            SET viewer_count = GREATEST(viewer_count + $2, 0)
            WHERE id = $1 AND status = 'live'
            RETURNING viewer_count
            "#,
        )
        .bind(stream_id)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update viewer count")?;

        Ok(count)
    }

    async fn insert_ledger_entry(
        &self,
        entry: &RewardLedgerEntry,
    ) -> Result<Option<RewardLedgerEntry>> {
        let sql = format!(
            "INSERT INTO reward_ledger ( \
                idempotency_key, stream_id, streamer_address, amount, \
                duration_minutes, viewer_count, category, status, attempts \
             ) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (idempotency_key) DO NOTHING \
             RETURNING {LEDGER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RewardLedgerEntry>(&sql)
            .bind(&entry.idempotency_key)
            .bind(entry.stream_id)
            .bind(&entry.streamer_address)
            .bind(entry.amount)
            .bind(entry.duration_minutes)
            .bind(entry.viewer_count)
            .bind(&entry.category)
            .bind(entry.status)
            .bind(entry.attempts)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to insert reward ledger entry")?;

        Ok(row)
    }

    async fn get_ledger_entry(&self, idempotency_key: &str) -> Result<Option<RewardLedgerEntry>> {
        let sql =
            format!("SELECT {LEDGER_COLUMNS} FROM reward_ledger WHERE idempotency_key = $1");
        let row = sqlx::query_as::<_, RewardLedgerEntry>(&sql)
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch reward ledger entry")?;

        Ok(row)
    }

    async fn update_ledger_entry(
        &self,
        idempotency_key: &str,
        status: LedgerEntryStatus,
        tx_reference: Option<&str>,
        attempts: i32,
    ) -> Result<()> {
        // Confirmed entries are immutable: the status predicate refuses to
        // move a record out of 'confirmed'.
        sqlx::query(
            r#"
            UPDATE reward_ledger
            SET status = $2,
                tx_reference = COALESCE($3, tx_reference),
                attempts = $4,
                updated_at = NOW()
            WHERE idempotency_key = $1 AND status <> 'confirmed'
            "#,
        )
        .bind(idempotency_key)
        .bind(status)
        .bind(tx_reference)
        .bind(attempts)
        .execute(&self.pool)
        .await
        .context("Failed to update reward ledger entry")?;

        Ok(())
    }

    async fn list_ledger_entries(
        &self,
        status: LedgerEntryStatus,
    ) -> Result<Vec<RewardLedgerEntry>> {
        let sql = format!(
            "SELECT {LEDGER_COLUMNS} FROM reward_ledger \
             WHERE status = $1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query_as::<_, RewardLedgerEntry>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list reward ledger entries")?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    // Integration tests require a database connection; the in-memory
    // repository in memory.rs covers the contract without one.
    // Run with: cargo test --test '*' -- --ignored

    #[ignore]
    #[tokio::test]
    async fn test_transition_cas_rejects_stale_state() {
        // let pool = PgPool::connect(&std::env::var("DATABASE_URL").unwrap()).await.unwrap();
        // let repo = PgStreamRepository::new(pool);
        // let stream = repo.create_session("0xabc", "sk_test", None).await.unwrap();
        // assert!(repo.transition(stream.id, StreamStatus::Idle, StreamStatus::Live).await.unwrap().is_some());
        // assert!(repo.transition(stream.id, StreamStatus::Idle, StreamStatus::Live).await.unwrap().is_none());
    }
}

//! In-memory repository
//!
//! Backs tests and database-less local operation. Every trait method runs
//! inside a single lock scope, so each operation is one atomic
//! read-modify-write, matching the guarantees of the SQL implementation.

use super::models::{LedgerEntryStatus, RewardLedgerEntry, Stream, StreamStatus};
use super::repository::StreamRepository;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    streams: HashMap<Uuid, Stream>,
    by_key: HashMap<String, Uuid>,
    ledger: HashMap<String, RewardLedgerEntry>,
}

/// Repository holding all state in process memory.
#[derive(Default)]
pub struct InMemoryStreamRepository {
    inner: Mutex<Inner>,
}

impl InMemoryStreamRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StreamRepository for InMemoryStreamRepository {
    async fn create_session(
        &self,
        streamer_address: &str,
        stream_key: &str,
        category: Option<&str>,
    ) -> Result<Stream> {
        let mut inner = self.inner.lock().await;
        if inner.by_key.contains_key(stream_key) {
            anyhow::bail!("stream key already issued");
        }
        let stream = Stream {
            id: Uuid::new_v4(),
            streamer_address: streamer_address.to_string(),
            stream_key: stream_key.to_string(),
            category: category.map(String::from),
            status: StreamStatus::Idle,
            viewer_count: 0,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        };
        inner.by_key.insert(stream_key.to_string(), stream.id);
        inner.streams.insert(stream.id, stream.clone());
        Ok(stream)
    }

    async fn find_by_key(&self, stream_key: &str) -> Result<Option<Stream>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_key
            .get(stream_key)
            .and_then(|id| inner.streams.get(id))
            .cloned())
    }

    async fn find_by_id(&self, stream_id: Uuid) -> Result<Option<Stream>> {
        let inner = self.inner.lock().await;
        Ok(inner.streams.get(&stream_id).cloned())
    }

    async fn transition(
        &self,
        stream_id: Uuid,
        from: StreamStatus,
        to: StreamStatus,
    ) -> Result<Option<Stream>> {
        let mut inner = self.inner.lock().await;
        let Some(stream) = inner.streams.get_mut(&stream_id) else {
            return Ok(None);
        };
        if stream.status != from {
            return Ok(None);
        }
        stream.status = to;
        match to {
            StreamStatus::Live => {
                stream.started_at = Some(Utc::now());
                stream.viewer_count = 0;
            }
            StreamStatus::Ended => {
                stream.ended_at = Some(Utc::now());
            }
            StreamStatus::Idle => {}
        }
        Ok(Some(stream.clone()))
    }

    async fn increment_viewers(&self, stream_id: Uuid, delta: i32) -> Result<Option<i32>> {
        let mut inner = self.inner.lock().await;
        let Some(stream) = inner.streams.get_mut(&stream_id) else {
            return Ok(None);
        };
        // The counter only moves while Live; an Ended record keeps the
        // figure its settlement snapshot was taken from.
        if stream.status != StreamStatus::Live {
            return Ok(None);
        }
        stream.viewer_count = (stream.viewer_count + delta).max(0);
        Ok(Some(stream.viewer_count))
    }

    async fn insert_ledger_entry(
        &self,
        entry: &RewardLedgerEntry,
    ) -> Result<Option<RewardLedgerEntry>> {
        let mut inner = self.inner.lock().await;
        if inner.ledger.contains_key(&entry.idempotency_key) {
            return Ok(None);
        }
        inner
            .ledger
            .insert(entry.idempotency_key.clone(), entry.clone());
        Ok(Some(entry.clone()))
    }

    async fn get_ledger_entry(&self, idempotency_key: &str) -> Result<Option<RewardLedgerEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner.ledger.get(idempotency_key).cloned())
    }

    async fn update_ledger_entry(
        &self,
        idempotency_key: &str,
        status: LedgerEntryStatus,
        tx_reference: Option<&str>,
        attempts: i32,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.ledger.get_mut(idempotency_key) {
            // Confirmed entries are immutable.
            if entry.status == LedgerEntryStatus::Confirmed {
                return Ok(());
            }
            entry.status = status;
            if let Some(reference) = tx_reference {
                entry.tx_reference = Some(reference.to_string());
            }
            entry.attempts = attempts;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_ledger_entries(
        &self,
        status: LedgerEntryStatus,
    ) -> Result<Vec<RewardLedgerEntry>> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<_> = inner
            .ledger
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_transition_cas_single_winner() {
        let repo = InMemoryStreamRepository::new();
        let stream = repo.create_session("0xabc", "sk_cas", None).await.unwrap();

        let won = repo
            .transition(stream.id, StreamStatus::Idle, StreamStatus::Live)
            .await
            .unwrap();
        assert!(won.is_some());
        assert_eq!(won.unwrap().status, StreamStatus::Live);

        // A second racer with the stale expectation loses.
        let lost = repo
            .transition(stream.id, StreamStatus::Idle, StreamStatus::Live)
            .await
            .unwrap();
        assert!(lost.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_play_stop_never_loses_updates() {
        let repo = Arc::new(InMemoryStreamRepository::new());
        let stream = repo
            .create_session("0xabc", "sk_burst", None)
            .await
            .unwrap();
        repo.transition(stream.id, StreamStatus::Idle, StreamStatus::Live)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                repo.increment_viewers(stream.id, 1).await.unwrap();
            }));
        }
        for _ in 0..20 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                repo.increment_viewers(stream.id, -1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let current = repo.find_by_id(stream.id).await.unwrap().unwrap();
        assert_eq!(current.viewer_count, 30);
    }

    #[tokio::test]
    async fn test_viewer_count_clamped_at_zero() {
        let repo = InMemoryStreamRepository::new();
        let stream = repo
            .create_session("0xabc", "sk_floor", None)
            .await
            .unwrap();
        repo.transition(stream.id, StreamStatus::Idle, StreamStatus::Live)
            .await
            .unwrap();

        // Reordered leave events must never drive the counter negative.
        for _ in 0..3 {
            let count = repo.increment_viewers(stream.id, -1).await.unwrap();
            assert_eq!(count, Some(0));
        }
        let count = repo.increment_viewers(stream.id, 1).await.unwrap();
        assert_eq!(count, Some(1));
    }

    #[tokio::test]
    async fn test_counter_only_moves_while_live() {
        let repo = InMemoryStreamRepository::new();
        let stream = repo
            .create_session("0xabc", "sk_frozen", None)
            .await
            .unwrap();

        // Idle: nothing to count against yet.
        assert_eq!(repo.increment_viewers(stream.id, 1).await.unwrap(), None);

        repo.transition(stream.id, StreamStatus::Idle, StreamStatus::Live)
            .await
            .unwrap();
        assert_eq!(
            repo.increment_viewers(stream.id, 1).await.unwrap(),
            Some(1)
        );

        // A join landing after the Live->Ended transition must not move
        // the counter the settlement snapshot was taken from.
        repo.transition(stream.id, StreamStatus::Live, StreamStatus::Ended)
            .await
            .unwrap();
        assert_eq!(repo.increment_viewers(stream.id, 1).await.unwrap(), None);

        let current = repo.find_by_id(stream.id).await.unwrap().unwrap();
        assert_eq!(current.viewer_count, 1);
    }

    #[tokio::test]
    async fn test_ledger_insert_is_first_writer_wins() {
        let repo = InMemoryStreamRepository::new();
        let snapshot = crate::services::streaming::models::SessionSnapshot {
            stream_id: Uuid::new_v4(),
            idempotency_key: "abc:1".into(),
            streamer_address: "0xabc".into(),
            duration_minutes: 10,
            viewer_count: 5,
            category: None,
        };
        let entry = RewardLedgerEntry::pending(&snapshot, 42.0);
        assert!(repo.insert_ledger_entry(&entry).await.unwrap().is_some());
        assert!(repo.insert_ledger_entry(&entry).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_confirmed_entry_is_immutable() {
        let repo = InMemoryStreamRepository::new();
        let snapshot = crate::services::streaming::models::SessionSnapshot {
            stream_id: Uuid::new_v4(),
            idempotency_key: "abc:2".into(),
            streamer_address: "0xabc".into(),
            duration_minutes: 1,
            viewer_count: 0,
            category: None,
        };
        let entry = RewardLedgerEntry::pending(&snapshot, 12.0);
        repo.insert_ledger_entry(&entry).await.unwrap();
        repo.update_ledger_entry("abc:2", LedgerEntryStatus::Confirmed, Some("0xtx"), 1)
            .await
            .unwrap();
        repo.update_ledger_entry("abc:2", LedgerEntryStatus::Failed, None, 2)
            .await
            .unwrap();

        let stored = repo.get_ledger_entry("abc:2").await.unwrap().unwrap();
        assert_eq!(stored.status, LedgerEntryStatus::Confirmed);
        assert_eq!(stored.tx_reference.as_deref(), Some("0xtx"));
    }
}

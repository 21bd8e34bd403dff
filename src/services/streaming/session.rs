//! Session state machine
//!
//! Owns the Idle -> Live -> Ended lifecycle and viewer-count mutation for
//! every stream. All writes go through the repository's atomic primitives;
//! the losing side of any concurrent transition observes the new state and
//! resolves to the idempotent or reject branch instead of corrupting the
//! record. When a session ends, the terminal snapshot is handed to the
//! settlement worker over a channel so the webhook response never waits on
//! the ledger.

use super::models::{SessionSnapshot, Stream, StreamStatus};
use super::repository::StreamRepository;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Why a webhook event was rejected. Maps onto the protocol's `code: 1`
/// soft failure; none of these mutate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No stream record matches the presented key
    UnknownKey,
    /// The key belongs to an ended session; a new session must be minted
    KeySpent,
    /// The event only makes sense against a Live stream
    NotLive,
}

impl RejectReason {
    pub fn message(&self) -> &'static str {
        match self {
            Self::UnknownKey => "Invalid stream key",
            Self::KeySpent => "Stream key already used",
            Self::NotLive => "Stream is not live",
        }
    }
}

/// Outcome of one lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Accepted,
    Rejected(RejectReason),
}

pub struct SessionStateMachine {
    repo: Arc<dyn StreamRepository>,
    settlement_tx: mpsc::Sender<SessionSnapshot>,
}

impl SessionStateMachine {
    pub fn new(
        repo: Arc<dyn StreamRepository>,
        settlement_tx: mpsc::Sender<SessionSnapshot>,
    ) -> Self {
        Self {
            repo,
            settlement_tx,
        }
    }

    /// Mint a new Idle session with a fresh secret key.
    pub async fn create_session(
        &self,
        streamer_address: &str,
        category: Option<&str>,
    ) -> Result<Stream> {
        let stream_key = format!("sk_{}", Uuid::new_v4().simple());
        let stream = self
            .repo
            .create_session(streamer_address, &stream_key, category)
            .await?;
        info!(stream_id = %stream.id, %streamer_address, "Stream session created");
        Ok(stream)
    }

    /// Media server connected with a key. Idle goes Live; a duplicate
    /// publish on an already-Live stream is a no-op success and must not
    /// reset the viewer count; an Ended key is spent and rejected.
    pub async fn on_publish(&self, stream_key: &str) -> Result<SessionOutcome> {
        let Some(stream) = self.repo.find_by_key(stream_key).await? else {
            return Ok(SessionOutcome::Rejected(RejectReason::UnknownKey));
        };

        match stream.status {
            StreamStatus::Live => Ok(SessionOutcome::Accepted),
            StreamStatus::Ended => Ok(SessionOutcome::Rejected(RejectReason::KeySpent)),
            StreamStatus::Idle => {
                let won = self
                    .repo
                    .transition(stream.id, StreamStatus::Idle, StreamStatus::Live)
                    .await?;
                match won {
                    Some(live) => {
                        info!(stream_id = %live.id, "Stream went live");
                        Ok(SessionOutcome::Accepted)
                    }
                    // Lost a race; resolve against what the winner left behind.
                    None => self.resolve_publish_race(stream.id).await,
                }
            }
        }
    }

    async fn resolve_publish_race(&self, stream_id: Uuid) -> Result<SessionOutcome> {
        match self.repo.find_by_id(stream_id).await? {
            Some(current) if current.status == StreamStatus::Live => Ok(SessionOutcome::Accepted),
            Some(_) => Ok(SessionOutcome::Rejected(RejectReason::KeySpent)),
            None => Ok(SessionOutcome::Rejected(RejectReason::UnknownKey)),
        }
    }

    /// Media server disconnected. Live goes Ended and the terminal snapshot
    /// is queued for settlement; a retried unpublish on an Ended stream is
    /// a no-op success (the winner already queued settlement exactly once).
    pub async fn on_unpublish(&self, stream_key: &str) -> Result<SessionOutcome> {
        let Some(stream) = self.repo.find_by_key(stream_key).await? else {
            return Ok(SessionOutcome::Rejected(RejectReason::UnknownKey));
        };

        match stream.status {
            StreamStatus::Idle => Ok(SessionOutcome::Rejected(RejectReason::NotLive)),
            StreamStatus::Ended => Ok(SessionOutcome::Accepted),
            StreamStatus::Live => {
                let won = self
                    .repo
                    .transition(stream.id, StreamStatus::Live, StreamStatus::Ended)
                    .await?;
                match won {
                    Some(ended) => {
                        let snapshot = terminal_snapshot(&ended);
                        info!(
                            stream_id = %ended.id,
                            duration_minutes = snapshot.duration_minutes,
                            viewer_count = snapshot.viewer_count,
                            "Stream ended, settlement queued"
                        );
                        if let Err(e) = self.settlement_tx.send(snapshot).await {
                            // Worker gone; the entry will surface in a
                            // reconcile pass only once it exists, so shout.
                            warn!(stream_id = %ended.id, error = %e, "Failed to queue settlement");
                        }
                        Ok(SessionOutcome::Accepted)
                    }
                    // Another unpublish won; their snapshot is authoritative.
                    None => Ok(SessionOutcome::Accepted),
                }
            }
        }
    }

    /// Viewer joined. Only counts against a Live stream; joins racing an
    /// unpublish are expected and soft-rejected.
    pub async fn on_play(&self, stream_key: &str) -> Result<SessionOutcome> {
        let Some(stream) = self.repo.find_by_key(stream_key).await? else {
            return Ok(SessionOutcome::Rejected(RejectReason::UnknownKey));
        };
        if stream.status != StreamStatus::Live {
            return Ok(SessionOutcome::Rejected(RejectReason::NotLive));
        }
        // No row means the stream ended between the lookup and the
        // increment; same soft reject as seeing it Ended up front.
        match self.repo.increment_viewers(stream.id, 1).await? {
            Some(_) => Ok(SessionOutcome::Accepted),
            None => Ok(SessionOutcome::Rejected(RejectReason::NotLive)),
        }
    }

    /// Viewer left. The repository clamps the counter at zero, so a leave
    /// reordered after the count already drained never drives it negative.
    pub async fn on_stop(&self, stream_key: &str) -> Result<SessionOutcome> {
        let Some(stream) = self.repo.find_by_key(stream_key).await? else {
            return Ok(SessionOutcome::Rejected(RejectReason::UnknownKey));
        };
        if stream.status != StreamStatus::Live {
            return Ok(SessionOutcome::Rejected(RejectReason::NotLive));
        }
        match self.repo.increment_viewers(stream.id, -1).await? {
            Some(_) => Ok(SessionOutcome::Accepted),
            None => Ok(SessionOutcome::Rejected(RejectReason::NotLive)),
        }
    }
}

fn terminal_snapshot(ended: &Stream) -> SessionSnapshot {
    let duration_minutes = match (ended.started_at, ended.ended_at) {
        (Some(start), Some(end)) => (end - start).num_minutes().max(0),
        _ => 0,
    };
    SessionSnapshot {
        stream_id: ended.id,
        idempotency_key: ended.idempotency_key(),
        streamer_address: ended.streamer_address.clone(),
        duration_minutes,
        viewer_count: ended.viewer_count,
        category: ended.category.clone(),
    }
}

//! Data models for live stream sessions and reward settlement
//!
//! These models represent the contract between API handlers, the session
//! state machine, and the repository. Database rows map onto the same
//! structs via `sqlx::FromRow`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// =============================================================================
// Stream Lifecycle
// =============================================================================

/// Stream lifecycle status.
///
/// Transitions are monotonic: Idle -> Live -> Ended. An ended session is
/// never resurrected under the same key; broadcasters mint a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// Session created but ingestion has not observed a publish yet
    Idle,
    /// Media server connected, actively streaming
    Live,
    /// Stream ended; key is spent
    Ended,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Live => "live",
            Self::Ended => "ended",
        }
    }
}

/// One stream session record.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Stream {
    pub id: Uuid,
    /// Wallet address of the owning broadcaster
    pub streamer_address: String,
    /// Secret ingestion credential, unique and immutable once issued
    pub stream_key: String,
    pub category: Option<String>,
    pub status: StreamStatus,
    pub viewer_count: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Stream {
    /// Idempotency key for the session's settlement: stream id + session epoch.
    pub fn idempotency_key(&self) -> String {
        let epoch = self.started_at.unwrap_or(self.created_at).timestamp();
        format!("{}:{}", self.id, epoch)
    }
}

// =============================================================================
// Webhook Protocol
// =============================================================================

/// Known media-server callback actions.
///
/// Closed set: anything else decodes to `Unknown`, which is handled as a
/// soft failure rather than a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAction {
    OnPublish,
    OnUnpublish,
    OnPlay,
    OnStop,
    Unknown,
}

impl WebhookAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "on_publish" => Self::OnPublish,
            "on_unpublish" => Self::OnUnpublish,
            "on_play" => Self::OnPlay,
            "on_stop" => Self::OnStop,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnPublish => "on_publish",
            Self::OnUnpublish => "on_unpublish",
            Self::OnPlay => "on_play",
            Self::OnStop => "on_stop",
            Self::Unknown => "unknown",
        }
    }
}

/// Inbound SRS webhook payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookRequest {
    pub action: String,
    /// Media-server stream name (informational only)
    #[serde(default)]
    pub stream: Option<String>,
    /// Query-encoded parameter blob carrying `token=<stream_key>`
    #[serde(default)]
    pub param: Option<String>,
}

/// SRS webhook protocol response. `code: 0` approves the callback,
/// `code: 1` rejects it; both are delivered with HTTP 200 because the
/// media server treats any non-2xx as a hard failure and aborts the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub code: i32,
    pub msg: String,
}

impl WebhookResponse {
    pub fn success() -> Self {
        Self {
            code: 0,
            msg: "Success".to_string(),
        }
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self {
            code: 1,
            msg: msg.into(),
        }
    }
}

// =============================================================================
// API Request / Response Models
// =============================================================================

/// Request to mint a new stream session.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateStreamRequest {
    #[validate(length(min = 1, max = 128))]
    pub streamer_address: String,

    #[validate(length(max = 50))]
    pub category: Option<String>,
}

/// Response after creating a session.
#[derive(Debug, Serialize)]
pub struct CreateStreamResponse {
    pub stream_id: Uuid,
    /// Secret stream key for ingestion auth (only returned here, never again)
    pub stream_key: String,
    pub status: StreamStatus,
    pub created_at: DateTime<Utc>,
}

/// Stream details (for GET /streams/{id}); never exposes the stream key.
#[derive(Debug, Serialize)]
pub struct StreamDetails {
    pub stream_id: Uuid,
    pub streamer_address: String,
    pub category: Option<String>,
    pub status: StreamStatus,
    pub viewer_count: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<Stream> for StreamDetails {
    fn from(s: Stream) -> Self {
        Self {
            stream_id: s.id,
            streamer_address: s.streamer_address,
            category: s.category,
            status: s.status,
            viewer_count: s.viewer_count,
            created_at: s.created_at,
            started_at: s.started_at,
            ended_at: s.ended_at,
        }
    }
}

// =============================================================================
// Settlement Models
// =============================================================================

/// Terminal session snapshot handed to the settlement dispatcher when a
/// session ends. Self-contained so settlement can be retried without
/// re-reading the stream record.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub stream_id: Uuid,
    pub idempotency_key: String,
    pub streamer_address: String,
    pub duration_minutes: i64,
    pub viewer_count: i32,
    pub category: Option<String>,
}

/// Reward ledger entry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryStatus {
    /// Created, submission not yet confirmed
    Pending,
    /// External ledger reported finality; entry is immutable from here
    Confirmed,
    /// Fatally rejected; requires operator remediation before retry
    Failed,
}

/// Persistent record of one settlement attempt chain for a session.
///
/// At most one non-Failed entry exists per idempotency key.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RewardLedgerEntry {
    pub idempotency_key: String,
    pub stream_id: Uuid,
    pub streamer_address: String,
    pub amount: f64,
    pub duration_minutes: i64,
    pub viewer_count: i32,
    pub category: Option<String>,
    pub status: LedgerEntryStatus,
    /// External transaction reference once submitted
    pub tx_reference: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RewardLedgerEntry {
    pub fn pending(snapshot: &SessionSnapshot, amount: f64) -> Self {
        let now = Utc::now();
        Self {
            idempotency_key: snapshot.idempotency_key.clone(),
            stream_id: snapshot.stream_id,
            streamer_address: snapshot.streamer_address.clone(),
            amount,
            duration_minutes: snapshot.duration_minutes,
            viewer_count: snapshot.viewer_count,
            category: snapshot.category.clone(),
            status: LedgerEntryStatus::Pending,
            tx_reference: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            stream_id: self.stream_id,
            idempotency_key: self.idempotency_key.clone(),
            streamer_address: self.streamer_address.clone(),
            duration_minutes: self.duration_minutes,
            viewer_count: self.viewer_count,
            category: self.category.clone(),
        }
    }
}

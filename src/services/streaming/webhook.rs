//! SRS webhook ingestion
//!
//! Parses and validates inbound media-server callbacks and routes them to
//! the session state machine. The protocol is unforgiving in one specific
//! way: SRS treats any non-2xx response as a hard failure and tears the
//! stream down, so everything recoverable (missing token, unknown action,
//! invalid key, wrong state) is reported as `{code: 1}` with HTTP 200.
//! Only storage faults are allowed to escape as errors.

use super::models::{WebhookAction, WebhookRequest, WebhookResponse};
use super::session::{SessionOutcome, SessionStateMachine};
use crate::metrics;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub struct WebhookIngestor {
    sessions: Arc<SessionStateMachine>,
}

impl WebhookIngestor {
    pub fn new(sessions: Arc<SessionStateMachine>) -> Self {
        Self { sessions }
    }

    /// Process one callback. `Err` here means an internal fault (storage);
    /// every protocol-level problem comes back as a `code: 1` response.
    pub async fn handle(&self, request: &WebhookRequest) -> Result<WebhookResponse> {
        let action = WebhookAction::parse(&request.action);

        let Some(stream_key) = extract_token(request.param.as_deref()) else {
            info!(action = action.as_str(), "Webhook missing stream key token");
            metrics::observe_webhook_event(action.as_str(), "rejected");
            return Ok(WebhookResponse::rejected("No stream key"));
        };

        info!(
            action = action.as_str(),
            stream_key = %redact(&stream_key),
            stream = request.stream.as_deref().unwrap_or(""),
            "Received SRS webhook"
        );

        let outcome = match action {
            WebhookAction::OnPublish => self.sessions.on_publish(&stream_key).await?,
            WebhookAction::OnUnpublish => self.sessions.on_unpublish(&stream_key).await?,
            WebhookAction::OnPlay => self.sessions.on_play(&stream_key).await?,
            WebhookAction::OnStop => self.sessions.on_stop(&stream_key).await?,
            WebhookAction::Unknown => {
                metrics::observe_webhook_event("unknown", "rejected");
                return Ok(WebhookResponse::rejected("Unknown action"));
            }
        };

        let response = match outcome {
            SessionOutcome::Accepted => WebhookResponse::success(),
            SessionOutcome::Rejected(reason) => WebhookResponse::rejected(reason.message()),
        };
        let outcome_label = if response.code == 0 {
            "accepted"
        } else {
            "rejected"
        };
        metrics::observe_webhook_event(action.as_str(), outcome_label);

        Ok(response)
    }
}

/// Pull `token=<stream_key>` out of the query-encoded param blob.
/// SRS sends the blob with a leading `?`.
fn extract_token(param: Option<&str>) -> Option<String> {
    let param = param?.trim_start_matches('?');
    url::form_urlencoded::parse(param.as_bytes())
        .find(|(name, _)| name == "token")
        .map(|(_, value)| value.into_owned())
        .filter(|token| !token.is_empty())
}

/// Keys are secrets; logs only ever see a prefix. The token is
/// attacker-supplied, so slicing must respect char boundaries.
fn redact(stream_key: &str) -> String {
    if stream_key.chars().count() <= 8 {
        return "…".to_string();
    }
    let prefix: String = stream_key.chars().take(8).collect();
    format!("{prefix}…")
}

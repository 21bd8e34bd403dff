pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use services::settlement::{RewardConfig, SettlementConfig, SettlementDispatcher};
use services::settlement::ledger::LedgerClient;
use services::streaming::repository::StreamRepository;
use services::streaming::{SessionStateMachine, WebhookIngestor};

/// Shared handler state: the webhook ingestor, the session state machine,
/// and the settlement dispatcher, all over one repository.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn StreamRepository>,
    pub sessions: Arc<SessionStateMachine>,
    pub ingestor: Arc<WebhookIngestor>,
    pub dispatcher: Arc<SettlementDispatcher>,
}

impl AppState {
    /// Wire the service graph and start the settlement worker. The worker
    /// consumes session-end snapshots queued by the state machine; the
    /// returned handle keeps it observable for shutdown.
    pub fn build(
        repo: Arc<dyn StreamRepository>,
        ledger: Arc<dyn LedgerClient>,
        rewards: RewardConfig,
        settlement: SettlementConfig,
    ) -> (Self, JoinHandle<()>) {
        let (settlement_tx, settlement_rx) = mpsc::channel(256);

        let dispatcher = Arc::new(SettlementDispatcher::new(
            repo.clone(),
            ledger,
            rewards,
            settlement,
        ));
        let worker = dispatcher.clone().run(settlement_rx);

        let sessions = Arc::new(SessionStateMachine::new(repo.clone(), settlement_tx));
        let ingestor = Arc::new(WebhookIngestor::new(sessions.clone()));

        (
            Self {
                repo,
                sessions,
                ingestor,
                dispatcher,
            },
            worker,
        )
    }
}

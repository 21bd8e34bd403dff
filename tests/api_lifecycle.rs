//! End-to-end lifecycle tests over the HTTP surface: mint a session,
//! drive it through SRS callbacks, and observe the settlement that the
//! unpublish transition queues on the detached worker.

use actix_web::{test, web, App};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use streaming_rewards_service::services::settlement::{
    Confirmation, LedgerClient, LedgerError, RewardConfig, SettlementConfig, TxHandle,
};
use streaming_rewards_service::services::streaming::models::{
    LedgerEntryStatus, RewardLedgerEntry,
};
use streaming_rewards_service::services::streaming::repository::StreamRepository;
use streaming_rewards_service::services::streaming::{InMemoryStreamRepository, Stream};
use streaming_rewards_service::{handlers, AppState};
use uuid::Uuid;

/// Ledger double that confirms everything and counts submissions.
struct StubLedger {
    submissions: AtomicUsize,
}

impl StubLedger {
    fn new() -> Self {
        Self {
            submissions: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LedgerClient for StubLedger {
    async fn submit_reward(
        &self,
        _streamer_address: &str,
        _duration_minutes: i64,
        _viewers: i64,
        _category: &str,
    ) -> Result<TxHandle, LedgerError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(TxHandle {
            tx_hash: format!("0xtx{n}"),
        })
    }

    async fn await_confirmation(&self, handle: &TxHandle) -> Result<Confirmation, LedgerError> {
        Ok(Confirmation {
            confirmed: true,
            reference: handle.tx_hash.clone(),
        })
    }
}

fn test_state(ledger: Arc<StubLedger>) -> AppState {
    let repo: Arc<dyn StreamRepository> = Arc::new(InMemoryStreamRepository::new());
    let settlement = SettlementConfig {
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        ..SettlementConfig::default()
    };
    let (state, _worker) = AppState::build(repo, ledger, RewardConfig::default(), settlement);
    state
}

async fn webhook<S, B>(app: &S, action: &str, stream_key: &str) -> Value
where
    S: actix_web::dev::Service<
        actix_http::Request,
        Response = actix_web::dev::ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    B: actix_web::body::MessageBody,
    B::Error: std::fmt::Debug,
{
    let req = test::TestRequest::post()
        .uri("/api/v1/webhooks/srs")
        .set_json(json!({
            "action": action,
            "stream": "livestream",
            "param": format!("?token={stream_key}"),
        }))
        .to_request();
    let resp = test::call_service(app, req).await;
    assert!(resp.status().is_success());
    test::read_body_json(resp).await
}

async fn fetch_stream<S, B>(app: &S, stream_id: &str) -> Value
where
    S: actix_web::dev::Service<
        actix_http::Request,
        Response = actix_web::dev::ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    B: actix_web::body::MessageBody,
    B::Error: std::fmt::Debug,
{
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/streams/{stream_id}"))
        .to_request();
    let resp = test::call_service(app, req).await;
    assert!(resp.status().is_success());
    test::read_body_json(resp).await
}

/// Settlement runs detached from the webhook response; poll until the
/// worker catches up.
async fn wait_for_entry(
    repo: &Arc<dyn StreamRepository>,
    status: LedgerEntryStatus,
) -> RewardLedgerEntry {
    for _ in 0..200 {
        let entries = repo.list_ledger_entries(status).await.unwrap();
        if let Some(entry) = entries.into_iter().next() {
            return entry;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no ledger entry reached status {status:?}")
}

#[actix_web::test]
async fn test_full_session_lifecycle_with_settlement() {
    let ledger = Arc::new(StubLedger::new());
    let state = test_state(ledger.clone());
    let repo = state.repo.clone();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(handlers::configure),
    )
    .await;

    // Broadcaster mints a session.
    let req = test::TestRequest::post()
        .uri("/api/v1/streams")
        .set_json(json!({
            "streamer_address": "0x1234567890123456789012345678901234567890",
            "category": "Gaming",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let created: Value = test::read_body_json(resp).await;
    let stream_id = created["stream_id"].as_str().unwrap().to_string();
    let stream_key = created["stream_key"].as_str().unwrap().to_string();
    assert!(stream_key.starts_with("sk_"));
    assert_eq!(created["status"], "idle");

    // Publish: Idle -> Live, zero viewers.
    let body = webhook(&app, "on_publish", &stream_key).await;
    assert_eq!(body["code"], 0);
    let details = fetch_stream(&app, &stream_id).await;
    assert_eq!(details["status"], "live");
    assert_eq!(details["viewer_count"], 0);

    // Three joins, one leave.
    for _ in 0..3 {
        let body = webhook(&app, "on_play", &stream_key).await;
        assert_eq!(body["code"], 0);
    }
    let body = webhook(&app, "on_stop", &stream_key).await;
    assert_eq!(body["code"], 0);
    let details = fetch_stream(&app, &stream_id).await;
    assert_eq!(details["viewer_count"], 2);

    // Unpublish: Live -> Ended, settlement queued.
    let body = webhook(&app, "on_unpublish", &stream_key).await;
    assert_eq!(body["code"], 0);
    let details = fetch_stream(&app, &stream_id).await;
    assert_eq!(details["status"], "ended");

    let entry = wait_for_entry(&repo, LedgerEntryStatus::Confirmed).await;
    assert_eq!(entry.viewer_count, 2);
    assert_eq!(entry.category.as_deref(), Some("Gaming"));
    assert!(entry.tx_reference.is_some());
    assert_eq!(ledger.submissions.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn test_retried_unpublish_settles_exactly_once() {
    let ledger = Arc::new(StubLedger::new());
    let state = test_state(ledger.clone());
    let repo = state.repo.clone();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/streams")
        .set_json(json!({ "streamer_address": "0xabc" }))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let stream_key = created["stream_key"].as_str().unwrap().to_string();

    webhook(&app, "on_publish", &stream_key).await;

    // The media server retries webhook delivery; both must be accepted,
    // only one settlement may happen.
    let first = webhook(&app, "on_unpublish", &stream_key).await;
    let second = webhook(&app, "on_unpublish", &stream_key).await;
    assert_eq!(first["code"], 0);
    assert_eq!(second["code"], 0);

    wait_for_entry(&repo, LedgerEntryStatus::Confirmed).await;
    // Give any spurious second settlement a chance to land before counting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ledger.submissions.load(Ordering::SeqCst), 1);
    let confirmed = repo
        .list_ledger_entries(LedgerEntryStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.len(), 1);
}

#[actix_web::test]
async fn test_soft_failures_are_http_200_code_1() {
    let state = test_state(Arc::new(StubLedger::new()));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(handlers::configure),
    )
    .await;

    // Missing token.
    let req = test::TestRequest::post()
        .uri("/api/v1/webhooks/srs")
        .set_json(json!({ "action": "on_publish", "stream": "x", "param": "vhost=y" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], 1);

    // Unknown action.
    let body = webhook(&app, "on_dvr", "sk_whatever").await;
    assert_eq!(body["code"], 1);

    // Unknown credential.
    let body = webhook(&app, "on_publish", "sk_unknown").await;
    assert_eq!(body["code"], 1);
    assert_eq!(body["msg"], "Invalid stream key");
}

#[actix_web::test]
async fn test_storage_fault_returns_http_500() {
    struct BrokenRepo;

    #[async_trait]
    impl StreamRepository for BrokenRepo {
        async fn create_session(
            &self,
            _streamer_address: &str,
            _stream_key: &str,
            _category: Option<&str>,
        ) -> Result<Stream> {
            anyhow::bail!("storage unavailable")
        }
        async fn find_by_key(&self, _stream_key: &str) -> Result<Option<Stream>> {
            anyhow::bail!("storage unavailable")
        }
        async fn find_by_id(&self, _stream_id: Uuid) -> Result<Option<Stream>> {
            anyhow::bail!("storage unavailable")
        }
        async fn transition(
            &self,
            _stream_id: Uuid,
            _from: streaming_rewards_service::services::streaming::StreamStatus,
            _to: streaming_rewards_service::services::streaming::StreamStatus,
        ) -> Result<Option<Stream>> {
            anyhow::bail!("storage unavailable")
        }
        async fn increment_viewers(&self, _stream_id: Uuid, _delta: i32) -> Result<Option<i32>> {
            anyhow::bail!("storage unavailable")
        }
        async fn insert_ledger_entry(
            &self,
            _entry: &RewardLedgerEntry,
        ) -> Result<Option<RewardLedgerEntry>> {
            anyhow::bail!("storage unavailable")
        }
        async fn get_ledger_entry(
            &self,
            _idempotency_key: &str,
        ) -> Result<Option<RewardLedgerEntry>> {
            anyhow::bail!("storage unavailable")
        }
        async fn update_ledger_entry(
            &self,
            _idempotency_key: &str,
            _status: LedgerEntryStatus,
            _tx_reference: Option<&str>,
            _attempts: i32,
        ) -> Result<()> {
            anyhow::bail!("storage unavailable")
        }
        async fn list_ledger_entries(
            &self,
            _status: LedgerEntryStatus,
        ) -> Result<Vec<RewardLedgerEntry>> {
            anyhow::bail!("storage unavailable")
        }
    }

    let (state, _worker) = AppState::build(
        Arc::new(BrokenRepo),
        Arc::new(StubLedger::new()),
        RewardConfig::default(),
        SettlementConfig::default(),
    );
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/webhooks/srs")
        .set_json(json!({ "action": "on_publish", "stream": "x", "param": "token=sk_abc" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);
}

#[actix_web::test]
async fn test_manual_distribution_endpoint() {
    let ledger = Arc::new(StubLedger::new());
    let state = test_state(ledger.clone());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/rewards/distribute")
        .set_json(json!({
            "streamer_address": "0xstreamer",
            "duration_in_minutes": 10,
            "viewers": 100,
            "category": "Gaming",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["msg"], "Rewards distributed successfully");
    assert!(body["tx_hash"].as_str().is_some());

    // Missing fields are a 400, not a settlement attempt.
    let req = test::TestRequest::post()
        .uri("/api/v1/rewards/distribute")
        .set_json(json!({ "streamer_address": "0xstreamer" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(ledger.submissions.load(Ordering::SeqCst), 1);

    // A viewer figure beyond i32 must be rejected, never wrapped into a
    // negative count on the ledger entry.
    let req = test::TestRequest::post()
        .uri("/api/v1/rewards/distribute")
        .set_json(json!({
            "streamer_address": "0xstreamer",
            "duration_in_minutes": 10,
            "viewers": i64::from(i32::MAX) + 1,
            "category": "Gaming",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(ledger.submissions.load(Ordering::SeqCst), 1);
}

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, TextEncoder};

static WEBHOOK_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "streaming_rewards_webhook_events_total",
            "SRS webhook callbacks processed, by action and outcome",
        ),
        &["action", "outcome"],
    )
    .expect("failed to create streaming_rewards_webhook_events_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register streaming_rewards_webhook_events_total");
    counter
});

static SETTLEMENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "streaming_rewards_settlements_total",
            "Settlement runs, by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create streaming_rewards_settlements_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register streaming_rewards_settlements_total");
    counter
});

pub fn observe_webhook_event(action: &str, outcome: &str) {
    WEBHOOK_EVENTS_TOTAL
        .with_label_values(&[action, outcome])
        .inc();
}

pub fn observe_settlement(outcome: &str) {
    SETTLEMENTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

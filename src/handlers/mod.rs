pub mod health;
pub mod rewards;
pub mod streams;
pub mod webhooks;

use actix_web::web;

use crate::metrics;

/// Route table, shared between main.rs and the integration tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/webhooks/srs", web::post().to(webhooks::srs_webhook))
            .route("/streams", web::post().to(streams::create_stream))
            .route("/streams/{id}", web::get().to(streams::get_stream))
            .route("/rewards/distribute", web::post().to(rewards::distribute))
            .route(
                "/rewards/{idempotency_key}",
                web::get().to(rewards::get_reward),
            ),
    )
    .route("/health", web::get().to(health::health_check))
    .route("/metrics", web::get().to(metrics::serve_metrics));
}

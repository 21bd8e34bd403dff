//! Stream lifecycle service layer
//!
//! Everything between the SRS webhook and the database lives here:
//!
//! - `models.rs` - stream, webhook, and ledger-entry models
//! - `repository.rs` - storage trait + PostgreSQL implementation
//! - `memory.rs` - in-memory store for tests and database-less runs
//! - `session.rs` - lifecycle state machine and viewer counting
//! - `webhook.rs` - SRS callback parsing and routing
//!
//! All state is in the repository; the service layer itself is stateless
//! and horizontally scalable.

pub mod memory;
pub mod models;
pub mod repository;
pub mod session;
pub mod webhook;

pub use memory::InMemoryStreamRepository;
pub use models::{
    CreateStreamRequest, CreateStreamResponse, SessionSnapshot, Stream, StreamDetails,
    StreamStatus, WebhookRequest, WebhookResponse,
};
pub use repository::{PgStreamRepository, StreamRepository};
pub use session::{SessionOutcome, SessionStateMachine};
pub use webhook::WebhookIngestor;

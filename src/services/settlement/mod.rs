//! Reward settlement service layer
//!
//! - `calculator.rs` - pure reward computation over category rates
//! - `ledger.rs` - external ledger capability trait and HTTP gateway client
//! - `dispatcher.rs` - idempotent, retry-safe settlement orchestration

pub mod calculator;
pub mod dispatcher;
pub mod ledger;

pub use calculator::{reward, CategoryRates, RewardConfig};
pub use dispatcher::{SettlementConfig, SettlementDispatcher, SettlementResult};
pub use ledger::{Confirmation, HttpLedgerClient, LedgerClient, LedgerError, TxHandle};

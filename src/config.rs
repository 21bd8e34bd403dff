use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::services::settlement::dispatcher::SettlementConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    pub settlement: SettlementTuning,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_host")]
    pub host: String,

    #[serde(default = "default_app_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// When unset the service runs on the in-memory store (local dev,
    /// tests); state does not survive a restart.
    pub url: Option<String>,

    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_gateway_url")]
    pub gateway_url: String,

    #[serde(default = "default_ledger_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementTuning {
    #[serde(default = "default_settlement_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_settlement_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_settlement_max_backoff_secs")]
    pub max_backoff_secs: u64,

    #[serde(default = "default_settlement_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_settlement_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    #[serde(default = "default_settlement_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

// Default value functions
fn default_app_host() -> String {
    "0.0.0.0".to_string()
}

fn default_app_port() -> u16 {
    8080
}

fn default_db_max_connections() -> u32 {
    20
}

fn default_ledger_gateway_url() -> String {
    "http://localhost:8545".to_string()
}

fn default_ledger_request_timeout_secs() -> u64 {
    10
}

fn default_settlement_max_attempts() -> u32 {
    3
}

fn default_settlement_initial_backoff_ms() -> u64 {
    500
}

fn default_settlement_max_backoff_secs() -> u64 {
    30
}

fn default_settlement_backoff_multiplier() -> f64 {
    2.0
}

fn default_settlement_confirmation_timeout_secs() -> u64 {
    15
}

fn default_settlement_reconcile_interval_secs() -> u64 {
    60
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenv::dotenv().ok();

        let app = AppConfig {
            host: env::var("APP_HOST").unwrap_or_else(|_| default_app_host()),
            port: env::var("APP_PORT")
                .unwrap_or_else(|_| default_app_port().to_string())
                .parse()
                .unwrap_or(default_app_port()),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| default_db_max_connections().to_string())
                .parse()
                .unwrap_or(default_db_max_connections()),
        };

        let ledger = LedgerConfig {
            gateway_url: env::var("LEDGER_GATEWAY_URL")
                .unwrap_or_else(|_| default_ledger_gateway_url()),
            request_timeout_secs: env::var("LEDGER_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| default_ledger_request_timeout_secs().to_string())
                .parse()
                .unwrap_or(default_ledger_request_timeout_secs()),
        };

        let settlement = envy::prefixed("SETTLEMENT_").from_env::<SettlementTuning>()?;

        Ok(Config {
            app,
            database,
            ledger,
            settlement,
        })
    }
}

impl SettlementTuning {
    pub fn to_settlement_config(&self) -> SettlementConfig {
        SettlementConfig {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            backoff_multiplier: self.backoff_multiplier,
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement_defaults_are_bounded() {
        let tuning = SettlementTuning {
            max_attempts: default_settlement_max_attempts(),
            initial_backoff_ms: default_settlement_initial_backoff_ms(),
            max_backoff_secs: default_settlement_max_backoff_secs(),
            backoff_multiplier: default_settlement_backoff_multiplier(),
            confirmation_timeout_secs: default_settlement_confirmation_timeout_secs(),
            reconcile_interval_secs: default_settlement_reconcile_interval_secs(),
        };
        let config = tuning.to_settlement_config();
        assert_eq!(config.max_attempts, 3);
        assert!(config.initial_backoff < config.max_backoff);
        assert!(config.backoff_multiplier > 1.0);
    }
}

//! Configuration module for expense-service.

use crate::services::approval::DEFAULT_ESCALATION_DELAY_HOURS;
use crate::services::matching::DEFAULT_MATCH_THRESHOLD;
use crate::services::orchestrator::DEFAULT_AUTO_CONFIRM_THRESHOLD;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct ExpenseConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// Absent means in-memory repositories (dev and test mode).
    pub database: Option<DatabaseConfig>,
    pub matching: MatchingConfig,
    pub approval: ApprovalConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub match_threshold: f64,
    pub auto_confirm_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct ApprovalConfig {
    pub escalation_delay_hours: i64,
    pub sweep_interval_secs: u64,
}

impl ExpenseConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "expense-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: env::var("DATABASE_URL").ok().map(|url| DatabaseConfig {
                url,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2),
            }),
            matching: MatchingConfig {
                match_threshold: env_parse("MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
                auto_confirm_threshold: env_parse(
                    "AUTO_CONFIRM_THRESHOLD",
                    DEFAULT_AUTO_CONFIRM_THRESHOLD,
                ),
            },
            approval: ApprovalConfig {
                escalation_delay_hours: env_parse(
                    "ESCALATION_DELAY_HOURS",
                    DEFAULT_ESCALATION_DELAY_HOURS,
                ),
                sweep_interval_secs: env_parse("ESCALATION_SWEEP_INTERVAL_SECS", 300),
            },
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

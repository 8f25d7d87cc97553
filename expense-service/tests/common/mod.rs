//! Common test utilities for expense-service integration tests.

use expense_service::config::{ApprovalConfig, ExpenseConfig, MatchingConfig};
use expense_service::startup::Application;
use serde_json::{json, Value};
use service_core::config::Config as CommonConfig;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,expense_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

fn test_config(escalation_delay_hours: i64) -> ExpenseConfig {
    ExpenseConfig {
        common: CommonConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        service_name: "expense-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: None, // in-memory repositories
        matching: MatchingConfig {
            match_threshold: 70.0,
            auto_confirm_threshold: 90.0,
        },
        approval: ApprovalConfig {
            escalation_delay_hours,
            // Effectively disable the background sweep so tests drive
            // escalations through the API deterministically.
            sweep_interval_secs: 3600,
        },
    }
}

/// Test application wrapper around an HTTP client scoped to one tenant.
#[allow(dead_code)]
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub tenant_id: Uuid,
}

#[allow(dead_code)]
impl TestApp {
    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.address, path))
            .header("x-tenant-id", self.tenant_id.to_string())
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.address, path))
            .header("x-tenant-id", self.tenant_id.to_string())
    }

    /// Import a matchable record and return its id.
    pub async fn register_record(&self, amount: &str, date: &str, vendor: &str) -> Uuid {
        let response = self
            .post("/api/records")
            .json(&record_payload(amount, date, vendor))
            .send()
            .await
            .expect("Failed to register record");
        assert_eq!(response.status(), 201, "record import failed");
        let body: Value = response.json().await.unwrap();
        Uuid::parse_str(body["record_id"].as_str().unwrap()).unwrap()
    }

    /// Create an expense and return its id.
    pub async fn create_expense(&self, submitter_id: Uuid, amount: &str) -> Uuid {
        let response = self
            .post("/api/expenses")
            .json(&json!({
                "submitter_id": submitter_id,
                "expense_date": "2026-02-14",
                "amount": amount,
                "currency": "USD",
                "category": "travel",
                "vendor": "Delta Air Lines",
                "description": "flight"
            }))
            .send()
            .await
            .expect("Failed to create expense");
        assert_eq!(response.status(), 201, "expense create failed");
        let body: Value = response.json().await.unwrap();
        Uuid::parse_str(body["expense_id"].as_str().unwrap()).unwrap()
    }
}

/// Spawn a test application backed by in-memory repositories.
pub async fn spawn_app() -> TestApp {
    spawn_app_with_escalation_delay(72).await
}

/// Spawn with a custom escalation delay (0 makes new requests immediately
/// overdue, which lets tests drive the sweep deterministically).
pub async fn spawn_app_with_escalation_delay(escalation_delay_hours: i64) -> TestApp {
    init_tracing();

    let app = Application::build(test_config(escalation_delay_hours))
        .await
        .expect("Failed to build application");
    let port = app.port();

    // Start the application in the background
    tokio::spawn(async move {
        app.run_until_stopped().await.ok();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        client: reqwest::Client::new(),
        tenant_id: Uuid::new_v4(),
    }
}

#[allow(dead_code)]
pub fn record_payload(amount: &str, date: &str, vendor: &str) -> Value {
    json!({
        "source": "bank_transaction",
        "record_date": date,
        "amount": amount,
        "currency": "USD",
        "description": format!("card purchase {}", vendor),
        "vendor": vendor
    })
}

/// A catch-all require-approval policy with a single required approver.
#[allow(dead_code)]
pub fn catch_all_policy_payload(approver_id: Uuid) -> Value {
    json!({
        "name": "catch-all",
        "priority": 100,
        "action": "require_approval",
        "approver_levels": [
            {
                "level": 1,
                "approver_id": approver_id,
                "is_required": true,
                "can_delegate": true
            }
        ]
    })
}

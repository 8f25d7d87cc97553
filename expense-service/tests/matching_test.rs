//! Integration tests for candidate search and match scoring.

mod common;

use common::{spawn_app, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn identical_records_match_with_full_confidence() {
    let app = spawn_app().await;
    let source = app
        .register_record("84.20", "2026-02-14", "Blue Bottle Coffee")
        .await;
    app.register_record("84.20", "2026-02-14", "Blue Bottle Coffee")
        .await;

    let response = app
        .post(&format!("/api/records/{}/matches", source))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let results: Vec<Value> = response.json().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["overall_confidence"], 100.0);
    assert_eq!(results[0]["method"], "exact");
    assert!(results[0]["discrepancies"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn five_percent_amount_difference_is_fuzzy_with_a_medium_discrepancy() {
    let app = spawn_app().await;
    let source = app
        .register_record("100.00", "2026-02-14", "Acme Supplies")
        .await;
    app.register_record("105.00", "2026-02-14", "Acme Supplies")
        .await;

    let response = app
        .post(&format!("/api/records/{}/matches", source))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    let results: Vec<Value> = response.json().await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["overall_confidence"], 81.0);
    assert_eq!(results[0]["method"], "fuzzy");

    let discrepancies = results[0]["discrepancies"].as_array().unwrap();
    assert_eq!(discrepancies.len(), 1);
    assert_eq!(discrepancies[0]["field"], "amount");
    assert_eq!(discrepancies[0]["severity"], "medium");
}

#[tokio::test]
async fn candidates_below_the_threshold_yield_an_empty_list() {
    let app = spawn_app().await;
    let source = app
        .register_record("100.00", "2026-02-14", "Acme Supplies")
        .await;
    app.register_record("900.00", "2026-01-01", "Unrelated Vendor")
        .await;

    let response = app
        .post(&format!("/api/records/{}/matches", source))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    // No match is an empty result list, never an error.
    assert_eq!(response.status(), 200);
    let results: Vec<Value> = response.json().await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn confirmed_records_leave_the_candidate_pool() {
    let app = spawn_app().await;
    let source = app
        .register_record("84.20", "2026-02-14", "Blue Bottle Coffee")
        .await;
    app.register_record("84.20", "2026-02-14", "Blue Bottle Coffee")
        .await;

    // Auto-confirm the pair.
    let response = app
        .post(&format!("/api/records/{}/process", source))
        .json(&json!({ "submitter_id": Uuid::new_v4() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["outcome"], "auto_confirmed");

    // A new identical record now finds nothing to match against.
    let newcomer = app
        .register_record("84.20", "2026-02-14", "Blue Bottle Coffee")
        .await;
    let response = app
        .post(&format!("/api/records/{}/matches", newcomer))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    let results: Vec<Value> = response.json().await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn a_lower_threshold_widens_the_result_list() {
    let app = spawn_app().await;
    let source = app
        .register_record("100.00", "2026-02-14", "Acme Supplies")
        .await;
    // Scores 70 under the default rule: full amount and vendor, zero date.
    app.register_record("100.00", "2026-02-15", "Acme Supplies")
        .await;
    // Scores 62: the small amount drift drops it under the default cutoff.
    app.register_record("102.00", "2026-02-15", "Acme Supplies")
        .await;

    let strict = app
        .post(&format!("/api/records/{}/matches", source))
        .json(&json!({ "threshold": 70.0 }))
        .send()
        .await
        .unwrap();
    let strict: Vec<Value> = strict.json().await.unwrap();
    assert_eq!(strict.len(), 1);

    let loose = app
        .post(&format!("/api/records/{}/matches", source))
        .json(&json!({ "threshold": 60.0 }))
        .send()
        .await
        .unwrap();
    let loose: Vec<Value> = loose.json().await.unwrap();
    assert_eq!(loose.len(), 2);
}

#[tokio::test]
async fn tenant_isolation_for_records() {
    let app = spawn_app().await;
    let source = app
        .register_record("84.20", "2026-02-14", "Blue Bottle Coffee")
        .await;

    let other_tenant = TestApp {
        address: app.address.clone(),
        client: reqwest::Client::new(),
        tenant_id: Uuid::new_v4(),
    };
    let response = other_tenant
        .post(&format!("/api/records/{}/matches", source))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn missing_tenant_header_is_a_bad_request() {
    let app = spawn_app().await;
    let response = app
        .client
        .get(format!("{}/api/records", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

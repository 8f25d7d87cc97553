//! Integration tests for approval policy operations.

mod common;

use common::spawn_app;
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn create_two_level_policy() {
    let app = spawn_app().await;

    let response = app
        .post("/api/policies")
        .json(&json!({
            "name": "High value spend",
            "priority": 1,
            "conditions": [
                { "field": "amount", "operator": "gt", "value": "500" }
            ],
            "action": "require_approval",
            "approver_levels": [
                { "level": 1, "approver_id": Uuid::new_v4(), "is_required": true, "can_delegate": true },
                { "level": 2, "approver_id": Uuid::new_v4(), "is_required": true, "can_delegate": false }
            ],
            "escalation": { "action": "notify_only", "extend_hours": 24 }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201, "Expected 201, got: {:?}", response);

    let policy: Value = response.json().await.unwrap();
    assert_eq!(policy["action"], "require_approval");
    assert_eq!(policy["approver_levels"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_vendor_regex_is_rejected() {
    let app = spawn_app().await;

    let response = app
        .post("/api/policies")
        .json(&json!({
            "name": "Bad pattern",
            "conditions": [
                { "field": "vendor", "operator": "matches", "value": "[invalid(regex" }
            ],
            "action": "auto_approve"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn approver_levels_must_be_contiguous_from_one() {
    let app = spawn_app().await;

    let response = app
        .post("/api/policies")
        .json(&json!({
            "name": "Gapped levels",
            "action": "require_approval",
            "approver_levels": [
                { "level": 1, "approver_id": Uuid::new_v4(), "is_required": true, "can_delegate": false },
                { "level": 3, "approver_id": Uuid::new_v4(), "is_required": true, "can_delegate": false }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn require_approval_needs_at_least_one_level() {
    let app = spawn_app().await;

    let response = app
        .post("/api/policies")
        .json(&json!({
            "name": "Nobody to ask",
            "action": "require_approval",
            "approver_levels": []
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn amount_conditions_require_numeric_values() {
    let app = spawn_app().await;

    let response = app
        .post("/api/policies")
        .json(&json!({
            "name": "Typed wrong",
            "conditions": [
                { "field": "amount", "operator": "gt", "value": "lots of money" }
            ],
            "action": "auto_approve"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn policies_are_listed_in_rank_order() {
    let app = spawn_app().await;

    for (name, priority) in [("Catch-all", 100), ("High value", 1)] {
        let response = app
            .post("/api/policies")
            .json(&json!({ "name": name, "priority": priority, "action": "auto_approve" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
    }

    let response = app.get("/api/policies").send().await.unwrap();
    let policies: Vec<Value> = response.json().await.unwrap();
    assert_eq!(policies.len(), 2);
    assert_eq!(policies[0]["name"], "High value");
    assert_eq!(policies[1]["name"], "Catch-all");
}

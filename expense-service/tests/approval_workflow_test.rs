//! Integration tests for the approval workflow state machine.

mod common;

use common::{catch_all_policy_payload, spawn_app};
use serde_json::{json, Value};
use uuid::Uuid;

async fn create_policy(app: &common::TestApp, payload: &Value) {
    let response = app.post("/api/policies").json(payload).send().await.unwrap();
    assert_eq!(response.status(), 201, "policy create failed");
}

async fn submit(app: &common::TestApp, expense_id: Uuid) -> Value {
    let response = app
        .post(&format!("/api/expenses/{}/submit", expense_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200, "submit failed");
    response.json().await.unwrap()
}

async fn decide(
    app: &common::TestApp,
    request_id: &str,
    approver_id: Uuid,
    decision: &str,
) -> reqwest::Response {
    app.post(&format!("/api/approvals/{}/decisions", request_id))
        .json(&json!({ "approver_id": approver_id, "decision": decision }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn two_level_policy_walks_through_to_approved() {
    let app = spawn_app().await;
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let director = Uuid::new_v4();

    create_policy(
        &app,
        &json!({
            "name": "Two level sign-off",
            "priority": 1,
            "action": "require_approval",
            "approver_levels": [
                { "level": 1, "approver_id": first, "is_required": true, "can_delegate": true },
                { "level": 1, "approver_id": second, "is_required": true, "can_delegate": true },
                { "level": 2, "approver_id": director, "is_required": true, "can_delegate": false }
            ]
        }),
    )
    .await;

    let expense_id = app.create_expense(Uuid::new_v4(), "900.00").await;
    let outcome = submit(&app, expense_id).await;
    assert_eq!(outcome["outcome"], "pending_approval");
    let request_id = outcome["request"]["request_id"].as_str().unwrap().to_string();
    assert_eq!(outcome["request"]["current_level"], 1);
    assert_eq!(outcome["request"]["total_levels"], 2);

    let response = decide(&app, &request_id, first, "approve").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    // One of two required approvers is not enough to advance.
    assert_eq!(body["current_level"], 1);
    assert_eq!(body["status"], "pending");

    let response = decide(&app, &request_id, second, "approve").await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["current_level"], 2);
    assert_eq!(body["status"], "pending");

    let response = decide(&app, &request_id, director, "approve").await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "approved");
    assert!(body["completed_utc"].is_string());

    let expense: Value = app
        .get(&format!("/api/expenses/{}", expense_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(expense["status"], "verified");
}

#[tokio::test]
async fn rejection_is_terminal_and_replays_conflict() {
    let app = spawn_app().await;
    let approver = Uuid::new_v4();
    let bystander = Uuid::new_v4();

    create_policy(
        &app,
        &json!({
            "name": "Single level",
            "action": "require_approval",
            "approver_levels": [
                { "level": 1, "approver_id": approver, "is_required": true, "can_delegate": false },
                { "level": 1, "approver_id": bystander, "is_required": false, "can_delegate": false }
            ]
        }),
    )
    .await;

    let expense_id = app.create_expense(Uuid::new_v4(), "250.00").await;
    let outcome = submit(&app, expense_id).await;
    let request_id = outcome["request"]["request_id"].as_str().unwrap().to_string();

    let response = decide(&app, &request_id, approver, "reject").await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "rejected");

    // Any further decision on the settled request is a conflict.
    let replay = decide(&app, &request_id, bystander, "approve").await;
    assert_eq!(replay.status(), 409);

    let expense: Value = app
        .get(&format!("/api/expenses/{}", expense_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(expense["status"], "rejected");
}

#[tokio::test]
async fn replaying_an_applied_approval_conflicts() {
    let app = spawn_app().await;
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    create_policy(
        &app,
        &json!({
            "name": "Dual sign-off",
            "action": "require_approval",
            "approver_levels": [
                { "level": 1, "approver_id": first, "is_required": true, "can_delegate": false },
                { "level": 1, "approver_id": second, "is_required": true, "can_delegate": false }
            ]
        }),
    )
    .await;

    let expense_id = app.create_expense(Uuid::new_v4(), "250.00").await;
    let outcome = submit(&app, expense_id).await;
    let request_id = outcome["request"]["request_id"].as_str().unwrap().to_string();

    assert_eq!(decide(&app, &request_id, first, "approve").await.status(), 200);
    assert_eq!(decide(&app, &request_id, first, "approve").await.status(), 409);
}

#[tokio::test]
async fn level_two_cannot_act_before_level_one_completes() {
    let app = spawn_app().await;
    let first = Uuid::new_v4();
    let director = Uuid::new_v4();

    create_policy(
        &app,
        &json!({
            "name": "Chain",
            "action": "require_approval",
            "approver_levels": [
                { "level": 1, "approver_id": first, "is_required": true, "can_delegate": false },
                { "level": 2, "approver_id": director, "is_required": true, "can_delegate": false }
            ]
        }),
    )
    .await;

    let expense_id = app.create_expense(Uuid::new_v4(), "250.00").await;
    let outcome = submit(&app, expense_id).await;
    let request_id = outcome["request"]["request_id"].as_str().unwrap().to_string();

    let early = decide(&app, &request_id, director, "approve").await;
    assert_eq!(early.status(), 401);
}

#[tokio::test]
async fn delegation_appends_to_the_audit_trail() {
    let app = spawn_app().await;
    let manager = Uuid::new_v4();
    let deputy = Uuid::new_v4();

    create_policy(&app, &catch_all_policy_payload(manager)).await;

    let expense_id = app.create_expense(Uuid::new_v4(), "250.00").await;
    let outcome = submit(&app, expense_id).await;
    let request_id = outcome["request"]["request_id"].as_str().unwrap().to_string();

    let response = app
        .post(&format!("/api/approvals/{}/decisions", request_id))
        .json(&json!({
            "approver_id": manager,
            "decision": "delegate",
            "delegate_to": deputy,
            "comments": "out of office this week"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();

    let entries = body["approvers"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["status"], "delegated");
    assert_eq!(entries[0]["delegated_to"], deputy.to_string());
    assert_eq!(entries[1]["status"], "pending");
    assert_eq!(entries[1]["approver_id"], deputy.to_string());

    let response = decide(&app, &request_id, deputy, "approve").await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "approved");
}

#[tokio::test]
async fn auto_approve_policy_skips_the_request() {
    let app = spawn_app().await;
    create_policy(
        &app,
        &json!({ "name": "Trusted", "action": "auto_approve" }),
    )
    .await;

    let expense_id = app.create_expense(Uuid::new_v4(), "45.00").await;
    let outcome = submit(&app, expense_id).await;
    assert_eq!(outcome["outcome"], "auto_approved");

    let expense: Value = app
        .get(&format!("/api/expenses/{}", expense_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(expense["status"], "verified");
}

#[tokio::test]
async fn submission_without_a_policy_is_a_client_error() {
    let app = spawn_app().await;
    let expense_id = app.create_expense(Uuid::new_v4(), "45.00").await;

    let response = app
        .post(&format!("/api/expenses/{}/submit", expense_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn only_the_submitter_may_withdraw() {
    let app = spawn_app().await;
    let approver = Uuid::new_v4();
    let submitter = Uuid::new_v4();

    create_policy(&app, &catch_all_policy_payload(approver)).await;
    let expense_id = app.create_expense(submitter, "250.00").await;
    let outcome = submit(&app, expense_id).await;
    let request_id = outcome["request"]["request_id"].as_str().unwrap().to_string();

    let stranger = app
        .post(&format!("/api/approvals/{}/withdraw", request_id))
        .json(&json!({ "submitter_id": Uuid::new_v4() }))
        .send()
        .await
        .unwrap();
    assert_eq!(stranger.status(), 401);

    let withdrawn = app
        .post(&format!("/api/approvals/{}/withdraw", request_id))
        .json(&json!({ "submitter_id": submitter }))
        .send()
        .await
        .unwrap();
    assert_eq!(withdrawn.status(), 200);
    let body: Value = withdrawn.json().await.unwrap();
    assert_eq!(body["status"], "withdrawn");
}

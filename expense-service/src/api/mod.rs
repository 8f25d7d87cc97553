//! HTTP API for expense-service.
//!
//! Thin handlers over the repositories and the matching/approval cores.
//! Tenancy rides on the `x-tenant-id` header for every domain route.

use crate::error::ExpenseError;
use crate::models::{
    ApprovalPolicy, ApproverLevel, Decision, EscalationRule, Expense, ExpenseStatus,
    ExtractedReceipt, MatchCondition, MatchableRecord, MatchingRule, PolicyAction,
    PolicyCondition, RecordSource, RecordStatus, ToleranceKind,
};
use crate::services::orchestrator::rule_cache_key;
use crate::startup::AppState;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::{request::Parts, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{async_trait, Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;

pub const TENANT_ID_HEADER: &str = "x-tenant-id";

/// Tenant scope extracted from the `x-tenant-id` header.
pub struct TenantId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for TenantId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(TENANT_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("missing {} header", TENANT_ID_HEADER))
            })?;
        let tenant_id = Uuid::parse_str(header).map_err(|_| {
            AppError::BadRequest(anyhow::anyhow!("invalid {} header", TENANT_ID_HEADER))
        })?;
        Ok(TenantId(tenant_id))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/records", post(register_record).get(list_records))
        .route("/api/records/:record_id/matches", post(find_record_matches))
        .route("/api/records/:record_id/process", post(process_record))
        .route("/api/expenses", post(create_expense))
        .route("/api/expenses/:expense_id", get(get_expense))
        .route("/api/expenses/:expense_id/submit", post(submit_expense))
        .route("/api/rules", post(create_matching_rule).get(list_matching_rules))
        .route(
            "/api/policies",
            post(create_approval_policy).get(list_approval_policies),
        )
        .route("/api/approvals/:request_id", get(get_approval_request))
        .route("/api/approvals/:request_id/decisions", post(decide_approval))
        .route("/api/approvals/:request_id/withdraw", post(withdraw_approval))
        .route("/api/escalations", get(list_escalations))
        .route("/api/escalations/sweep", post(run_escalation_sweep))
}

// ============================================================================
// Record Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateRecordRequest {
    pub source: RecordSource,
    pub record_date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub vendor: String,
    /// Present when the record was normalized out of an OCR extraction;
    /// the raw text itself stays with the document pipeline.
    #[serde(default)]
    pub extraction: Option<ExtractedReceipt>,
}

async fn register_record(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Json(req): Json<CreateRecordRequest>,
) -> Result<impl IntoResponse, ExpenseError> {
    if req.currency.trim().is_empty() {
        return Err(ExpenseError::Invalid("currency must not be empty".to_string()));
    }

    if let Some(extraction) = &req.extraction {
        tracing::debug!(
            provider = %extraction.provider,
            extraction_confidence = extraction.extraction_confidence,
            "Record derived from extracted receipt"
        );
    }

    let record = MatchableRecord {
        record_id: Uuid::new_v4(),
        tenant_id,
        source: req.source.as_str().to_string(),
        record_date: req.record_date,
        amount: req.amount,
        currency: req.currency,
        description: req.description,
        vendor: req.vendor,
        status: RecordStatus::Available.as_str().to_string(),
        extraction_confidence: req.extraction.map(|e| e.extraction_confidence),
        created_utc: Utc::now(),
    };
    let record = state.records.insert(record).await?;
    tracing::info!(record_id = %record.record_id, source = %record.source, "Record imported");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_records(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
) -> Result<impl IntoResponse, ExpenseError> {
    let records = state.records.list(tenant_id).await?;
    Ok(Json(records))
}

#[derive(Debug, Deserialize)]
pub struct FindMatchesRequest {
    #[serde(default)]
    pub threshold: Option<f64>,
}

async fn find_record_matches(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(record_id): Path<Uuid>,
    Json(req): Json<FindMatchesRequest>,
) -> Result<impl IntoResponse, ExpenseError> {
    let results = state
        .orchestrator
        .find_matches_for(tenant_id, record_id, req.threshold)
        .await?;
    Ok(Json(results))
}

#[derive(Debug, Deserialize)]
pub struct ProcessRecordRequest {
    pub submitter_id: Uuid,
    #[serde(default)]
    pub category: Option<String>,
}

async fn process_record(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(record_id): Path<Uuid>,
    Json(req): Json<ProcessRecordRequest>,
) -> Result<impl IntoResponse, ExpenseError> {
    let outcome = state
        .orchestrator
        .process_record(tenant_id, record_id, req.submitter_id, req.category, Utc::now())
        .await?;
    Ok(Json(outcome))
}

// ============================================================================
// Expense Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateExpenseRequest {
    pub submitter_id: Uuid,
    pub expense_date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub description: String,
}

fn default_category() -> String {
    "uncategorized".to_string()
}

async fn create_expense(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Json(req): Json<CreateExpenseRequest>,
) -> Result<impl IntoResponse, ExpenseError> {
    if req.currency.trim().is_empty() {
        return Err(ExpenseError::Invalid("currency must not be empty".to_string()));
    }

    let expense = Expense {
        expense_id: Uuid::new_v4(),
        tenant_id,
        submitter_id: req.submitter_id,
        expense_date: req.expense_date,
        amount: req.amount,
        currency: req.currency,
        category: req.category,
        vendor: req.vendor,
        description: req.description,
        status: ExpenseStatus::PendingReview.as_str().to_string(),
        created_utc: Utc::now(),
    };
    let expense = state.expenses.insert(expense).await?;
    tracing::info!(expense_id = %expense.expense_id, "Expense created");
    Ok((StatusCode::CREATED, Json(expense)))
}

async fn get_expense(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(expense_id): Path<Uuid>,
) -> Result<impl IntoResponse, ExpenseError> {
    let expense = state
        .expenses
        .get(tenant_id, expense_id)
        .await?
        .ok_or_else(|| ExpenseError::NotFound("expense".to_string()))?;
    Ok(Json(expense))
}

async fn submit_expense(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(expense_id): Path<Uuid>,
) -> Result<impl IntoResponse, ExpenseError> {
    let outcome = state
        .orchestrator
        .submit_expense(tenant_id, expense_id, Utc::now())
        .await?;
    Ok(Json(outcome))
}

// ============================================================================
// Matching Rule Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateMatchingRuleRequest {
    pub name: String,
    #[serde(default = "default_rule_priority")]
    pub priority: i32,
    #[serde(default)]
    pub conditions: Vec<MatchCondition>,
    #[serde(default)]
    pub amount_tolerance: Decimal,
    #[serde(default = "default_tolerance_kind")]
    pub tolerance_kind: ToleranceKind,
    #[serde(default)]
    pub date_tolerance_days: i64,
    #[serde(default = "default_amount_weight")]
    pub amount_weight: f64,
    #[serde(default = "default_date_weight")]
    pub date_weight: f64,
    #[serde(default = "default_vendor_weight")]
    pub vendor_weight: f64,
    #[serde(default = "default_minimum_score")]
    pub minimum_score: f64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_rule_priority() -> i32 {
    10
}

fn default_tolerance_kind() -> ToleranceKind {
    ToleranceKind::Fixed
}

fn default_amount_weight() -> f64 {
    0.4
}

fn default_date_weight() -> f64 {
    0.3
}

fn default_vendor_weight() -> f64 {
    0.3
}

fn default_minimum_score() -> f64 {
    90.0
}

fn default_active() -> bool {
    true
}

async fn create_matching_rule(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Json(req): Json<CreateMatchingRuleRequest>,
) -> Result<impl IntoResponse, ExpenseError> {
    let rule = MatchingRule {
        rule_id: Uuid::new_v4(),
        tenant_id,
        name: req.name,
        priority: req.priority,
        conditions: req.conditions,
        amount_tolerance: req.amount_tolerance,
        tolerance_kind: req.tolerance_kind,
        date_tolerance_days: req.date_tolerance_days,
        amount_weight: req.amount_weight,
        date_weight: req.date_weight,
        vendor_weight: req.vendor_weight,
        minimum_score: req.minimum_score,
        is_active: req.is_active,
        created_utc: Utc::now(),
    };
    rule.validate()?;

    let rule = state.rules.insert(rule).await?;
    state.rule_cache.invalidate(&rule_cache_key(tenant_id));
    tracing::info!(rule_id = %rule.rule_id, priority = rule.priority, "Matching rule created");
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn list_matching_rules(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
) -> Result<impl IntoResponse, ExpenseError> {
    let rules = state.rules.list(tenant_id).await?;
    Ok(Json(rules))
}

// ============================================================================
// Approval Policy Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateApprovalPolicyRequest {
    pub name: String,
    #[serde(default = "default_policy_priority")]
    pub priority: i32,
    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,
    pub action: PolicyAction,
    #[serde(default)]
    pub approver_levels: Vec<ApproverLevel>,
    #[serde(default)]
    pub escalation: EscalationRule,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_policy_priority() -> i32 {
    100
}

async fn create_approval_policy(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Json(req): Json<CreateApprovalPolicyRequest>,
) -> Result<impl IntoResponse, ExpenseError> {
    let policy = ApprovalPolicy {
        policy_id: Uuid::new_v4(),
        tenant_id,
        name: req.name,
        priority: req.priority,
        conditions: req.conditions,
        action: req.action,
        approver_levels: req.approver_levels,
        escalation: req.escalation,
        is_active: req.is_active,
        created_utc: Utc::now(),
    };
    policy.validate()?;

    let policy = state.policies.insert(policy).await?;
    tracing::info!(policy_id = %policy.policy_id, action = %policy.action.as_str(), "Approval policy created");
    Ok((StatusCode::CREATED, Json(policy)))
}

async fn list_approval_policies(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
) -> Result<impl IntoResponse, ExpenseError> {
    let policies = state.policies.list(tenant_id).await?;
    Ok(Json(policies))
}

// ============================================================================
// Approval Request Handlers
// ============================================================================

async fn get_approval_request(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, ExpenseError> {
    let request = state
        .approvals
        .get(tenant_id, request_id)
        .await?
        .ok_or_else(|| ExpenseError::NotFound("approval request".to_string()))?;
    Ok(Json(request))
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub approver_id: Uuid,
    pub decision: Decision,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub delegate_to: Option<Uuid>,
}

async fn decide_approval(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(request_id): Path<Uuid>,
    Json(req): Json<DecisionRequest>,
) -> Result<impl IntoResponse, ExpenseError> {
    let request = state
        .workflow
        .decide(
            tenant_id,
            request_id,
            req.approver_id,
            req.decision,
            req.comments,
            req.delegate_to,
            Utc::now(),
        )
        .await?;
    Ok(Json(request))
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub submitter_id: Uuid,
}

async fn withdraw_approval(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Path(request_id): Path<Uuid>,
    Json(req): Json<WithdrawRequest>,
) -> Result<impl IntoResponse, ExpenseError> {
    let request = state
        .workflow
        .withdraw(tenant_id, request_id, req.submitter_id, Utc::now())
        .await?;
    Ok(Json(request))
}

// ============================================================================
// Escalation Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EscalationsQuery {
    #[serde(default)]
    pub due_before: Option<DateTime<Utc>>,
}

async fn list_escalations(
    State(state): State<AppState>,
    TenantId(tenant_id): TenantId,
    Query(query): Query<EscalationsQuery>,
) -> Result<impl IntoResponse, ExpenseError> {
    let due = state
        .workflow
        .check_escalations(query.due_before.unwrap_or_else(Utc::now))
        .await?;
    let scoped: Vec<_> = due.into_iter().filter(|r| r.tenant_id == tenant_id).collect();
    Ok(Json(scoped))
}

/// Operational endpoint for the scheduler collaborator: applies every
/// overdue request's escalation rule across tenants.
async fn run_escalation_sweep(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ExpenseError> {
    let actioned = state.workflow.escalate_due(Utc::now()).await?;
    Ok(Json(actioned))
}

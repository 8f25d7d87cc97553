//! Postgres-backed repositories for expense-service.
//!
//! Flat aggregates (records, expenses) map straight onto rows; condition
//! chains, approver entries and comment trails are stored as JSONB. The
//! approval-request `version` column backs the optimistic-concurrency CAS
//! the workflow relies on.

use crate::error::ExpenseError;
use crate::models::{
    ApprovalComment, ApprovalEntry, ApprovalPolicy, ApprovalRequest, ApproverLevel,
    EscalationRule, Expense, ExpenseStatus, MatchCondition, MatchDiscrepancy, MatchMethod,
    MatchResult, MatchableRecord, MatchingRule, PolicyAction, PolicyCondition, RecordStatus,
    RequestStatus, ToleranceKind,
};
use crate::repository::{
    ApprovalRepository, ExpenseRepository, MatchRepository, PolicyRepository, RecordRepository,
    RuleRepository,
};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const RECORD_COLUMNS: &str = "record_id, tenant_id, source, record_date, amount, currency, description, vendor, status, extraction_confidence, created_utc";
const EXPENSE_COLUMNS: &str = "expense_id, tenant_id, submitter_id, expense_date, amount, currency, category, vendor, description, status, created_utc";
const RULE_COLUMNS: &str = "rule_id, tenant_id, name, priority, conditions, amount_tolerance, tolerance_kind, date_tolerance_days, amount_weight, date_weight, vendor_weight, minimum_score, is_active, created_utc";
const POLICY_COLUMNS: &str = "policy_id, tenant_id, name, priority, conditions, action, approver_levels, escalation, is_active, created_utc";
const RESULT_COLUMNS: &str = "result_id, tenant_id, source_id, candidate_id, version, overall_confidence, amount_score, date_score, vendor_score, discrepancies, method, rule_id, matched_utc";
const REQUEST_COLUMNS: &str = "request_id, tenant_id, expense_id, policy_id, status, current_level, total_levels, approvers, comments, submitted_utc, expires_utc, completed_utc, escalated, version";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "expense-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, ExpenseError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| ExpenseError::Database(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<(), ExpenseError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| ExpenseError::Database(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), ExpenseError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ExpenseError::Database(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

// ============================================================================
// Row Adapters
// ============================================================================

#[derive(FromRow)]
struct MatchingRuleRow {
    rule_id: Uuid,
    tenant_id: Uuid,
    name: String,
    priority: i32,
    conditions: Json<Vec<MatchCondition>>,
    amount_tolerance: Decimal,
    tolerance_kind: String,
    date_tolerance_days: i64,
    amount_weight: f64,
    date_weight: f64,
    vendor_weight: f64,
    minimum_score: f64,
    is_active: bool,
    created_utc: DateTime<Utc>,
}

impl From<MatchingRuleRow> for MatchingRule {
    fn from(row: MatchingRuleRow) -> Self {
        Self {
            rule_id: row.rule_id,
            tenant_id: row.tenant_id,
            name: row.name,
            priority: row.priority,
            conditions: row.conditions.0,
            amount_tolerance: row.amount_tolerance,
            tolerance_kind: ToleranceKind::from_str(&row.tolerance_kind),
            date_tolerance_days: row.date_tolerance_days,
            amount_weight: row.amount_weight,
            date_weight: row.date_weight,
            vendor_weight: row.vendor_weight,
            minimum_score: row.minimum_score,
            is_active: row.is_active,
            created_utc: row.created_utc,
        }
    }
}

#[derive(FromRow)]
struct ApprovalPolicyRow {
    policy_id: Uuid,
    tenant_id: Uuid,
    name: String,
    priority: i32,
    conditions: Json<Vec<PolicyCondition>>,
    action: String,
    approver_levels: Json<Vec<ApproverLevel>>,
    escalation: Json<EscalationRule>,
    is_active: bool,
    created_utc: DateTime<Utc>,
}

impl From<ApprovalPolicyRow> for ApprovalPolicy {
    fn from(row: ApprovalPolicyRow) -> Self {
        Self {
            policy_id: row.policy_id,
            tenant_id: row.tenant_id,
            name: row.name,
            priority: row.priority,
            conditions: row.conditions.0,
            action: PolicyAction::from_str(&row.action),
            approver_levels: row.approver_levels.0,
            escalation: row.escalation.0,
            is_active: row.is_active,
            created_utc: row.created_utc,
        }
    }
}

#[derive(FromRow)]
struct MatchResultRow {
    result_id: Uuid,
    tenant_id: Uuid,
    source_id: Uuid,
    candidate_id: Uuid,
    version: i32,
    overall_confidence: f64,
    amount_score: f64,
    date_score: f64,
    vendor_score: f64,
    discrepancies: Json<Vec<MatchDiscrepancy>>,
    method: String,
    rule_id: Option<Uuid>,
    matched_utc: DateTime<Utc>,
}

impl From<MatchResultRow> for MatchResult {
    fn from(row: MatchResultRow) -> Self {
        Self {
            result_id: row.result_id,
            tenant_id: row.tenant_id,
            source_id: row.source_id,
            candidate_id: row.candidate_id,
            version: row.version,
            overall_confidence: row.overall_confidence,
            amount_score: row.amount_score,
            date_score: row.date_score,
            vendor_score: row.vendor_score,
            discrepancies: row.discrepancies.0,
            method: MatchMethod::from_str(&row.method),
            rule_id: row.rule_id,
            matched_utc: row.matched_utc,
        }
    }
}

#[derive(FromRow)]
struct ApprovalRequestRow {
    request_id: Uuid,
    tenant_id: Uuid,
    expense_id: Uuid,
    policy_id: Uuid,
    status: String,
    current_level: i32,
    total_levels: i32,
    approvers: Json<Vec<ApprovalEntry>>,
    comments: Json<Vec<ApprovalComment>>,
    submitted_utc: DateTime<Utc>,
    expires_utc: DateTime<Utc>,
    completed_utc: Option<DateTime<Utc>>,
    escalated: bool,
    version: i32,
}

impl From<ApprovalRequestRow> for ApprovalRequest {
    fn from(row: ApprovalRequestRow) -> Self {
        Self {
            request_id: row.request_id,
            tenant_id: row.tenant_id,
            expense_id: row.expense_id,
            policy_id: row.policy_id,
            status: RequestStatus::from_str(&row.status),
            current_level: row.current_level,
            total_levels: row.total_levels,
            approvers: row.approvers.0,
            comments: row.comments.0,
            submitted_utc: row.submitted_utc,
            expires_utc: row.expires_utc,
            completed_utc: row.completed_utc,
            escalated: row.escalated,
            version: row.version,
        }
    }
}

// ============================================================================
// Record Operations
// ============================================================================

#[async_trait]
impl RecordRepository for Database {
    #[instrument(skip(self, record), fields(record_id = %record.record_id))]
    async fn insert(&self, record: MatchableRecord) -> Result<MatchableRecord, ExpenseError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_record"])
            .start_timer();

        let stored = sqlx::query_as::<_, MatchableRecord>(&format!(
            r#"
            INSERT INTO matchable_records ({RECORD_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(record.record_id)
        .bind(record.tenant_id)
        .bind(&record.source)
        .bind(record.record_date)
        .bind(record.amount)
        .bind(&record.currency)
        .bind(&record.description)
        .bind(&record.vendor)
        .bind(&record.status)
        .bind(record.extraction_confidence)
        .bind(record.created_utc)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(stored)
    }

    async fn get(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
    ) -> Result<Option<MatchableRecord>, ExpenseError> {
        let record = sqlx::query_as::<_, MatchableRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM matchable_records WHERE record_id = $1 AND tenant_id = $2"
        ))
        .bind(record_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list(&self, tenant_id: Uuid) -> Result<Vec<MatchableRecord>, ExpenseError> {
        let records = sqlx::query_as::<_, MatchableRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM matchable_records WHERE tenant_id = $1 ORDER BY record_date"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn list_available(&self, tenant_id: Uuid) -> Result<Vec<MatchableRecord>, ExpenseError> {
        let records = sqlx::query_as::<_, MatchableRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM matchable_records
            WHERE tenant_id = $1 AND status = $2
            ORDER BY record_date
            "#
        ))
        .bind(tenant_id)
        .bind(RecordStatus::Available.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn set_status(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
        status: RecordStatus,
    ) -> Result<(), ExpenseError> {
        let result = sqlx::query(
            "UPDATE matchable_records SET status = $3 WHERE record_id = $1 AND tenant_id = $2",
        )
        .bind(record_id)
        .bind(tenant_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ExpenseError::NotFound("record".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Expense Operations
// ============================================================================

#[async_trait]
impl ExpenseRepository for Database {
    #[instrument(skip(self, expense), fields(expense_id = %expense.expense_id))]
    async fn insert(&self, expense: Expense) -> Result<Expense, ExpenseError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_expense"])
            .start_timer();

        let stored = sqlx::query_as::<_, Expense>(&format!(
            r#"
            INSERT INTO expenses ({EXPENSE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {EXPENSE_COLUMNS}
            "#
        ))
        .bind(expense.expense_id)
        .bind(expense.tenant_id)
        .bind(expense.submitter_id)
        .bind(expense.expense_date)
        .bind(expense.amount)
        .bind(&expense.currency)
        .bind(&expense.category)
        .bind(&expense.vendor)
        .bind(&expense.description)
        .bind(&expense.status)
        .bind(expense.created_utc)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(stored)
    }

    async fn get(
        &self,
        tenant_id: Uuid,
        expense_id: Uuid,
    ) -> Result<Option<Expense>, ExpenseError> {
        let expense = sqlx::query_as::<_, Expense>(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE expense_id = $1 AND tenant_id = $2"
        ))
        .bind(expense_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(expense)
    }

    async fn set_status(
        &self,
        tenant_id: Uuid,
        expense_id: Uuid,
        status: ExpenseStatus,
    ) -> Result<(), ExpenseError> {
        let result = sqlx::query(
            "UPDATE expenses SET status = $3 WHERE expense_id = $1 AND tenant_id = $2",
        )
        .bind(expense_id)
        .bind(tenant_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ExpenseError::NotFound("expense".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Matching Rule Operations
// ============================================================================

#[async_trait]
impl RuleRepository for Database {
    #[instrument(skip(self, rule), fields(rule_id = %rule.rule_id))]
    async fn insert(&self, rule: MatchingRule) -> Result<MatchingRule, ExpenseError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_rule"])
            .start_timer();

        let row = sqlx::query_as::<_, MatchingRuleRow>(&format!(
            r#"
            INSERT INTO matching_rules ({RULE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {RULE_COLUMNS}
            "#
        ))
        .bind(rule.rule_id)
        .bind(rule.tenant_id)
        .bind(&rule.name)
        .bind(rule.priority)
        .bind(Json(&rule.conditions))
        .bind(rule.amount_tolerance)
        .bind(rule.tolerance_kind.as_str())
        .bind(rule.date_tolerance_days)
        .bind(rule.amount_weight)
        .bind(rule.date_weight)
        .bind(rule.vendor_weight)
        .bind(rule.minimum_score)
        .bind(rule.is_active)
        .bind(rule.created_utc)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(row.into())
    }

    async fn get(
        &self,
        tenant_id: Uuid,
        rule_id: Uuid,
    ) -> Result<Option<MatchingRule>, ExpenseError> {
        let row = sqlx::query_as::<_, MatchingRuleRow>(&format!(
            "SELECT {RULE_COLUMNS} FROM matching_rules WHERE rule_id = $1 AND tenant_id = $2"
        ))
        .bind(rule_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self, tenant_id: Uuid) -> Result<Vec<MatchingRule>, ExpenseError> {
        let rows = sqlx::query_as::<_, MatchingRuleRow>(&format!(
            "SELECT {RULE_COLUMNS} FROM matching_rules WHERE tenant_id = $1 ORDER BY priority"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_active(&self, tenant_id: Uuid) -> Result<Vec<MatchingRule>, ExpenseError> {
        let rows = sqlx::query_as::<_, MatchingRuleRow>(&format!(
            r#"
            SELECT {RULE_COLUMNS} FROM matching_rules
            WHERE tenant_id = $1 AND is_active = TRUE
            ORDER BY priority
            "#
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// ============================================================================
// Approval Policy Operations
// ============================================================================

#[async_trait]
impl PolicyRepository for Database {
    #[instrument(skip(self, policy), fields(policy_id = %policy.policy_id))]
    async fn insert(&self, policy: ApprovalPolicy) -> Result<ApprovalPolicy, ExpenseError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_policy"])
            .start_timer();

        let row = sqlx::query_as::<_, ApprovalPolicyRow>(&format!(
            r#"
            INSERT INTO approval_policies ({POLICY_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {POLICY_COLUMNS}
            "#
        ))
        .bind(policy.policy_id)
        .bind(policy.tenant_id)
        .bind(&policy.name)
        .bind(policy.priority)
        .bind(Json(&policy.conditions))
        .bind(policy.action.as_str())
        .bind(Json(&policy.approver_levels))
        .bind(Json(&policy.escalation))
        .bind(policy.is_active)
        .bind(policy.created_utc)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(row.into())
    }

    async fn get(
        &self,
        tenant_id: Uuid,
        policy_id: Uuid,
    ) -> Result<Option<ApprovalPolicy>, ExpenseError> {
        let row = sqlx::query_as::<_, ApprovalPolicyRow>(&format!(
            "SELECT {POLICY_COLUMNS} FROM approval_policies WHERE policy_id = $1 AND tenant_id = $2"
        ))
        .bind(policy_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self, tenant_id: Uuid) -> Result<Vec<ApprovalPolicy>, ExpenseError> {
        let rows = sqlx::query_as::<_, ApprovalPolicyRow>(&format!(
            "SELECT {POLICY_COLUMNS} FROM approval_policies WHERE tenant_id = $1 ORDER BY priority"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_active(&self, tenant_id: Uuid) -> Result<Vec<ApprovalPolicy>, ExpenseError> {
        let rows = sqlx::query_as::<_, ApprovalPolicyRow>(&format!(
            r#"
            SELECT {POLICY_COLUMNS} FROM approval_policies
            WHERE tenant_id = $1 AND is_active = TRUE
            ORDER BY priority
            "#
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// ============================================================================
// Match Result Operations
// ============================================================================

#[async_trait]
impl MatchRepository for Database {
    #[instrument(skip(self, result), fields(source_id = %result.source_id, candidate_id = %result.candidate_id))]
    async fn insert(&self, result: MatchResult) -> Result<MatchResult, ExpenseError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_match_result"])
            .start_timer();

        // Version is assigned here: one past the latest stored decision
        // for the same pair, so prior results survive for audit.
        let row = sqlx::query_as::<_, MatchResultRow>(&format!(
            r#"
            INSERT INTO match_results ({RESULT_COLUMNS})
            VALUES (
                $1, $2, $3, $4,
                (SELECT COALESCE(MAX(version), 0) + 1 FROM match_results
                 WHERE tenant_id = $2 AND source_id = $3 AND candidate_id = $4),
                $5, $6, $7, $8, $9, $10, $11, $12
            )
            RETURNING {RESULT_COLUMNS}
            "#
        ))
        .bind(result.result_id)
        .bind(result.tenant_id)
        .bind(result.source_id)
        .bind(result.candidate_id)
        .bind(result.overall_confidence)
        .bind(result.amount_score)
        .bind(result.date_score)
        .bind(result.vendor_score)
        .bind(Json(&result.discrepancies))
        .bind(result.method.as_str())
        .bind(result.rule_id)
        .bind(result.matched_utc)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(row.into())
    }

    async fn list_for_source(
        &self,
        tenant_id: Uuid,
        source_id: Uuid,
    ) -> Result<Vec<MatchResult>, ExpenseError> {
        let rows = sqlx::query_as::<_, MatchResultRow>(&format!(
            r#"
            SELECT {RESULT_COLUMNS} FROM match_results
            WHERE tenant_id = $1 AND source_id = $2
            ORDER BY overall_confidence DESC, version DESC
            "#
        ))
        .bind(tenant_id)
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// ============================================================================
// Approval Request Operations
// ============================================================================

#[async_trait]
impl ApprovalRepository for Database {
    #[instrument(skip(self, request), fields(request_id = %request.request_id))]
    async fn insert(&self, request: ApprovalRequest) -> Result<ApprovalRequest, ExpenseError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_request"])
            .start_timer();

        let row = sqlx::query_as::<_, ApprovalRequestRow>(&format!(
            r#"
            INSERT INTO approval_requests ({REQUEST_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(request.request_id)
        .bind(request.tenant_id)
        .bind(request.expense_id)
        .bind(request.policy_id)
        .bind(request.status.as_str())
        .bind(request.current_level)
        .bind(request.total_levels)
        .bind(Json(&request.approvers))
        .bind(Json(&request.comments))
        .bind(request.submitted_utc)
        .bind(request.expires_utc)
        .bind(request.completed_utc)
        .bind(request.escalated)
        .bind(request.version)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(row.into())
    }

    async fn get(
        &self,
        tenant_id: Uuid,
        request_id: Uuid,
    ) -> Result<Option<ApprovalRequest>, ExpenseError> {
        let row = sqlx::query_as::<_, ApprovalRequestRow>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_requests WHERE request_id = $1 AND tenant_id = $2"
        ))
        .bind(request_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_by_expense(
        &self,
        tenant_id: Uuid,
        expense_id: Uuid,
    ) -> Result<Option<ApprovalRequest>, ExpenseError> {
        let row = sqlx::query_as::<_, ApprovalRequestRow>(&format!(
            r#"
            SELECT {REQUEST_COLUMNS} FROM approval_requests
            WHERE tenant_id = $1 AND expense_id = $2
            ORDER BY submitted_utc DESC
            LIMIT 1
            "#
        ))
        .bind(tenant_id)
        .bind(expense_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, request), fields(request_id = %request.request_id))]
    async fn update(
        &self,
        request: ApprovalRequest,
        expected_version: i32,
    ) -> Result<ApprovalRequest, ExpenseError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_request"])
            .start_timer();

        let row = sqlx::query_as::<_, ApprovalRequestRow>(&format!(
            r#"
            UPDATE approval_requests
            SET status = $3, current_level = $4, approvers = $5, comments = $6,
                expires_utc = $7, completed_utc = $8, escalated = $9, version = version + 1
            WHERE request_id = $1 AND tenant_id = $2 AND version = $10
            RETURNING {REQUEST_COLUMNS}
            "#
        ))
        .bind(request.request_id)
        .bind(request.tenant_id)
        .bind(request.status.as_str())
        .bind(request.current_level)
        .bind(Json(&request.approvers))
        .bind(Json(&request.comments))
        .bind(request.expires_utc)
        .bind(request.completed_utc)
        .bind(request.escalated)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();

        match row {
            Some(row) => Ok(row.into()),
            None => {
                let exists = sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM approval_requests WHERE request_id = $1 AND tenant_id = $2",
                )
                .bind(request.request_id)
                .bind(request.tenant_id)
                .fetch_one(&self.pool)
                .await?;
                if exists > 0 {
                    Err(ExpenseError::StaleRequest(format!(
                        "request {} was modified concurrently",
                        request.request_id
                    )))
                } else {
                    Err(ExpenseError::NotFound("approval request".to_string()))
                }
            }
        }
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRequest>, ExpenseError> {
        let rows = sqlx::query_as::<_, ApprovalRequestRow>(&format!(
            r#"
            SELECT {REQUEST_COLUMNS} FROM approval_requests
            WHERE status = $1 AND expires_utc <= $2
            ORDER BY expires_utc
            "#
        ))
        .bind(RequestStatus::Pending.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

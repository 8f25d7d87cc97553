//! Domain models for expense-service.

#![allow(clippy::should_implement_trait)]

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::{ValidationError, ValidationErrors};

// ============================================================================
// Matchable Record Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    BankTransaction,
    Receipt,
    Invoice,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BankTransaction => "bank_transaction",
            Self::Receipt => "receipt",
            Self::Invoice => "invoice",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "bank_transaction" => Self::BankTransaction,
            "receipt" => Self::Receipt,
            "invoice" => Self::Invoice,
            _ => Self::BankTransaction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Available,
    Matched,
    Excluded,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Matched => "matched",
            Self::Excluded => "excluded",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "available" => Self::Available,
            "matched" => Self::Matched,
            "excluded" => Self::Excluded,
            _ => Self::Available,
        }
    }
}

/// A normalized financial record: a staged bank transaction, a parsed
/// receipt, or an open invoice. Immutable once imported except `status`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MatchableRecord {
    pub record_id: Uuid,
    pub tenant_id: Uuid,
    pub source: String,
    pub record_date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub vendor: String,
    pub status: String,
    /// Confidence reported by the extraction service for records parsed
    /// out of receipt images; absent for records imported directly.
    pub extraction_confidence: Option<f64>,
    pub created_utc: DateTime<Utc>,
}

impl MatchableRecord {
    pub fn is_available(&self) -> bool {
        RecordStatus::from_str(&self.status) == RecordStatus::Available
    }
}

/// Raw output of the OCR extraction collaborator. The core never parses
/// this; an upstream normalizer turns it into a `MatchableRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedReceipt {
    pub raw_text: String,
    pub extraction_confidence: f64,
    pub provider: String,
}

// ============================================================================
// Matching Rule Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceKind {
    Fixed,
    Percentage,
}

impl ToleranceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Percentage => "percentage",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "fixed" => Self::Fixed,
            "percentage" => Self::Percentage,
            _ => Self::Fixed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    Amount,
    Date,
    Description,
    Vendor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOperator {
    WithinTolerance,
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

/// One predicate in a rule's condition chain. Chains evaluate left to
/// right with no precedence; each condition's `combinator` joins it to the
/// running result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCondition {
    pub field: MatchField,
    pub operator: MatchOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub combinator: Combinator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingRule {
    pub rule_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub priority: i32,
    pub conditions: Vec<MatchCondition>,
    pub amount_tolerance: Decimal,
    pub tolerance_kind: ToleranceKind,
    pub date_tolerance_days: i64,
    pub amount_weight: f64,
    pub date_weight: f64,
    pub vendor_weight: f64,
    pub minimum_score: f64,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

impl MatchingRule {
    /// Validate a rule at creation time. Unknown operator/field pairings
    /// are rejected here, never at evaluation time.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.name.trim().is_empty() {
            errors.add("name", validation_error("required", "name must not be empty"));
        }
        let weight_sum = self.amount_weight + self.date_weight + self.vendor_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            errors.add(
                "amount_weight",
                validation_error("weights_sum", "field weights must sum to 1.0"),
            );
        }
        if self.amount_weight < 0.0 || self.date_weight < 0.0 || self.vendor_weight < 0.0 {
            errors.add(
                "amount_weight",
                validation_error("weights_negative", "field weights must not be negative"),
            );
        }
        if self.amount_tolerance < Decimal::ZERO {
            errors.add(
                "amount_tolerance",
                validation_error("negative", "amount_tolerance must not be negative"),
            );
        }
        if self.date_tolerance_days < 0 {
            errors.add(
                "date_tolerance_days",
                validation_error("negative", "date_tolerance_days must not be negative"),
            );
        }
        if !(0.0..=100.0).contains(&self.minimum_score) {
            errors.add(
                "minimum_score",
                validation_error("range", "minimum_score must be within 0..=100"),
            );
        }
        for condition in &self.conditions {
            if let Err(e) = validate_match_condition(condition) {
                errors.add("conditions", e);
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn validate_match_condition(condition: &MatchCondition) -> Result<(), ValidationError> {
    match (condition.field, condition.operator) {
        (MatchField::Amount | MatchField::Date, MatchOperator::WithinTolerance) => {
            if condition.value.is_some() {
                return Err(validation_error(
                    "unexpected_value",
                    "within_tolerance conditions take no value",
                ));
            }
        }
        (MatchField::Description | MatchField::Vendor, MatchOperator::Contains) => {
            match condition.value.as_deref() {
                Some(v) if !v.trim().is_empty() => {}
                _ => {
                    return Err(validation_error(
                        "missing_value",
                        "contains conditions require a non-empty value",
                    ));
                }
            }
        }
        (field, operator) => {
            return Err(validation_error(
                "unknown_operator",
                format!("operator {:?} is not valid for field {:?}", operator, field),
            ));
        }
    }
    Ok(())
}

// ============================================================================
// Match Result Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Fuzzy,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "exact" => Self::Exact,
            "fuzzy" => Self::Fuzzy,
            _ => Self::Fuzzy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyField {
    Amount,
    Date,
    Vendor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancySeverity {
    Low,
    Medium,
    High,
}

/// A recorded difference between matched fields; severity drives review
/// prioritization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDiscrepancy {
    pub field: DiscrepancyField,
    pub source_value: String,
    pub candidate_value: String,
    pub difference: String,
    pub severity: DiscrepancySeverity,
}

/// Outcome of evaluating one (source, candidate) pair. Never mutated: a
/// new decision on the same pair is stored as a new result with an
/// incremented version, old versions kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub result_id: Uuid,
    pub tenant_id: Uuid,
    pub source_id: Uuid,
    pub candidate_id: Uuid,
    pub version: i32,
    pub overall_confidence: f64,
    pub amount_score: f64,
    pub date_score: f64,
    pub vendor_score: f64,
    pub discrepancies: Vec<MatchDiscrepancy>,
    pub method: MatchMethod,
    pub rule_id: Option<Uuid>,
    pub matched_utc: DateTime<Utc>,
}

// ============================================================================
// Expense Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    PendingReview,
    Verified,
    Rejected,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingReview => "pending_review",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending_review" => Self::PendingReview,
            "verified" => Self::Verified,
            "rejected" => Self::Rejected,
            _ => Self::PendingReview,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Expense {
    pub expense_id: Uuid,
    pub tenant_id: Uuid,
    pub submitter_id: Uuid,
    pub expense_date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    pub category: String,
    pub vendor: String,
    pub description: String,
    pub status: String,
    pub created_utc: DateTime<Utc>,
}

// ============================================================================
// Approval Policy Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    AutoApprove,
    RequireApproval,
    Reject,
}

impl PolicyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoApprove => "auto_approve",
            Self::RequireApproval => "require_approval",
            Self::Reject => "reject",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "auto_approve" => Self::AutoApprove,
            "require_approval" => Self::RequireApproval,
            "reject" => Self::Reject,
            _ => Self::RequireApproval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyField {
    Amount,
    Category,
    Vendor,
    Submitter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Matches,
}

/// Condition values are typed at load time: numeric for amount
/// comparisons, text for everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Number(Decimal),
    Text(String),
}

impl ConditionValue {
    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Text(t) => Some(t.as_str()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCondition {
    pub field: PolicyField,
    pub operator: PolicyOperator,
    pub value: ConditionValue,
    #[serde(default)]
    pub combinator: Combinator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    NotifyOnly,
    AutoApprove,
    AutoReject,
}

impl EscalationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotifyOnly => "notify_only",
            Self::AutoApprove => "auto_approve",
            Self::AutoReject => "auto_reject",
        }
    }
}

/// What the escalation sweep does to a request past its deadline.
/// `notify_only` extends the deadline once by `extend_hours`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRule {
    pub action: EscalationAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extend_hours: Option<i64>,
}

impl Default for EscalationRule {
    fn default() -> Self {
        Self {
            action: EscalationAction::NotifyOnly,
            extend_hours: None,
        }
    }
}

/// One approver slot in a policy. `max_amount` is the approver's authority
/// limit; approving above it is refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproverLevel {
    pub level: i32,
    pub approver_id: Uuid,
    pub is_required: bool,
    pub can_delegate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub policy_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub priority: i32,
    pub conditions: Vec<PolicyCondition>,
    pub action: PolicyAction,
    pub approver_levels: Vec<ApproverLevel>,
    #[serde(default)]
    pub escalation: EscalationRule,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

impl ApprovalPolicy {
    /// Validate a policy at creation time: closed condition sets, regex
    /// compilation, level structure. Never deferred to evaluation time.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.name.trim().is_empty() {
            errors.add("name", validation_error("required", "name must not be empty"));
        }
        for condition in &self.conditions {
            if let Err(e) = validate_policy_condition(condition) {
                errors.add("conditions", e);
            }
        }
        if self.action == PolicyAction::RequireApproval && self.approver_levels.is_empty() {
            errors.add(
                "approver_levels",
                validation_error(
                    "required",
                    "require_approval policies need at least one approver level",
                ),
            );
        }
        if let Err(e) = validate_approver_levels(&self.approver_levels) {
            errors.add("approver_levels", e);
        }
        if let Some(hours) = self.escalation.extend_hours {
            if hours <= 0 {
                errors.add(
                    "escalation",
                    validation_error("range", "extend_hours must be positive"),
                );
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn validate_policy_condition(condition: &PolicyCondition) -> Result<(), ValidationError> {
    use PolicyOperator::*;

    match condition.field {
        PolicyField::Amount => {
            if !matches!(condition.operator, Eq | Ne | Gt | Gte | Lt | Lte) {
                return Err(validation_error(
                    "unknown_operator",
                    format!("operator {:?} is not valid for amount", condition.operator),
                ));
            }
            if condition.value.as_number().is_none() {
                return Err(validation_error(
                    "value_type",
                    "amount conditions require a numeric value",
                ));
            }
        }
        PolicyField::Category | PolicyField::Vendor => {
            if !matches!(condition.operator, Eq | Ne | Contains | Matches) {
                return Err(validation_error(
                    "unknown_operator",
                    format!(
                        "operator {:?} is not valid for {:?}",
                        condition.operator, condition.field
                    ),
                ));
            }
            let Some(text) = condition.value.as_text() else {
                return Err(validation_error(
                    "value_type",
                    "text conditions require a string value",
                ));
            };
            if condition.operator == Matches && regex::Regex::new(text).is_err() {
                return Err(validation_error("invalid_regex", "invalid regex pattern"));
            }
        }
        PolicyField::Submitter => {
            if !matches!(condition.operator, Eq | Ne) {
                return Err(validation_error(
                    "unknown_operator",
                    format!("operator {:?} is not valid for submitter", condition.operator),
                ));
            }
            match condition.value.as_text() {
                Some(text) if Uuid::parse_str(text).is_ok() => {}
                _ => {
                    return Err(validation_error(
                        "value_type",
                        "submitter conditions require a uuid value",
                    ));
                }
            }
        }
    }
    Ok(())
}

fn validate_approver_levels(levels: &[ApproverLevel]) -> Result<(), ValidationError> {
    let mut distinct: Vec<i32> = levels.iter().map(|l| l.level).collect();
    distinct.sort_unstable();
    distinct.dedup();

    if let Some(first) = distinct.first() {
        if *first != 1 {
            return Err(validation_error("levels", "approver levels must start at 1"));
        }
    }
    for pair in distinct.windows(2) {
        if pair[1] != pair[0] + 1 {
            return Err(validation_error("levels", "approver levels must be contiguous"));
        }
    }
    for level in levels {
        if let Some(max) = level.max_amount {
            if max < Decimal::ZERO {
                return Err(validation_error("max_amount", "max_amount must not be negative"));
            }
        }
    }
    let mut seen: Vec<(i32, Uuid)> = Vec::with_capacity(levels.len());
    for level in levels {
        let key = (level.level, level.approver_id);
        if seen.contains(&key) {
            return Err(validation_error(
                "duplicate_approver",
                "an approver may appear only once per level",
            ));
        }
        seen.push(key);
    }
    Ok(())
}

// ============================================================================
// Approval Request Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Withdrawn,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Withdrawn => "withdrawn",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "expired" => Self::Expired,
            "withdrawn" => Self::Withdrawn,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != Self::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Approved,
    Rejected,
    Delegated,
    Expired,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Delegated => "delegated",
            Self::Expired => "expired",
        }
    }
}

/// Per-approver audit record. Entries transition one way out of `pending`
/// and are never deleted; delegation appends a new entry for the delegate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalEntry {
    pub approver_id: Uuid,
    pub level: i32,
    pub is_required: bool,
    pub can_delegate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<Decimal>,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_utc: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_to: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalComment {
    pub author_id: Uuid,
    pub body: String,
    pub created_utc: DateTime<Utc>,
}

/// Aggregate root for one expense's trip through the approval workflow.
/// `version` is the optimistic-concurrency token checked on every save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub request_id: Uuid,
    pub tenant_id: Uuid,
    pub expense_id: Uuid,
    pub policy_id: Uuid,
    pub status: RequestStatus,
    pub current_level: i32,
    pub total_levels: i32,
    pub approvers: Vec<ApprovalEntry>,
    pub comments: Vec<ApprovalComment>,
    pub submitted_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_utc: Option<DateTime<Utc>>,
    pub escalated: bool,
    pub version: i32,
}

impl ApprovalRequest {
    pub fn entries_at(&self, level: i32) -> impl Iterator<Item = &ApprovalEntry> {
        self.approvers.iter().filter(move |e| e.level == level)
    }

    /// Approver ids with a pending entry at the given level: the
    /// recipient set for level-scoped notifications.
    pub fn pending_approvers_at(&self, level: i32) -> Vec<Uuid> {
        self.entries_at(level)
            .filter(|e| e.status == EntryStatus::Pending)
            .map(|e| e.approver_id)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    Delegate,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Delegate => "delegate",
        }
    }
}

/// Workflow lifecycle events handed to the notification collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalEvent {
    Submitted,
    Approved,
    Rejected,
    LevelAdvance,
    Escalated,
}

impl ApprovalEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::LevelAdvance => "level_advance",
            Self::Escalated => "escalated",
        }
    }
}

/// Result of submitting an expense: auto-decided by policy action, or a
/// created request pending review.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    AutoApproved { expense_id: Uuid },
    AutoRejected { expense_id: Uuid },
    PendingApproval { request: ApprovalRequest },
}

// ============================================================================
// Utility Functions
// ============================================================================

fn validation_error(code: &'static str, message: impl Into<String>) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into().into());
    error
}

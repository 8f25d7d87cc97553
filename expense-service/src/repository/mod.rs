//! Repository contracts for the matching and approval cores.
//!
//! The engines never touch storage themselves; callers hand them state
//! fetched through these traits and persist what comes back. Two
//! implementations exist: `MemoryStore` (dev/tests) and the Postgres
//! `Database` in `services::database`.

pub mod cache;
pub mod memory;

pub use cache::TtlCache;
pub use memory::MemoryStore;

use crate::error::ExpenseError;
use crate::models::{
    ApprovalPolicy, ApprovalRequest, Expense, ExpenseStatus, MatchResult, MatchableRecord,
    MatchingRule, RecordStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait RecordRepository: Send + Sync {
    async fn insert(&self, record: MatchableRecord) -> Result<MatchableRecord, ExpenseError>;
    async fn get(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
    ) -> Result<Option<MatchableRecord>, ExpenseError>;
    async fn list(&self, tenant_id: Uuid) -> Result<Vec<MatchableRecord>, ExpenseError>;
    /// The candidate pool: records still open for matching.
    async fn list_available(&self, tenant_id: Uuid) -> Result<Vec<MatchableRecord>, ExpenseError>;
    async fn set_status(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
        status: RecordStatus,
    ) -> Result<(), ExpenseError>;
}

#[async_trait]
pub trait ExpenseRepository: Send + Sync {
    async fn insert(&self, expense: Expense) -> Result<Expense, ExpenseError>;
    async fn get(&self, tenant_id: Uuid, expense_id: Uuid) -> Result<Option<Expense>, ExpenseError>;
    async fn set_status(
        &self,
        tenant_id: Uuid,
        expense_id: Uuid,
        status: ExpenseStatus,
    ) -> Result<(), ExpenseError>;
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn insert(&self, rule: MatchingRule) -> Result<MatchingRule, ExpenseError>;
    async fn get(
        &self,
        tenant_id: Uuid,
        rule_id: Uuid,
    ) -> Result<Option<MatchingRule>, ExpenseError>;
    /// All rules for the tenant, rank order (priority ascending).
    async fn list(&self, tenant_id: Uuid) -> Result<Vec<MatchingRule>, ExpenseError>;
    async fn list_active(&self, tenant_id: Uuid) -> Result<Vec<MatchingRule>, ExpenseError>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn insert(&self, policy: ApprovalPolicy) -> Result<ApprovalPolicy, ExpenseError>;
    async fn get(
        &self,
        tenant_id: Uuid,
        policy_id: Uuid,
    ) -> Result<Option<ApprovalPolicy>, ExpenseError>;
    async fn list(&self, tenant_id: Uuid) -> Result<Vec<ApprovalPolicy>, ExpenseError>;
    async fn list_active(&self, tenant_id: Uuid) -> Result<Vec<ApprovalPolicy>, ExpenseError>;
}

#[async_trait]
pub trait MatchRepository: Send + Sync {
    /// Store a result, stamping its version: one greater than the latest
    /// stored version for the same (source, candidate) pair. Results are
    /// never updated in place.
    async fn insert(&self, result: MatchResult) -> Result<MatchResult, ExpenseError>;
    async fn list_for_source(
        &self,
        tenant_id: Uuid,
        source_id: Uuid,
    ) -> Result<Vec<MatchResult>, ExpenseError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn insert(&self, request: ApprovalRequest) -> Result<ApprovalRequest, ExpenseError>;
    async fn get(
        &self,
        tenant_id: Uuid,
        request_id: Uuid,
    ) -> Result<Option<ApprovalRequest>, ExpenseError>;
    async fn get_by_expense(
        &self,
        tenant_id: Uuid,
        expense_id: Uuid,
    ) -> Result<Option<ApprovalRequest>, ExpenseError>;
    /// Compare-and-swap write: fails with `StaleRequest` unless the stored
    /// version still equals `expected_version`. This is the serialization
    /// point for concurrent decisions and escalation sweeps.
    async fn update(
        &self,
        request: ApprovalRequest,
        expected_version: i32,
    ) -> Result<ApprovalRequest, ExpenseError>;
    /// Pending requests whose deadline has passed, across all tenants.
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRequest>, ExpenseError>;
}

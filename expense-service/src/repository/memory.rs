//! In-memory repository implementation backed by dashmap. Used when no
//! database is configured (dev mode) and by the test harness.

use crate::error::ExpenseError;
use crate::models::{
    ApprovalPolicy, ApprovalRequest, Expense, ExpenseStatus, MatchResult, MatchableRecord,
    MatchingRule, RecordStatus, RequestStatus,
};
use crate::repository::{
    ApprovalRepository, ExpenseRepository, MatchRepository, PolicyRepository, RecordRepository,
    RuleRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<Uuid, MatchableRecord>,
    expenses: DashMap<Uuid, Expense>,
    rules: DashMap<Uuid, MatchingRule>,
    policies: DashMap<Uuid, ApprovalPolicy>,
    results: DashMap<Uuid, MatchResult>,
    requests: DashMap<Uuid, ApprovalRequest>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordRepository for MemoryStore {
    async fn insert(&self, record: MatchableRecord) -> Result<MatchableRecord, ExpenseError> {
        self.records.insert(record.record_id, record.clone());
        Ok(record)
    }

    async fn get(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
    ) -> Result<Option<MatchableRecord>, ExpenseError> {
        Ok(self
            .records
            .get(&record_id)
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.value().clone()))
    }

    async fn list(&self, tenant_id: Uuid) -> Result<Vec<MatchableRecord>, ExpenseError> {
        let mut records: Vec<MatchableRecord> = self
            .records
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.record_date);
        Ok(records)
    }

    async fn list_available(&self, tenant_id: Uuid) -> Result<Vec<MatchableRecord>, ExpenseError> {
        let mut records: Vec<MatchableRecord> = self
            .records
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.is_available())
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.record_date);
        Ok(records)
    }

    async fn set_status(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
        status: RecordStatus,
    ) -> Result<(), ExpenseError> {
        let mut record = self
            .records
            .get_mut(&record_id)
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or_else(|| ExpenseError::NotFound("record".to_string()))?;
        record.status = status.as_str().to_string();
        Ok(())
    }
}

#[async_trait]
impl ExpenseRepository for MemoryStore {
    async fn insert(&self, expense: Expense) -> Result<Expense, ExpenseError> {
        self.expenses.insert(expense.expense_id, expense.clone());
        Ok(expense)
    }

    async fn get(
        &self,
        tenant_id: Uuid,
        expense_id: Uuid,
    ) -> Result<Option<Expense>, ExpenseError> {
        Ok(self
            .expenses
            .get(&expense_id)
            .filter(|e| e.tenant_id == tenant_id)
            .map(|e| e.value().clone()))
    }

    async fn set_status(
        &self,
        tenant_id: Uuid,
        expense_id: Uuid,
        status: ExpenseStatus,
    ) -> Result<(), ExpenseError> {
        let mut expense = self
            .expenses
            .get_mut(&expense_id)
            .filter(|e| e.tenant_id == tenant_id)
            .ok_or_else(|| ExpenseError::NotFound("expense".to_string()))?;
        expense.status = status.as_str().to_string();
        Ok(())
    }
}

#[async_trait]
impl RuleRepository for MemoryStore {
    async fn insert(&self, rule: MatchingRule) -> Result<MatchingRule, ExpenseError> {
        self.rules.insert(rule.rule_id, rule.clone());
        Ok(rule)
    }

    async fn get(
        &self,
        tenant_id: Uuid,
        rule_id: Uuid,
    ) -> Result<Option<MatchingRule>, ExpenseError> {
        Ok(self
            .rules
            .get(&rule_id)
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.value().clone()))
    }

    async fn list(&self, tenant_id: Uuid) -> Result<Vec<MatchingRule>, ExpenseError> {
        let mut rules: Vec<MatchingRule> = self
            .rules
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.value().clone())
            .collect();
        rules.sort_by_key(|r| r.priority);
        Ok(rules)
    }

    async fn list_active(&self, tenant_id: Uuid) -> Result<Vec<MatchingRule>, ExpenseError> {
        let mut rules = RuleRepository::list(self, tenant_id).await?;
        rules.retain(|r| r.is_active);
        Ok(rules)
    }
}

#[async_trait]
impl PolicyRepository for MemoryStore {
    async fn insert(&self, policy: ApprovalPolicy) -> Result<ApprovalPolicy, ExpenseError> {
        self.policies.insert(policy.policy_id, policy.clone());
        Ok(policy)
    }

    async fn get(
        &self,
        tenant_id: Uuid,
        policy_id: Uuid,
    ) -> Result<Option<ApprovalPolicy>, ExpenseError> {
        Ok(self
            .policies
            .get(&policy_id)
            .filter(|p| p.tenant_id == tenant_id)
            .map(|p| p.value().clone()))
    }

    async fn list(&self, tenant_id: Uuid) -> Result<Vec<ApprovalPolicy>, ExpenseError> {
        let mut policies: Vec<ApprovalPolicy> = self
            .policies
            .iter()
            .filter(|p| p.tenant_id == tenant_id)
            .map(|p| p.value().clone())
            .collect();
        policies.sort_by_key(|p| p.priority);
        Ok(policies)
    }

    async fn list_active(&self, tenant_id: Uuid) -> Result<Vec<ApprovalPolicy>, ExpenseError> {
        let mut policies = PolicyRepository::list(self, tenant_id).await?;
        policies.retain(|p| p.is_active);
        Ok(policies)
    }
}

#[async_trait]
impl MatchRepository for MemoryStore {
    async fn insert(&self, mut result: MatchResult) -> Result<MatchResult, ExpenseError> {
        let latest = self
            .results
            .iter()
            .filter(|r| {
                r.tenant_id == result.tenant_id
                    && r.source_id == result.source_id
                    && r.candidate_id == result.candidate_id
            })
            .map(|r| r.version)
            .max()
            .unwrap_or(0);
        result.version = latest + 1;
        self.results.insert(result.result_id, result.clone());
        Ok(result)
    }

    async fn list_for_source(
        &self,
        tenant_id: Uuid,
        source_id: Uuid,
    ) -> Result<Vec<MatchResult>, ExpenseError> {
        let mut results: Vec<MatchResult> = self
            .results
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.source_id == source_id)
            .map(|r| r.value().clone())
            .collect();
        results.sort_by(|a, b| {
            b.overall_confidence
                .partial_cmp(&a.overall_confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }
}

#[async_trait]
impl ApprovalRepository for MemoryStore {
    async fn insert(&self, request: ApprovalRequest) -> Result<ApprovalRequest, ExpenseError> {
        self.requests.insert(request.request_id, request.clone());
        Ok(request)
    }

    async fn get(
        &self,
        tenant_id: Uuid,
        request_id: Uuid,
    ) -> Result<Option<ApprovalRequest>, ExpenseError> {
        Ok(self
            .requests
            .get(&request_id)
            .filter(|r| r.tenant_id == tenant_id)
            .map(|r| r.value().clone()))
    }

    async fn get_by_expense(
        &self,
        tenant_id: Uuid,
        expense_id: Uuid,
    ) -> Result<Option<ApprovalRequest>, ExpenseError> {
        Ok(self
            .requests
            .iter()
            .find(|r| r.tenant_id == tenant_id && r.expense_id == expense_id)
            .map(|r| r.value().clone()))
    }

    async fn update(
        &self,
        mut request: ApprovalRequest,
        expected_version: i32,
    ) -> Result<ApprovalRequest, ExpenseError> {
        let mut stored = self
            .requests
            .get_mut(&request.request_id)
            .ok_or_else(|| ExpenseError::NotFound("approval request".to_string()))?;
        if stored.version != expected_version {
            return Err(ExpenseError::StaleRequest(format!(
                "request {} was modified concurrently",
                request.request_id
            )));
        }
        request.version = expected_version + 1;
        *stored = request.clone();
        Ok(request)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRequest>, ExpenseError> {
        let mut due: Vec<ApprovalRequest> = self
            .requests
            .iter()
            .filter(|r| r.status == RequestStatus::Pending && r.expires_utc <= now)
            .map(|r| r.value().clone())
            .collect();
        due.sort_by_key(|r| r.expires_utc);
        Ok(due)
    }
}

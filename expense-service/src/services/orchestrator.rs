//! Reconciliation orchestrator: runs candidate search for a source record
//! and routes the outcome: auto-confirm on high confidence, hand-off to
//! the approval workflow when the match needs human review, or an explicit
//! no-match outcome so callers can always render a result.

use crate::error::ExpenseError;
use crate::models::{
    Expense, ExpenseStatus, MatchResult, MatchableRecord, MatchingRule, RecordStatus,
    SubmissionOutcome,
};
use crate::repository::{
    ExpenseRepository, MatchRepository, PolicyRepository, RecordRepository, RuleRepository,
    TtlCache,
};
use crate::services::approval::ApprovalWorkflow;
use crate::services::matching::MatchEngine;
use crate::services::metrics::{observe_match_confidence, record_error, record_match_operation};
use crate::services::policy::select_policy;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_AUTO_CONFIRM_THRESHOLD: f64 = 90.0;

/// Rule lookups are cached briefly; rule edits invalidate the tenant key.
const RULE_CACHE_TTL: Duration = Duration::from_secs(60);

pub fn rule_cache_key(tenant_id: Uuid) -> String {
    format!("rules:{}", tenant_id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Best candidate cleared the auto-confirm bar; both records are now
    /// matched.
    AutoConfirmed { result: MatchResult },
    /// A plausible match exists but needs review: the best result is
    /// persisted and the derived expense enters the approval workflow.
    SubmittedForApproval {
        result: MatchResult,
        submission: SubmissionOutcome,
    },
    /// Nothing cleared the threshold. Not an error: the record simply
    /// stays available.
    NoMatch,
}

pub struct Orchestrator {
    engine: MatchEngine,
    records: Arc<dyn RecordRepository>,
    expenses: Arc<dyn ExpenseRepository>,
    rules: Arc<dyn RuleRepository>,
    policies: Arc<dyn PolicyRepository>,
    matches: Arc<dyn MatchRepository>,
    workflow: Arc<ApprovalWorkflow>,
    rule_cache: Arc<TtlCache<Vec<MatchingRule>>>,
    match_threshold: f64,
    auto_confirm_threshold: f64,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        records: Arc<dyn RecordRepository>,
        expenses: Arc<dyn ExpenseRepository>,
        rules: Arc<dyn RuleRepository>,
        policies: Arc<dyn PolicyRepository>,
        matches: Arc<dyn MatchRepository>,
        workflow: Arc<ApprovalWorkflow>,
        rule_cache: Arc<TtlCache<Vec<MatchingRule>>>,
        match_threshold: f64,
        auto_confirm_threshold: f64,
    ) -> Self {
        Self {
            engine: MatchEngine::new(),
            records,
            expenses,
            rules,
            policies,
            matches,
            workflow,
            rule_cache,
            match_threshold,
            auto_confirm_threshold,
        }
    }

    /// Read-only candidate search for a source record. Persists nothing.
    pub async fn find_matches_for(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
        threshold: Option<f64>,
    ) -> Result<Vec<MatchResult>, ExpenseError> {
        let source = self
            .records
            .get(tenant_id, record_id)
            .await?
            .ok_or_else(|| ExpenseError::NotFound("record".to_string()))?;
        let rules = self.active_rules(tenant_id).await?;
        let pool = self.records.list_available(tenant_id).await?;

        let results = self.engine.find_matches(
            &source,
            &pool,
            &rules,
            threshold.unwrap_or(self.match_threshold),
        )?;
        record_match_operation("find_matches", "ok");
        Ok(results)
    }

    /// Reconcile one source record end to end.
    pub async fn process_record(
        &self,
        tenant_id: Uuid,
        record_id: Uuid,
        submitter_id: Uuid,
        category: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome, ExpenseError> {
        let source = self
            .records
            .get(tenant_id, record_id)
            .await?
            .ok_or_else(|| ExpenseError::NotFound("record".to_string()))?;
        if !source.is_available() {
            return Err(ExpenseError::StaleRequest(format!(
                "record {} is no longer available for matching",
                record_id
            )));
        }

        let rules = self.active_rules(tenant_id).await?;
        let pool = self.records.list_available(tenant_id).await?;
        let results = self
            .engine
            .find_matches(&source, &pool, &rules, self.match_threshold)?;

        let Some(best) = results.into_iter().next() else {
            record_match_operation("process_record", "no_match");
            tracing::info!(record_id = %record_id, "No candidate cleared the match threshold");
            return Ok(ProcessOutcome::NoMatch);
        };

        observe_match_confidence(best.overall_confidence);

        if best.overall_confidence >= self.auto_confirm_threshold {
            let stored = self.matches.insert(best).await?;
            self.records
                .set_status(tenant_id, stored.source_id, RecordStatus::Matched)
                .await?;
            self.records
                .set_status(tenant_id, stored.candidate_id, RecordStatus::Matched)
                .await?;
            record_match_operation("process_record", "auto_confirmed");
            tracing::info!(
                record_id = %record_id,
                candidate_id = %stored.candidate_id,
                confidence = stored.overall_confidence,
                "Match auto-confirmed"
            );
            return Ok(ProcessOutcome::AutoConfirmed { result: stored });
        }

        // Plausible but not conclusive: keep the result for review and put
        // the derived expense in front of the approval workflow.
        let stored = self.matches.insert(best).await?;
        let expense = self
            .expenses
            .insert(derive_expense(&source, submitter_id, category, now))
            .await?;

        let policies = self.policies.list_active(tenant_id).await?;
        let Some(policy) = select_policy(&expense, submitter_id, &policies) else {
            record_error("no_matching_policy");
            return Err(ExpenseError::NoMatchingPolicy);
        };

        let submission = self
            .workflow
            .submit(&expense, policy, submitter_id, now)
            .await?;
        record_match_operation("process_record", "submitted_for_approval");
        tracing::info!(
            record_id = %record_id,
            expense_id = %expense.expense_id,
            confidence = stored.overall_confidence,
            "Match handed off to approval workflow"
        );
        Ok(ProcessOutcome::SubmittedForApproval {
            result: stored,
            submission,
        })
    }

    /// Submit an existing expense through the tenant's policies.
    pub async fn submit_expense(
        &self,
        tenant_id: Uuid,
        expense_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SubmissionOutcome, ExpenseError> {
        let expense = self
            .expenses
            .get(tenant_id, expense_id)
            .await?
            .ok_or_else(|| ExpenseError::NotFound("expense".to_string()))?;

        let policies = self.policies.list_active(tenant_id).await?;
        let Some(policy) = select_policy(&expense, expense.submitter_id, &policies) else {
            record_error("no_matching_policy");
            return Err(ExpenseError::NoMatchingPolicy);
        };

        self.workflow
            .submit(&expense, policy, expense.submitter_id, now)
            .await
    }

    async fn active_rules(&self, tenant_id: Uuid) -> Result<Vec<MatchingRule>, ExpenseError> {
        let key = rule_cache_key(tenant_id);
        if let Some(rules) = self.rule_cache.get(&key) {
            return Ok(rules);
        }
        let rules = self.rules.list_active(tenant_id).await?;
        self.rule_cache.set(key, rules.clone(), RULE_CACHE_TTL);
        Ok(rules)
    }
}

fn derive_expense(
    record: &MatchableRecord,
    submitter_id: Uuid,
    category: Option<String>,
    now: DateTime<Utc>,
) -> Expense {
    Expense {
        expense_id: Uuid::new_v4(),
        tenant_id: record.tenant_id,
        submitter_id,
        expense_date: record.record_date,
        amount: record.amount.abs(),
        currency: record.currency.clone(),
        category: category.unwrap_or_else(|| "uncategorized".to_string()),
        vendor: record.vendor.clone(),
        description: record.description.clone(),
        status: ExpenseStatus::PendingReview.as_str().to_string(),
        created_utc: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ApprovalPolicy, ApproverLevel, EscalationRule, PolicyAction, RequestStatus,
    };
    use crate::repository::MemoryStore;
    use crate::services::approval::DEFAULT_ESCALATION_DELAY_HOURS;
    use crate::services::matching::DEFAULT_MATCH_THRESHOLD;
    use crate::services::notify::TracingNotifier;
    use chrono::NaiveDate;

    fn orchestrator(store: &Arc<MemoryStore>) -> Orchestrator {
        let workflow = Arc::new(ApprovalWorkflow::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(TracingNotifier),
            DEFAULT_ESCALATION_DELAY_HOURS,
        ));
        Orchestrator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            workflow,
            Arc::new(TtlCache::new()),
            DEFAULT_MATCH_THRESHOLD,
            DEFAULT_AUTO_CONFIRM_THRESHOLD,
        )
    }

    fn record(tenant_id: Uuid, amount: &str, date: &str, vendor: &str) -> MatchableRecord {
        MatchableRecord {
            record_id: Uuid::new_v4(),
            tenant_id,
            source: "receipt".to_string(),
            record_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            amount: amount.parse().unwrap(),
            currency: "USD".to_string(),
            description: format!("receipt from {}", vendor),
            vendor: vendor.to_string(),
            status: "available".to_string(),
            extraction_confidence: None,
            created_utc: Utc::now(),
        }
    }

    fn catch_all_policy(tenant_id: Uuid) -> ApprovalPolicy {
        ApprovalPolicy {
            policy_id: Uuid::new_v4(),
            tenant_id,
            name: "catch-all".to_string(),
            priority: 100,
            conditions: vec![],
            action: PolicyAction::RequireApproval,
            approver_levels: vec![ApproverLevel {
                level: 1,
                approver_id: Uuid::new_v4(),
                is_required: true,
                can_delegate: true,
                max_amount: None,
            }],
            escalation: EscalationRule::default(),
            is_active: true,
            created_utc: Utc::now(),
        }
    }

    #[tokio::test]
    async fn identical_counterpart_is_auto_confirmed() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let receipt = record(tenant, "84.20", "2026-02-14", "Blue Bottle Coffee");
        let transaction = record(tenant, "84.20", "2026-02-14", "Blue Bottle Coffee");
        RecordRepository::insert(store.as_ref(), receipt.clone())
            .await
            .unwrap();
        RecordRepository::insert(store.as_ref(), transaction.clone())
            .await
            .unwrap();

        let outcome = orchestrator(&store)
            .process_record(tenant, receipt.record_id, Uuid::new_v4(), None, Utc::now())
            .await
            .unwrap();

        let ProcessOutcome::AutoConfirmed { result } = outcome else {
            panic!("expected auto confirmation");
        };
        assert_eq!(result.overall_confidence, 100.0);
        assert_eq!(result.version, 1);

        for id in [receipt.record_id, transaction.record_id] {
            let stored = RecordRepository::get(store.as_ref(), tenant, id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(stored.status, "matched");
        }
    }

    #[tokio::test]
    async fn reviewable_match_is_submitted_for_approval() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let receipt = record(tenant, "100.00", "2026-02-14", "Acme Supplies");
        let transaction = record(tenant, "105.00", "2026-02-14", "Acme Supplies");
        RecordRepository::insert(store.as_ref(), receipt.clone())
            .await
            .unwrap();
        RecordRepository::insert(store.as_ref(), transaction.clone())
            .await
            .unwrap();
        PolicyRepository::insert(store.as_ref(), catch_all_policy(tenant))
            .await
            .unwrap();

        let submitter = Uuid::new_v4();
        let outcome = orchestrator(&store)
            .process_record(
                tenant,
                receipt.record_id,
                submitter,
                Some("supplies".to_string()),
                Utc::now(),
            )
            .await
            .unwrap();

        let ProcessOutcome::SubmittedForApproval { result, submission } = outcome else {
            panic!("expected an approval hand-off");
        };
        assert!(result.overall_confidence < DEFAULT_AUTO_CONFIRM_THRESHOLD);

        let SubmissionOutcome::PendingApproval { request } = submission else {
            panic!("expected a pending approval request");
        };
        assert_eq!(request.status, RequestStatus::Pending);

        let expense = ExpenseRepository::get(store.as_ref(), tenant, request.expense_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(expense.submitter_id, submitter);
        assert_eq!(expense.category, "supplies");
        assert_eq!(expense.status, "pending_review");

        // Neither record was confirmed; the pair stays open for review.
        let source = RecordRepository::get(store.as_ref(), tenant, receipt.record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(source.status, "available");
    }

    #[tokio::test]
    async fn empty_pool_is_a_no_match_outcome() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let receipt = record(tenant, "84.20", "2026-02-14", "Blue Bottle Coffee");
        RecordRepository::insert(store.as_ref(), receipt.clone())
            .await
            .unwrap();

        let outcome = orchestrator(&store)
            .process_record(tenant, receipt.record_id, Uuid::new_v4(), None, Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::NoMatch));
    }

    #[tokio::test]
    async fn missing_policy_surfaces_as_no_matching_policy() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let receipt = record(tenant, "100.00", "2026-02-14", "Acme Supplies");
        let transaction = record(tenant, "105.00", "2026-02-14", "Acme Supplies");
        RecordRepository::insert(store.as_ref(), receipt.clone())
            .await
            .unwrap();
        RecordRepository::insert(store.as_ref(), transaction)
            .await
            .unwrap();

        let failed = orchestrator(&store)
            .process_record(tenant, receipt.record_id, Uuid::new_v4(), None, Utc::now())
            .await;
        assert!(matches!(failed, Err(ExpenseError::NoMatchingPolicy)));
    }

    #[tokio::test]
    async fn processed_records_cannot_be_processed_again() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();
        let receipt = record(tenant, "84.20", "2026-02-14", "Blue Bottle Coffee");
        let transaction = record(tenant, "84.20", "2026-02-14", "Blue Bottle Coffee");
        RecordRepository::insert(store.as_ref(), receipt.clone())
            .await
            .unwrap();
        RecordRepository::insert(store.as_ref(), transaction)
            .await
            .unwrap();

        let orchestrator = orchestrator(&store);
        orchestrator
            .process_record(tenant, receipt.record_id, Uuid::new_v4(), None, Utc::now())
            .await
            .unwrap();

        let replay = orchestrator
            .process_record(tenant, receipt.record_id, Uuid::new_v4(), None, Utc::now())
            .await;
        assert!(matches!(replay, Err(ExpenseError::StaleRequest(_))));
    }
}

//! Multi-level approval workflow state machine.
//!
//! Owns the `ApprovalRequest` aggregate: creation on submission, decision
//! handling (approve / reject / delegate), level advancement, withdrawal,
//! and deadline escalation. Every mutation is read-check-mutate-write with
//! the repository's version CAS as the serialization point, so concurrent
//! decisions and escalation sweeps conflict loudly (`StaleRequest`)
//! instead of overwriting each other.

use crate::error::ExpenseError;
use crate::models::{
    ApprovalComment, ApprovalEntry, ApprovalEvent, ApprovalPolicy, ApprovalRequest, Decision,
    EntryStatus, EscalationAction, Expense, ExpenseStatus, PolicyAction, RequestStatus,
    SubmissionOutcome,
};
use crate::repository::{ApprovalRepository, ExpenseRepository, PolicyRepository};
use crate::services::metrics::{record_decision, record_escalation, record_submission};
use crate::services::notify::NotificationSender;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_ESCALATION_DELAY_HOURS: i64 = 72;

pub struct ApprovalWorkflow {
    approvals: Arc<dyn ApprovalRepository>,
    expenses: Arc<dyn ExpenseRepository>,
    policies: Arc<dyn PolicyRepository>,
    notifier: Arc<dyn NotificationSender>,
    escalation_delay: Duration,
}

impl ApprovalWorkflow {
    pub fn new(
        approvals: Arc<dyn ApprovalRepository>,
        expenses: Arc<dyn ExpenseRepository>,
        policies: Arc<dyn PolicyRepository>,
        notifier: Arc<dyn NotificationSender>,
        escalation_delay_hours: i64,
    ) -> Self {
        Self {
            approvals,
            expenses,
            policies,
            notifier,
            escalation_delay: Duration::hours(escalation_delay_hours),
        }
    }

    /// Route a submitted expense through the selected policy. Auto actions
    /// finalize the expense without creating a request; `require_approval`
    /// opens a request at level 1 with one pending entry per configured
    /// approver.
    pub async fn submit(
        &self,
        expense: &Expense,
        policy: &ApprovalPolicy,
        submitter_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SubmissionOutcome, ExpenseError> {
        match policy.action {
            PolicyAction::AutoApprove => {
                self.expenses
                    .set_status(expense.tenant_id, expense.expense_id, ExpenseStatus::Verified)
                    .await?;
                record_submission("auto_approve");
                tracing::info!(
                    expense_id = %expense.expense_id,
                    policy_id = %policy.policy_id,
                    "Expense auto-approved by policy"
                );
                Ok(SubmissionOutcome::AutoApproved {
                    expense_id: expense.expense_id,
                })
            }
            PolicyAction::Reject => {
                self.expenses
                    .set_status(expense.tenant_id, expense.expense_id, ExpenseStatus::Rejected)
                    .await?;
                record_submission("reject");
                tracing::info!(
                    expense_id = %expense.expense_id,
                    policy_id = %policy.policy_id,
                    "Expense auto-rejected by policy"
                );
                Ok(SubmissionOutcome::AutoRejected {
                    expense_id: expense.expense_id,
                })
            }
            PolicyAction::RequireApproval => {
                if policy.approver_levels.is_empty() {
                    return Err(ExpenseError::Invalid(
                        "policy requires approval but configures no approvers".to_string(),
                    ));
                }
                if let Some(existing) = self
                    .approvals
                    .get_by_expense(expense.tenant_id, expense.expense_id)
                    .await?
                {
                    if existing.status == RequestStatus::Pending {
                        return Err(ExpenseError::StaleRequest(format!(
                            "expense {} already has a pending approval request",
                            expense.expense_id
                        )));
                    }
                }

                let total_levels = policy
                    .approver_levels
                    .iter()
                    .map(|l| l.level)
                    .max()
                    .unwrap_or(1);
                let approvers = policy
                    .approver_levels
                    .iter()
                    .map(|l| ApprovalEntry {
                        approver_id: l.approver_id,
                        level: l.level,
                        is_required: l.is_required,
                        can_delegate: l.can_delegate,
                        max_amount: l.max_amount,
                        status: EntryStatus::Pending,
                        decided_utc: None,
                        delegated_to: None,
                        comments: None,
                    })
                    .collect();

                let request = ApprovalRequest {
                    request_id: Uuid::new_v4(),
                    tenant_id: expense.tenant_id,
                    expense_id: expense.expense_id,
                    policy_id: policy.policy_id,
                    status: RequestStatus::Pending,
                    current_level: 1,
                    total_levels,
                    approvers,
                    comments: Vec::new(),
                    submitted_utc: now,
                    expires_utc: now + self.escalation_delay,
                    completed_utc: None,
                    escalated: false,
                    version: 1,
                };
                let request = self.approvals.insert(request).await?;

                let recipients = request.pending_approvers_at(1);
                self.notifier
                    .notify(&request, ApprovalEvent::Submitted, &recipients)
                    .await;
                record_submission("require_approval");
                tracing::info!(
                    request_id = %request.request_id,
                    expense_id = %expense.expense_id,
                    submitter_id = %submitter_id,
                    total_levels = request.total_levels,
                    "Approval request created"
                );
                Ok(SubmissionOutcome::PendingApproval { request })
            }
        }
    }

    /// Apply one approver decision. Fails with `StaleRequest` when the
    /// request or the approver's entry is no longer pending (a replay or a
    /// lost race), and `Unauthorized` for approvers acting above the
    /// current level, delegating without permission, or approving beyond
    /// their authority limit.
    pub async fn decide(
        &self,
        tenant_id: Uuid,
        request_id: Uuid,
        approver_id: Uuid,
        decision: Decision,
        comments: Option<String>,
        delegate_to: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, ExpenseError> {
        let mut request = self
            .approvals
            .get(tenant_id, request_id)
            .await?
            .ok_or_else(|| ExpenseError::NotFound("approval request".to_string()))?;
        let expected_version = request.version;

        if request.status != RequestStatus::Pending {
            return Err(ExpenseError::StaleRequest(format!(
                "request {} is already {}",
                request_id,
                request.status.as_str()
            )));
        }

        let position = request
            .approvers
            .iter()
            .position(|e| {
                e.approver_id == approver_id
                    && e.status == EntryStatus::Pending
                    && e.level <= request.current_level
            })
            .ok_or_else(|| self.classify_unactionable(&request, approver_id))?;

        let expense = self
            .expenses
            .get(tenant_id, request.expense_id)
            .await?
            .ok_or_else(|| ExpenseError::NotFound("expense".to_string()))?;

        let entry_level = request.approvers[position].level;
        let previous_level = request.current_level;

        match decision {
            Decision::Reject => {
                let entry = &mut request.approvers[position];
                entry.status = EntryStatus::Rejected;
                entry.decided_utc = Some(now);
                entry.comments = comments.clone();
                // A single rejection at any level is a veto.
                request.status = RequestStatus::Rejected;
                request.completed_utc = Some(now);
            }
            Decision::Delegate => {
                let entry = &request.approvers[position];
                if !entry.can_delegate {
                    return Err(ExpenseError::Unauthorized(format!(
                        "approver {} may not delegate",
                        approver_id
                    )));
                }
                let Some(delegate) = delegate_to else {
                    return Err(ExpenseError::Invalid(
                        "delegate_to is required for a delegation".to_string(),
                    ));
                };
                if delegate == approver_id {
                    return Err(ExpenseError::Invalid(
                        "cannot delegate an approval to oneself".to_string(),
                    ));
                }
                // The delegate inherits the duty at the same level; the
                // original entry stays in the trail as the chain of custody.
                let delegated_duty = ApprovalEntry {
                    approver_id: delegate,
                    level: entry_level,
                    is_required: entry.is_required,
                    can_delegate: false,
                    max_amount: entry.max_amount,
                    status: EntryStatus::Pending,
                    decided_utc: None,
                    delegated_to: None,
                    comments: None,
                };
                let entry = &mut request.approvers[position];
                entry.status = EntryStatus::Delegated;
                entry.decided_utc = Some(now);
                entry.delegated_to = Some(delegate);
                entry.comments = comments.clone();
                request.approvers.push(delegated_duty);
            }
            Decision::Approve => {
                let entry = &request.approvers[position];
                if let Some(max_amount) = entry.max_amount {
                    if expense.amount > max_amount {
                        return Err(ExpenseError::Unauthorized(format!(
                            "amount {} exceeds approver {}'s authority of {}",
                            expense.amount, approver_id, max_amount
                        )));
                    }
                }
                let entry = &mut request.approvers[position];
                entry.status = EntryStatus::Approved;
                entry.decided_utc = Some(now);
                entry.comments = comments.clone();

                if level_complete(&request, request.current_level) {
                    if request.current_level == request.total_levels {
                        request.status = RequestStatus::Approved;
                        request.completed_utc = Some(now);
                    } else {
                        request.current_level += 1;
                    }
                }
            }
        }

        if let Some(body) = comments {
            request.comments.push(ApprovalComment {
                author_id: approver_id,
                body,
                created_utc: now,
            });
        }

        let saved = self.approvals.update(request, expected_version).await?;

        match saved.status {
            RequestStatus::Rejected => {
                self.expenses
                    .set_status(tenant_id, saved.expense_id, ExpenseStatus::Rejected)
                    .await?;
                let recipients = approver_ids_at(&saved, entry_level);
                self.notifier
                    .notify(&saved, ApprovalEvent::Rejected, &recipients)
                    .await;
            }
            RequestStatus::Approved => {
                self.expenses
                    .set_status(tenant_id, saved.expense_id, ExpenseStatus::Verified)
                    .await?;
                let recipients = approver_ids_at(&saved, saved.total_levels);
                self.notifier
                    .notify(&saved, ApprovalEvent::Approved, &recipients)
                    .await;
            }
            RequestStatus::Pending if saved.current_level > previous_level => {
                let recipients = saved.pending_approvers_at(saved.current_level);
                self.notifier
                    .notify(&saved, ApprovalEvent::LevelAdvance, &recipients)
                    .await;
            }
            _ => {}
        }

        record_decision(decision.as_str(), saved.status.as_str());
        tracing::info!(
            request_id = %request_id,
            approver_id = %approver_id,
            decision = %decision.as_str(),
            status = %saved.status.as_str(),
            current_level = saved.current_level,
            "Approval decision applied"
        );
        Ok(saved)
    }

    /// Cancel a pending request. Only the expense's submitter may do this;
    /// remaining pending entries are expired for the audit trail.
    pub async fn withdraw(
        &self,
        tenant_id: Uuid,
        request_id: Uuid,
        submitter_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, ExpenseError> {
        let mut request = self
            .approvals
            .get(tenant_id, request_id)
            .await?
            .ok_or_else(|| ExpenseError::NotFound("approval request".to_string()))?;
        let expected_version = request.version;

        if request.status != RequestStatus::Pending {
            return Err(ExpenseError::StaleRequest(format!(
                "request {} is already {}",
                request_id,
                request.status.as_str()
            )));
        }

        let expense = self
            .expenses
            .get(tenant_id, request.expense_id)
            .await?
            .ok_or_else(|| ExpenseError::NotFound("expense".to_string()))?;
        if expense.submitter_id != submitter_id {
            return Err(ExpenseError::Unauthorized(
                "only the submitter may withdraw an approval request".to_string(),
            ));
        }

        expire_pending_entries(&mut request, now);
        request.status = RequestStatus::Withdrawn;
        request.completed_utc = Some(now);

        let saved = self.approvals.update(request, expected_version).await?;
        tracing::info!(request_id = %request_id, "Approval request withdrawn");
        Ok(saved)
    }

    /// Read-only view of requests past their deadline; the scheduler
    /// collaborator decides when to act on them.
    pub async fn check_escalations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, ExpenseError> {
        self.approvals.list_due(now).await
    }

    /// Apply each overdue request's policy escalation rule. A request that
    /// loses the race against a concurrent manual decision is skipped; one
    /// failing request does not abort the sweep.
    pub async fn escalate_due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, ExpenseError> {
        let due = self.approvals.list_due(now).await?;
        let mut actioned = Vec::new();

        for request in due {
            let request_id = request.request_id;
            match self.escalate_request(request, now).await {
                Ok(saved) => actioned.push(saved),
                Err(ExpenseError::StaleRequest(_)) => {
                    tracing::debug!(
                        request_id = %request_id,
                        "Escalation lost the race against a manual decision"
                    );
                }
                Err(e) => {
                    tracing::warn!(request_id = %request_id, error = %e, "Escalation failed");
                }
            }
        }
        Ok(actioned)
    }

    async fn escalate_request(
        &self,
        mut request: ApprovalRequest,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, ExpenseError> {
        let expected_version = request.version;
        if request.status != RequestStatus::Pending {
            return Err(ExpenseError::StaleRequest(format!(
                "request {} is already {}",
                request.request_id,
                request.status.as_str()
            )));
        }

        let policy = self
            .policies
            .get(request.tenant_id, request.policy_id)
            .await?
            .ok_or_else(|| ExpenseError::NotFound("approval policy".to_string()))?;

        let recipients = request.pending_approvers_at(request.current_level);

        match policy.escalation.action {
            EscalationAction::NotifyOnly => {
                if request.escalated {
                    // Deadline was already extended once; keep nudging the
                    // pending approvers without further state changes.
                    self.notifier
                        .notify(&request, ApprovalEvent::Escalated, &recipients)
                        .await;
                    record_escalation("notify_only");
                    return Ok(request);
                }
                let extend_hours = policy
                    .escalation
                    .extend_hours
                    .unwrap_or(DEFAULT_ESCALATION_DELAY_HOURS);
                request.escalated = true;
                request.expires_utc = now + Duration::hours(extend_hours);

                let saved = self.approvals.update(request, expected_version).await?;
                self.notifier
                    .notify(&saved, ApprovalEvent::Escalated, &recipients)
                    .await;
                record_escalation("notify_only");
                tracing::info!(
                    request_id = %saved.request_id,
                    expires_utc = %saved.expires_utc,
                    "Approval deadline extended after escalation"
                );
                Ok(saved)
            }
            EscalationAction::AutoApprove => {
                request.escalated = true;
                expire_pending_entries(&mut request, now);
                request.status = RequestStatus::Approved;
                request.completed_utc = Some(now);

                let saved = self.approvals.update(request, expected_version).await?;
                self.expenses
                    .set_status(saved.tenant_id, saved.expense_id, ExpenseStatus::Verified)
                    .await?;
                self.notifier
                    .notify(&saved, ApprovalEvent::Escalated, &recipients)
                    .await;
                record_escalation("auto_approve");
                tracing::info!(request_id = %saved.request_id, "Request auto-approved on escalation");
                Ok(saved)
            }
            EscalationAction::AutoReject => {
                request.escalated = true;
                expire_pending_entries(&mut request, now);
                request.status = RequestStatus::Expired;
                request.completed_utc = Some(now);

                let saved = self.approvals.update(request, expected_version).await?;
                self.expenses
                    .set_status(saved.tenant_id, saved.expense_id, ExpenseStatus::Rejected)
                    .await?;
                self.notifier
                    .notify(&saved, ApprovalEvent::Escalated, &recipients)
                    .await;
                record_escalation("auto_reject");
                tracing::info!(request_id = %saved.request_id, "Request expired on escalation");
                Ok(saved)
            }
        }
    }

    fn classify_unactionable(&self, request: &ApprovalRequest, approver_id: Uuid) -> ExpenseError {
        let pending_above = request.approvers.iter().any(|e| {
            e.approver_id == approver_id
                && e.status == EntryStatus::Pending
                && e.level > request.current_level
        });
        if pending_above {
            return ExpenseError::Unauthorized(format!(
                "approver {} cannot act before level {} completes",
                approver_id, request.current_level
            ));
        }
        if request.approvers.iter().any(|e| e.approver_id == approver_id) {
            return ExpenseError::StaleRequest(format!(
                "approver {} has already acted on request {}",
                approver_id, request.request_id
            ));
        }
        ExpenseError::NotFound("approval entry".to_string())
    }
}

/// A level is complete when every required, non-delegated entry at that
/// level is approved and at least one approval exists there. Delegated
/// entries are excused: their duty moved to the appended delegate entry.
fn level_complete(request: &ApprovalRequest, level: i32) -> bool {
    let mut any_approved = false;
    for entry in request.entries_at(level) {
        match entry.status {
            EntryStatus::Approved => any_approved = true,
            EntryStatus::Delegated => {}
            _ if entry.is_required => return false,
            _ => {}
        }
    }
    any_approved
}

fn expire_pending_entries(request: &mut ApprovalRequest, now: DateTime<Utc>) {
    for entry in &mut request.approvers {
        if entry.status == EntryStatus::Pending {
            entry.status = EntryStatus::Expired;
            entry.decided_utc = Some(now);
        }
    }
}

/// Distinct approver ids configured at a level, whatever their entry
/// status: the audience for terminal notifications.
fn approver_ids_at(request: &ApprovalRequest, level: i32) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = request.entries_at(level).map(|e| e.approver_id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

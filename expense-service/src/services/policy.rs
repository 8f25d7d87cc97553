//! Approval policy selection: evaluates condition chains against an
//! expense to pick the policy that governs its approval.

use crate::models::{ApprovalPolicy, Combinator, Expense, PolicyCondition, PolicyField, PolicyOperator};
use uuid::Uuid;

/// Pick the governing policy for an expense. Active policies are tried in
/// rank order (priority 1 first); the first whose condition chain holds
/// wins. `None` means the tenant has no applicable policy; callers are
/// expected to keep a catch-all policy so this stays a configuration
/// error, not a steady state.
pub fn select_policy<'a>(
    expense: &Expense,
    submitter_id: Uuid,
    policies: &'a [ApprovalPolicy],
) -> Option<&'a ApprovalPolicy> {
    let mut ordered: Vec<&ApprovalPolicy> = policies.iter().filter(|p| p.is_active).collect();
    ordered.sort_by_key(|p| p.priority);

    ordered
        .into_iter()
        .find(|policy| conditions_hold(expense, submitter_id, &policy.conditions))
}

/// Same chain semantics as rule matching: left-to-right, short-circuit,
/// no precedence between combinators. An empty chain always holds.
fn conditions_hold(expense: &Expense, submitter_id: Uuid, conditions: &[PolicyCondition]) -> bool {
    let mut conditions = conditions.iter();
    let Some(first) = conditions.next() else {
        return true;
    };

    let mut holds = condition_holds(expense, submitter_id, first);
    for condition in conditions {
        match condition.combinator {
            Combinator::And => {
                if holds {
                    holds = condition_holds(expense, submitter_id, condition);
                }
            }
            Combinator::Or => {
                if !holds {
                    holds = condition_holds(expense, submitter_id, condition);
                }
            }
        }
    }
    holds
}

fn condition_holds(expense: &Expense, submitter_id: Uuid, condition: &PolicyCondition) -> bool {
    use PolicyOperator::*;

    match condition.field {
        PolicyField::Amount => {
            let Some(value) = condition.value.as_number() else {
                return false;
            };
            match condition.operator {
                Eq => expense.amount == value,
                Ne => expense.amount != value,
                Gt => expense.amount > value,
                Gte => expense.amount >= value,
                Lt => expense.amount < value,
                Lte => expense.amount <= value,
                _ => false,
            }
        }
        PolicyField::Category => text_condition_holds(&expense.category, condition),
        PolicyField::Vendor => text_condition_holds(&expense.vendor, condition),
        PolicyField::Submitter => {
            let Some(id) = condition.value.as_text().and_then(|t| Uuid::parse_str(t).ok()) else {
                return false;
            };
            match condition.operator {
                Eq => submitter_id == id,
                Ne => submitter_id != id,
                _ => false,
            }
        }
    }
}

fn text_condition_holds(actual: &str, condition: &PolicyCondition) -> bool {
    use PolicyOperator::*;

    let Some(expected) = condition.value.as_text() else {
        return false;
    };
    match condition.operator {
        Eq => actual.eq_ignore_ascii_case(expected),
        Ne => !actual.eq_ignore_ascii_case(expected),
        Contains => actual.to_lowercase().contains(&expected.to_lowercase()),
        // Patterns are validated at policy load; a failed compile here
        // simply fails the condition.
        Matches => regex::Regex::new(expected)
            .map(|re| re.is_match(actual))
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConditionValue, EscalationRule, PolicyAction};
    use chrono::Utc;

    fn expense(amount: &str, category: &str, vendor: &str) -> Expense {
        Expense {
            expense_id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            submitter_id: Uuid::new_v4(),
            expense_date: Utc::now().date_naive(),
            amount: amount.parse().unwrap(),
            currency: "USD".to_string(),
            category: category.to_string(),
            vendor: vendor.to_string(),
            description: "test expense".to_string(),
            status: "pending_review".to_string(),
            created_utc: Utc::now(),
        }
    }

    fn policy(priority: i32, conditions: Vec<PolicyCondition>) -> ApprovalPolicy {
        ApprovalPolicy {
            policy_id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            name: format!("policy-{}", priority),
            priority,
            conditions,
            action: PolicyAction::RequireApproval,
            approver_levels: vec![],
            escalation: EscalationRule::default(),
            is_active: true,
            created_utc: Utc::now(),
        }
    }

    fn amount_over(threshold: &str) -> PolicyCondition {
        PolicyCondition {
            field: PolicyField::Amount,
            operator: PolicyOperator::Gt,
            value: ConditionValue::Number(threshold.parse().unwrap()),
            combinator: Combinator::And,
        }
    }

    #[test]
    fn first_matching_policy_wins_by_rank() {
        let spend = expense("750.00", "travel", "Delta Air Lines");
        let high_value = policy(1, vec![amount_over("500")]);
        let catch_all = policy(10, vec![]);

        let policies = [catch_all.clone(), high_value.clone()];
        let selected = select_policy(&spend, spend.submitter_id, &policies).unwrap();
        assert_eq!(selected.policy_id, high_value.policy_id);
    }

    #[test]
    fn falls_through_to_catch_all_when_conditions_fail() {
        let spend = expense("120.00", "meals", "Blue Bottle Coffee");
        let high_value = policy(1, vec![amount_over("500")]);
        let catch_all = policy(10, vec![]);

        let policies = [high_value, catch_all.clone()];
        let selected = select_policy(&spend, spend.submitter_id, &policies).unwrap();
        assert_eq!(selected.policy_id, catch_all.policy_id);
    }

    #[test]
    fn returns_none_when_no_policy_matches() {
        let spend = expense("120.00", "meals", "Blue Bottle Coffee");
        let high_value = policy(1, vec![amount_over("500")]);

        assert!(select_policy(&spend, spend.submitter_id, &[high_value]).is_none());
    }

    #[test]
    fn inactive_policies_are_skipped() {
        let spend = expense("750.00", "travel", "Delta Air Lines");
        let mut high_value = policy(1, vec![amount_over("500")]);
        high_value.is_active = false;

        assert!(select_policy(&spend, spend.submitter_id, &[high_value]).is_none());
    }

    #[test]
    fn or_chain_rescues_a_failed_amount_condition() {
        let spend = expense("120.00", "travel", "Delta Air Lines");
        let travel_or_high_value = policy(
            1,
            vec![
                amount_over("500"),
                PolicyCondition {
                    field: PolicyField::Category,
                    operator: PolicyOperator::Eq,
                    value: ConditionValue::Text("travel".to_string()),
                    combinator: Combinator::Or,
                },
            ],
        );

        assert!(select_policy(&spend, spend.submitter_id, &[travel_or_high_value]).is_some());
    }

    #[test]
    fn vendor_regex_condition_matches() {
        let spend = expense("90.00", "software", "AWS EMEA SARL");
        let aws = policy(
            1,
            vec![PolicyCondition {
                field: PolicyField::Vendor,
                operator: PolicyOperator::Matches,
                value: ConditionValue::Text(r"^AWS\b".to_string()),
                combinator: Combinator::And,
            }],
        );

        assert!(select_policy(&spend, spend.submitter_id, &[aws]).is_some());
    }

    #[test]
    fn submitter_condition_compares_uuids() {
        let spend = expense("90.00", "software", "AWS EMEA SARL");
        let founder = spend.submitter_id;
        let founder_policy = policy(
            1,
            vec![PolicyCondition {
                field: PolicyField::Submitter,
                operator: PolicyOperator::Eq,
                value: ConditionValue::Text(founder.to_string()),
                combinator: Combinator::And,
            }],
        );

        assert!(select_policy(&spend, founder, &[founder_policy.clone()]).is_some());
        assert!(select_policy(&spend, Uuid::new_v4(), &[founder_policy]).is_none());
    }
}

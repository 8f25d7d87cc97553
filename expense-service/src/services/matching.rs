//! Rule-driven match engine: evaluates (source, candidate) pairs against
//! configured matching rules and ranks candidate pools.
//!
//! Evaluation is deterministic for a given rule set and pair of records,
//! and never mutates its inputs, so match results are replayable for audit.

use crate::error::ExpenseError;
use crate::models::{
    Combinator, DiscrepancyField, DiscrepancySeverity, MatchCondition, MatchDiscrepancy,
    MatchField, MatchMethod, MatchOperator, MatchResult, MatchableRecord, MatchingRule,
    ToleranceKind,
};
use crate::services::scoring;
use chrono::Utc;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use uuid::Uuid;

/// Default candidate-search cutoff: results below this confidence are not
/// worth showing for review.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 70.0;

/// Confidence above which `method` is reported as `exact`.
const EXACT_CONFIDENCE: f64 = 95.0;

/// Days of date drift beyond which a date discrepancy is high severity.
const HIGH_SEVERITY_DATE_DRIFT_DAYS: i64 = 7;

/// Weights and tolerances in effect for one evaluation: either taken from
/// the winning rule or from the built-in default split.
struct EffectiveRule {
    rule_id: Option<Uuid>,
    amount_weight: f64,
    date_weight: f64,
    vendor_weight: f64,
    amount_tolerance: Decimal,
    tolerance_kind: ToleranceKind,
    date_tolerance_days: i64,
    minimum_score: f64,
}

impl EffectiveRule {
    fn from_rule(rule: &MatchingRule) -> Self {
        Self {
            rule_id: Some(rule.rule_id),
            amount_weight: rule.amount_weight,
            date_weight: rule.date_weight,
            vendor_weight: rule.vendor_weight,
            amount_tolerance: rule.amount_tolerance,
            tolerance_kind: rule.tolerance_kind,
            date_tolerance_days: rule.date_tolerance_days,
            minimum_score: rule.minimum_score,
        }
    }

    /// The canonical 40/30/30 split with no tolerance, applied when no
    /// configured rule activates for a pair.
    fn default() -> Self {
        Self {
            rule_id: None,
            amount_weight: 0.4,
            date_weight: 0.3,
            vendor_weight: 0.3,
            amount_tolerance: Decimal::ZERO,
            tolerance_kind: ToleranceKind::Fixed,
            date_tolerance_days: 0,
            minimum_score: 90.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MatchEngine;

impl MatchEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one (source, candidate) pair against the tenant's rules.
    /// Rules are tried in rank order (priority 1 first); the first active
    /// rule whose condition chain holds wins, otherwise the default split
    /// applies. Inputs are never mutated.
    pub fn evaluate(
        &self,
        source: &MatchableRecord,
        candidate: &MatchableRecord,
        rules: &[MatchingRule],
    ) -> Result<MatchResult, ExpenseError> {
        if source.currency.trim().is_empty() || candidate.currency.trim().is_empty() {
            return Err(ExpenseError::Invalid(
                "records must carry a currency to be matched".to_string(),
            ));
        }

        let effective = self.select_rule(source, candidate, rules);

        let mut amount_score = scoring::amount_score(source.amount, candidate.amount);
        if scoring::within_amount_tolerance(
            source.amount,
            candidate.amount,
            effective.amount_tolerance,
            effective.tolerance_kind,
        ) {
            amount_score = amount_score.max(effective.minimum_score);
        }
        let date_score = scoring::date_score(
            source.record_date,
            candidate.record_date,
            effective.date_tolerance_days,
        );
        let vendor_score = scoring::text_score(&source.vendor, &candidate.vendor);

        let overall_confidence = (amount_score * effective.amount_weight
            + date_score * effective.date_weight
            + vendor_score * effective.vendor_weight)
            .round()
            .clamp(0.0, 100.0);

        let method = if overall_confidence > EXACT_CONFIDENCE {
            MatchMethod::Exact
        } else {
            MatchMethod::Fuzzy
        };

        let discrepancies = self.collect_discrepancies(source, candidate, &effective, vendor_score);

        Ok(MatchResult {
            result_id: Uuid::new_v4(),
            tenant_id: source.tenant_id,
            source_id: source.record_id,
            candidate_id: candidate.record_id,
            version: 1,
            overall_confidence,
            amount_score,
            date_score,
            vendor_score,
            discrepancies,
            method,
            rule_id: effective.rule_id,
            matched_utc: Utc::now(),
        })
    }

    /// Rank a candidate pool against a source record. Candidates already
    /// matched (or excluded) and candidates in another currency are
    /// skipped before scoring; only results at or above `threshold` are
    /// returned, best first, ties broken by earliest candidate date.
    /// Never changes candidate or source state.
    pub fn find_matches(
        &self,
        source: &MatchableRecord,
        pool: &[MatchableRecord],
        rules: &[MatchingRule],
        threshold: f64,
    ) -> Result<Vec<MatchResult>, ExpenseError> {
        let mut ranked = Vec::new();

        for candidate in pool {
            if candidate.record_id == source.record_id {
                continue;
            }
            if !candidate.is_available() || candidate.currency != source.currency {
                continue;
            }

            let result = self.evaluate(source, candidate, rules)?;
            if result.overall_confidence >= threshold {
                ranked.push((result, candidate.record_date));
            }
        }

        ranked.sort_by(|a, b| {
            b.0.overall_confidence
                .partial_cmp(&a.0.overall_confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });

        Ok(ranked.into_iter().map(|(result, _)| result).collect())
    }

    fn select_rule(
        &self,
        source: &MatchableRecord,
        candidate: &MatchableRecord,
        rules: &[MatchingRule],
    ) -> EffectiveRule {
        let mut ordered: Vec<&MatchingRule> = rules.iter().filter(|r| r.is_active).collect();
        ordered.sort_by_key(|r| r.priority);

        for rule in ordered {
            if self.conditions_hold(source, candidate, rule) {
                return EffectiveRule::from_rule(rule);
            }
        }
        EffectiveRule::default()
    }

    /// Left-to-right, short-circuiting chain: each condition's combinator
    /// joins it to the running result. No precedence between and/or.
    fn conditions_hold(
        &self,
        source: &MatchableRecord,
        candidate: &MatchableRecord,
        rule: &MatchingRule,
    ) -> bool {
        let mut conditions = rule.conditions.iter();
        let Some(first) = conditions.next() else {
            return true;
        };

        let mut holds = self.condition_holds(source, candidate, rule, first);
        for condition in conditions {
            match condition.combinator {
                Combinator::And => {
                    if holds {
                        holds = self.condition_holds(source, candidate, rule, condition);
                    }
                }
                Combinator::Or => {
                    if !holds {
                        holds = self.condition_holds(source, candidate, rule, condition);
                    }
                }
            }
        }
        holds
    }

    fn condition_holds(
        &self,
        source: &MatchableRecord,
        candidate: &MatchableRecord,
        rule: &MatchingRule,
        condition: &MatchCondition,
    ) -> bool {
        match (condition.field, condition.operator) {
            (MatchField::Amount, MatchOperator::WithinTolerance) => scoring::within_amount_tolerance(
                source.amount,
                candidate.amount,
                rule.amount_tolerance,
                rule.tolerance_kind,
            ),
            (MatchField::Date, MatchOperator::WithinTolerance) => {
                scoring::days_between(source.record_date, candidate.record_date)
                    <= rule.date_tolerance_days
            }
            (MatchField::Description, MatchOperator::Contains) => condition
                .value
                .as_deref()
                .map(|needle| {
                    text_contains(&source.description, needle)
                        || text_contains(&candidate.description, needle)
                })
                .unwrap_or(false),
            (MatchField::Vendor, MatchOperator::Contains) => condition
                .value
                .as_deref()
                .map(|needle| {
                    text_contains(&source.vendor, needle) || text_contains(&candidate.vendor, needle)
                })
                .unwrap_or(false),
            // Unknown pairings are rejected at rule load; nothing to match here.
            _ => false,
        }
    }

    /// A discrepancy is recorded for every field whose raw difference is
    /// non-zero, whether or not the field passed its tolerance.
    fn collect_discrepancies(
        &self,
        source: &MatchableRecord,
        candidate: &MatchableRecord,
        effective: &EffectiveRule,
        vendor_score: f64,
    ) -> Vec<MatchDiscrepancy> {
        let mut discrepancies = Vec::new();

        if source.amount != candidate.amount {
            let difference = (source.amount - candidate.amount).abs();
            let larger = source.amount.abs().max(candidate.amount.abs());
            let tolerance_amount = match effective.tolerance_kind {
                ToleranceKind::Fixed => effective.amount_tolerance,
                ToleranceKind::Percentage => larger * effective.amount_tolerance / Decimal::from(100),
            };
            let severity = if difference > tolerance_amount + larger / Decimal::from(10) {
                DiscrepancySeverity::High
            } else {
                DiscrepancySeverity::Medium
            };
            discrepancies.push(MatchDiscrepancy {
                field: DiscrepancyField::Amount,
                source_value: source.amount.to_string(),
                candidate_value: candidate.amount.to_string(),
                difference: difference.to_string(),
                severity,
            });
        }

        if source.record_date != candidate.record_date {
            let days = scoring::days_between(source.record_date, candidate.record_date);
            let severity = if days > HIGH_SEVERITY_DATE_DRIFT_DAYS {
                DiscrepancySeverity::High
            } else {
                DiscrepancySeverity::Medium
            };
            discrepancies.push(MatchDiscrepancy {
                field: DiscrepancyField::Date,
                source_value: source.record_date.to_string(),
                candidate_value: candidate.record_date.to_string(),
                difference: format!("{} days", days),
                severity,
            });
        }

        let source_vendor = source.vendor.trim().to_lowercase();
        let candidate_vendor = candidate.vendor.trim().to_lowercase();
        if source_vendor != candidate_vendor {
            let severity = if vendor_score >= 80.0 {
                DiscrepancySeverity::Low
            } else if vendor_score >= 50.0 {
                DiscrepancySeverity::Medium
            } else {
                DiscrepancySeverity::High
            };
            discrepancies.push(MatchDiscrepancy {
                field: DiscrepancyField::Vendor,
                source_value: source.vendor.clone(),
                candidate_value: candidate.vendor.clone(),
                difference: format!("similarity {:.0}%", vendor_score),
                severity,
            });
        }

        discrepancies
    }
}

fn text_contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.trim().to_lowercase())
}

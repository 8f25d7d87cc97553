//! Per-field similarity scoring between two records.
//!
//! All functions are pure, return 0–100 (higher = more similar), and never
//! fail on malformed text: bad input degrades to a low score.

use crate::models::ToleranceKind;
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

pub const FULL_SCORE: f64 = 100.0;

/// Relative difference at which the amount score bottoms out.
const AMOUNT_DECAY_CEILING: f64 = 0.10;

/// Linear decay from 100 at zero difference to 0 at a 10% relative
/// difference, measured against the larger absolute amount.
pub fn amount_score(source: Decimal, candidate: Decimal) -> f64 {
    let difference = (source - candidate).abs();
    if difference.is_zero() {
        return FULL_SCORE;
    }

    let larger = source.abs().max(candidate.abs());
    let pct = (difference / larger).to_f64().unwrap_or(1.0);
    ((1.0 - pct / AMOUNT_DECAY_CEILING) * FULL_SCORE).clamp(0.0, FULL_SCORE)
}

/// Whether two amounts fall within a rule's tolerance. A percentage
/// tolerance is expressed in percentage points of the larger amount.
pub fn within_amount_tolerance(
    source: Decimal,
    candidate: Decimal,
    tolerance: Decimal,
    kind: ToleranceKind,
) -> bool {
    let difference = (source - candidate).abs();
    match kind {
        ToleranceKind::Fixed => difference <= tolerance,
        ToleranceKind::Percentage => {
            let larger = source.abs().max(candidate.abs());
            if larger.is_zero() {
                return difference.is_zero();
            }
            Decimal::from(100) * difference / larger <= tolerance
        }
    }
}

/// Absolute whole-day distance between two dates.
pub fn days_between(source: NaiveDate, candidate: NaiveDate) -> i64 {
    (source - candidate).num_days().abs()
}

/// 100 at zero days' difference, decaying by a fixed step per day, floored
/// at 0. The step is sized so the score stays positive inside the
/// tolerance window and reaches 0 just past it.
pub fn date_score(source: NaiveDate, candidate: NaiveDate, tolerance_days: i64) -> f64 {
    let days = days_between(source, candidate) as f64;
    let step = FULL_SCORE / (tolerance_days.max(0) as f64 + 1.0);
    (FULL_SCORE - days * step).max(0.0)
}

/// Normalized Levenshtein similarity on lower-cased, trimmed strings.
/// One empty side scores 0. Both empty score 100, a vacuous match that
/// candidate ranking must not treat as positive evidence on its own.
pub fn text_score(source: &str, candidate: &str) -> f64 {
    let a = source.trim().to_lowercase();
    let b = candidate.trim().to_lowercase();

    if a.is_empty() && b.is_empty() {
        return FULL_SCORE;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    (strsim::normalized_levenshtein(&a, &b) * FULL_SCORE).round()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn identical_amounts_score_full() {
        assert_eq!(amount_score(dec("100.00"), dec("100.00")), 100.0);
    }

    #[test]
    fn five_percent_difference_scores_near_half() {
        let score = amount_score(dec("100.00"), dec("105.00"));
        // 5/105 ≈ 4.76% of the larger amount → just above the midpoint
        assert!((score - 52.38).abs() < 0.05, "got {}", score);
    }

    #[test]
    fn amount_score_is_monotonic_in_difference() {
        let mut previous = amount_score(dec("100.00"), dec("100.00"));
        for candidate in ["101.00", "103.00", "105.00", "108.00", "111.00", "150.00"] {
            let score = amount_score(dec("100.00"), dec(candidate));
            assert!(score <= previous, "score rose at {}", candidate);
            previous = score;
        }
    }

    #[test]
    fn ten_percent_difference_floors_at_zero() {
        assert_eq!(amount_score(dec("100.00"), dec("200.00")), 0.0);
    }

    #[test]
    fn fixed_tolerance_covers_small_differences() {
        assert!(within_amount_tolerance(
            dec("100.00"),
            dec("104.50"),
            dec("5.00"),
            ToleranceKind::Fixed
        ));
        assert!(!within_amount_tolerance(
            dec("100.00"),
            dec("106.00"),
            dec("5.00"),
            ToleranceKind::Fixed
        ));
    }

    #[test]
    fn percentage_tolerance_scales_with_amount() {
        assert!(within_amount_tolerance(
            dec("1000.00"),
            dec("1040.00"),
            dec("4.00"),
            ToleranceKind::Percentage
        ));
        assert!(!within_amount_tolerance(
            dec("100.00"),
            dec("110.00"),
            dec("4.00"),
            ToleranceKind::Percentage
        ));
    }

    #[test]
    fn date_score_decays_per_day() {
        let anchor = date("2026-03-10");
        assert_eq!(date_score(anchor, anchor, 3), 100.0);
        assert_eq!(date_score(anchor, date("2026-03-11"), 3), 75.0);
        assert_eq!(date_score(anchor, date("2026-03-13"), 3), 25.0);
        assert_eq!(date_score(anchor, date("2026-03-20"), 3), 0.0);
    }

    #[test]
    fn zero_tolerance_dates_are_same_day_or_nothing() {
        let anchor = date("2026-03-10");
        assert_eq!(date_score(anchor, anchor, 0), 100.0);
        assert_eq!(date_score(anchor, date("2026-03-11"), 0), 0.0);
    }

    #[test]
    fn identical_text_scores_full_after_normalization() {
        assert_eq!(text_score("  ACME Corp ", "acme corp"), 100.0);
    }

    #[test]
    fn one_empty_side_scores_zero() {
        assert_eq!(text_score("", "acme corp"), 0.0);
        assert_eq!(text_score("acme corp", "   "), 0.0);
    }

    #[test]
    fn both_empty_is_a_vacuous_full_match() {
        assert_eq!(text_score("", ""), 100.0);
    }

    #[test]
    fn similar_text_scores_high() {
        let score = text_score("STRIPE PAYOUT 8842", "STRIPE PAYOUT 8843");
        assert!(score > 90.0, "got {}", score);
    }
}

//! Prometheus metrics for expense-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "expense_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for match engine operations by outcome.
pub static MATCH_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "expense_match_operations_total",
        "Total number of matching operations",
        &["operation", "status"]
    )
    .expect("Failed to register MATCH_OPERATIONS")
});

/// Histogram of overall match confidence scores.
pub static MATCH_CONFIDENCE: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "expense_match_confidence",
        "Overall confidence of computed match results",
        vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 95.0, 100.0]
    )
    .expect("Failed to register MATCH_CONFIDENCE")
});

/// Counter for expense submissions by policy action taken.
pub static APPROVAL_SUBMISSIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "expense_approval_submissions_total",
        "Total number of expense submissions",
        &["action"]
    )
    .expect("Failed to register APPROVAL_SUBMISSIONS")
});

/// Counter for approval decisions by decision and resulting status.
pub static APPROVAL_DECISIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "expense_approval_decisions_total",
        "Total number of approval decisions",
        &["decision", "status"]
    )
    .expect("Failed to register APPROVAL_DECISIONS")
});

/// Counter for escalation sweep actions.
pub static ESCALATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "expense_escalations_total",
        "Total number of escalation actions",
        &["action"]
    )
    .expect("Failed to register ESCALATIONS")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "expense_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&MATCH_OPERATIONS);
    Lazy::force(&MATCH_CONFIDENCE);
    Lazy::force(&APPROVAL_SUBMISSIONS);
    Lazy::force(&APPROVAL_DECISIONS);
    Lazy::force(&ESCALATIONS);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a matching operation.
pub fn record_match_operation(operation: &str, status: &str) {
    MATCH_OPERATIONS.with_label_values(&[operation, status]).inc();
}

/// Record the confidence of a computed match result.
pub fn observe_match_confidence(confidence: f64) {
    MATCH_CONFIDENCE.observe(confidence);
}

/// Record an expense submission.
pub fn record_submission(action: &str) {
    APPROVAL_SUBMISSIONS.with_label_values(&[action]).inc();
}

/// Record an approval decision.
pub fn record_decision(decision: &str, status: &str) {
    APPROVAL_DECISIONS.with_label_values(&[decision, status]).inc();
}

/// Record an escalation action.
pub fn record_escalation(action: &str) {
    ESCALATIONS.with_label_values(&[action]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}

//! Services module for expense-service.

pub mod approval;
pub mod database;
pub mod matching;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod policy;
pub mod scoring;

pub use approval::ApprovalWorkflow;
pub use database::Database;
pub use matching::MatchEngine;
pub use metrics::{get_metrics, init_metrics};
pub use notify::{NotificationSender, TracingNotifier};
pub use orchestrator::{Orchestrator, ProcessOutcome};

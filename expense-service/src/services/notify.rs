//! Notification collaborator for approval workflow events.
//!
//! The workflow only signals the event and the recipient set; formatting
//! and delivery (email, push) belong to the notification platform.

use crate::models::{ApprovalEvent, ApprovalRequest};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn notify(&self, request: &ApprovalRequest, event: ApprovalEvent, recipients: &[Uuid]);
}

/// Default sender: emits the event into the log stream.
pub struct TracingNotifier;

#[async_trait]
impl NotificationSender for TracingNotifier {
    async fn notify(&self, request: &ApprovalRequest, event: ApprovalEvent, recipients: &[Uuid]) {
        tracing::info!(
            request_id = %request.request_id,
            expense_id = %request.expense_id,
            event = %event.as_str(),
            recipient_count = recipients.len(),
            "Approval notification"
        );
    }
}

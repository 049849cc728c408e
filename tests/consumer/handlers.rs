//! Handlers registered by naming convention.

use serde_json::Value;
use topic_consumer::Disposition;

use crate::support::{TaskCreatedStateChangeEvent, TaskDeletedStateChangeEvent};

/// Empty titles are invalid forever; "flaky" titles never succeed.
pub async fn on_task_created(event: TaskCreatedStateChangeEvent) -> Disposition {
    match event.title.as_str() {
        "" => Disposition::Reject,
        "flaky" => Disposition::Retry,
        _ => Disposition::Ack,
    }
}

/// Raw body; returns nothing, so every message is acked.
pub async fn on_task_updated(_body: Value) {}

pub async fn on_task_deleted(event: TaskDeletedStateChangeEvent) -> Result<(), String> {
    if event.task_id.starts_with("locked-") {
        return Err(format!("task {} is locked", event.task_id));
    }
    Ok(())
}

pub async fn audit(_body: Value) -> Option<Disposition> {
    None
}

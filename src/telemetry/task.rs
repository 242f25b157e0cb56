//! Task execution span helpers.
//!
//! Provides span creation and state-transition recording for deliveries
//! flowing through the worker.

use opentelemetry::KeyValue;
use tracing::Span;

use super::metrics;
use crate::model::{TaskStatus, TaskType};

/// Start a span for one delivery.
///
/// The `task.id` field is declared empty and filled once the task row is
/// found by correlation id.
pub fn start_task_span(task_type: TaskType, correlation_id: &str) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.type" = task_type.as_str(),
        "task.correlation_id" = correlation_id,
        "task.id" = tracing::field::Empty,
    )
}

/// Record a status transition on the given span and count it.
pub fn record_state_transition(span: &Span, from: TaskStatus, to: TaskStatus) {
    span.in_scope(|| {
        tracing::info!(from = from.as_str(), to = to.as_str(), "state_transition");
    });
    metrics::task_state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
}

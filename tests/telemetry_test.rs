//! Integration tests for telemetry initialization and span helpers.

use channel_tasks::model::{TaskStatus, TaskType};
use channel_tasks::telemetry::{TelemetryConfig, init_telemetry, metrics, task};
use opentelemetry::KeyValue;

#[test]
fn telemetry_initializes_without_endpoint() {
    // The global subscriber can only be set once per process, so a second
    // init in the same binary returns Err; either outcome is fine here.
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: None,
        service_name: "channel-tasks-test".to_string(),
        default_filter: "debug".to_string(),
    });
}

#[test]
fn task_span_records_transitions() {
    let span = task::start_task_span(TaskType::StartTracking, "17");
    span.record("task.id", 3_i64);
    task::record_state_transition(&span, TaskStatus::Pending, TaskStatus::Running);
    task::record_state_transition(&span, TaskStatus::Running, TaskStatus::Completed);
}

#[test]
fn metric_instruments_accept_recordings_without_provider() {
    metrics::tasks_created().add(1, &[KeyValue::new("task_type", "start_tracking")]);
    metrics::scheduler_cycles().add(1, &[KeyValue::new("result", "ok")]);
    metrics::side_effect_failures().add(1, &[KeyValue::new("kind", "notify")]);
    metrics::execution_duration_ms().record(12.5, &[KeyValue::new("status", "completed")]);
}

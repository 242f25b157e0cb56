//! Metric instrument factories for channel-tasks.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"channel-tasks"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for channel-tasks instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("channel-tasks")
}

/// Counter: tasks created.
/// Labels: `task_type`, `result` ("ok" | "broker_unavailable").
pub fn tasks_created() -> Counter<u64> {
    meter()
        .u64_counter("channel_tasks.tasks.created")
        .with_description("Number of tasks created")
        .build()
}

/// Counter: task status transitions.
/// Labels: `from`, `to`.
pub fn task_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("channel_tasks.tasks.state_transitions")
        .with_description("Number of task status transitions")
        .build()
}

/// Counter: queue-level operations (create, send, read, archive).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("channel_tasks.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: revisit scheduler cycles.
/// Labels: `result` ("ok" | "error").
pub fn scheduler_cycles() -> Counter<u64> {
    meter()
        .u64_counter("channel_tasks.scheduler.cycles")
        .with_description("Number of revisit scheduler cycles")
        .build()
}

/// Counter: completion side effects that failed after the status commit.
/// Labels: `kind` ("track_channel" | "revisit_channel" | "notify").
pub fn side_effect_failures() -> Counter<u64> {
    meter()
        .u64_counter("channel_tasks.side_effects.failed")
        .with_description("Completion side effects that failed")
        .build()
}

/// Histogram: task execution duration in milliseconds.
/// Labels: `task_type`, `status`.
pub fn execution_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("channel_tasks.execution.duration_ms")
        .with_description("Task execution duration in milliseconds")
        .with_unit("ms")
        .build()
}

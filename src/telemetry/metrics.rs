//! Metric instrument factories for shopflow.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"shopflow"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for shopflow instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("shopflow")
}

/// Counter: queue operations.
/// Labels: `operation` ("create" | "update" | "delete"), `result`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("shopflow.queue.operations")
        .with_description("Number of queue entry operations")
        .build()
}

/// Counter: permission changes propagated to other entries.
/// Labels: `kind` ("granted" | "reset" | "head_insert" | "middle_insert" | "handoff").
pub fn queue_cascades() -> Counter<u64> {
    meter()
        .u64_counter("shopflow.queue.cascades")
        .with_description("Number of permission cascades across a file's queue")
        .build()
}

/// Counter: envelopes published.
/// Labels: `topic`, `event`.
pub fn fanout_published() -> Counter<u64> {
    meter()
        .u64_counter("shopflow.fanout.published")
        .with_description("Number of envelopes published to user topics")
        .build()
}

/// Counter: fan-out failures (swallowed).
/// Labels: `stage`, or `topic` + `event` for publish failures.
pub fn fanout_failures() -> Counter<u64> {
    meter()
        .u64_counter("shopflow.fanout.failures")
        .with_description("Number of failed fan-out steps")
        .build()
}

/// Counter: persisted notifications.
pub fn notifications_created() -> Counter<u64> {
    meter()
        .u64_counter("shopflow.notifications.created")
        .with_description("Number of notifications persisted")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("shopflow.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}

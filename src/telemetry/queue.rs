//! Queue operation span helpers.

use tracing::Span;

use crate::model::{DepartmentId, FileId};

/// Start a span for one queue operation on a file.
///
/// `queue.outcome` is declared empty and filled by [`record_outcome`].
pub fn start_queue_span(operation: &str, file: FileId, department: DepartmentId) -> Span {
    tracing::info_span!(
        "queue.mutate",
        "queue.operation" = operation,
        "queue.file" = %file.0,
        "queue.department" = %department.0,
        "queue.outcome" = tracing::field::Empty,
    )
}

/// Record how the chain reacted, and emit an event inside the span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("queue.outcome", outcome);
    span.in_scope(|| {
        tracing::info!(outcome, "queue_transition");
    });
}

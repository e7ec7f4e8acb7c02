//! Collection cycle span helpers.
//!
//! One span per cycle; the outcome fields are declared empty and filled in
//! by [`record_cycle_report`] when the cycle finishes.

use tracing::Span;

use crate::coordinator::CycleReport;

/// Start a span for one collection cycle, nested under `parent`.
pub fn start_cycle_span(parent: &Span, cycle: u64) -> Span {
    tracing::info_span!(
        parent: parent,
        "cycle",
        "cycle.number" = cycle,
        "cycle.produced" = tracing::field::Empty,
        "cycle.delivered" = tracing::field::Empty,
        "cycle.spooled" = tracing::field::Empty,
        "cycle.replayed" = tracing::field::Empty,
        "cycle.replay_failed" = tracing::field::Empty,
    )
}

/// Fill the outcome fields of a cycle span and emit a summary event in it.
pub fn record_cycle_report(span: &Span, report: &CycleReport) {
    span.record("cycle.produced", report.is_success());
    span.record("cycle.delivered", report.delivered_direct);
    span.record("cycle.spooled", report.spooled.is_some());
    span.record("cycle.replayed", report.replayed as u64);
    span.record("cycle.replay_failed", report.replay_failed as u64);

    span.in_scope(|| {
        tracing::info!(
            produced = report.is_success(),
            delivered = report.delivered_direct,
            spooled = ?report.spooled.map(|id| id.to_string()),
            data_lost = report.data_lost,
            replayed = report.replayed,
            replay_failed = report.replay_failed,
            spool_remaining = ?report.spool_remaining,
            cancelled = report.cancelled,
            "cycle finished"
        );
    });
}

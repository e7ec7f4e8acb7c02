//! Metric instrument factories for posture-agent.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op, so recording is
//! always safe.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for posture-agent instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("posture-agent")
}

/// Counter: snapshots requested from the producer.
/// Labels: `result` ("ok" | "error").
pub fn snapshots_produced() -> Counter<u64> {
    meter()
        .u64_counter("posture.snapshots.produced")
        .with_description("Number of snapshot production attempts")
        .build()
}

/// Counter: delivery attempts.
/// Labels: `path` ("direct" | "replay"), `result` ("ok" | "error").
pub fn deliveries() -> Counter<u64> {
    meter()
        .u64_counter("posture.deliveries")
        .with_description("Number of snapshot delivery attempts")
        .build()
}

/// Counter: events written to the spool.
/// Labels: `result` ("ok" | "error").
pub fn spool_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("posture.spool.enqueued")
        .with_description("Number of events written to the spool")
        .build()
}

/// Counter: events dropped from the spool by capacity pressure.
pub fn spool_evicted() -> Counter<u64> {
    meter()
        .u64_counter("posture.spool.evicted")
        .with_description("Number of spooled events evicted at capacity")
        .build()
}

/// Histogram: collection cycle duration in milliseconds.
pub fn cycle_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("posture.cycle.duration_ms")
        .with_description("Collection cycle duration in milliseconds")
        .with_unit("ms")
        .build()
}

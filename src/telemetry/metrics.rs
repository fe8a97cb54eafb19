//! Metric instrument factories for actgate.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"actgate"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for actgate instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("actgate")
}

/// Counter: calls seen by the gate.
/// Labels: `namespace`, `route` ("locked" | "reentrant" | "passthrough" | "deduped").
pub fn dispatches() -> Counter<u64> {
    meter()
        .u64_counter("actgate.dispatches")
        .with_description("Number of dispatches seen by the gate")
        .build()
}

/// Counter: dedupe decisions that matched a phase.
/// Labels: `phase` ("in_flight" | "quick_repeat"), `mode`.
pub fn dedupe_decisions() -> Counter<u64> {
    meter()
        .u64_counter("actgate.dedupe.decisions")
        .with_description("Number of duplicate calls detected")
        .build()
}

/// Counter: settled action executions.
/// Labels: `namespace`, `result` ("ok" | "error").
pub fn executions() -> Counter<u64> {
    meter()
        .u64_counter("actgate.executions")
        .with_description("Number of settled action executions")
        .build()
}

/// Histogram: action body duration in milliseconds, excluding queue time.
/// Labels: `namespace`.
pub fn action_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("actgate.action.duration_ms")
        .with_description("Action body duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Histogram: time spent waiting for the namespace lock, in milliseconds.
/// Labels: `namespace`.
pub fn queue_wait_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("actgate.queue.wait_ms")
        .with_description("Time spent waiting for the namespace lock")
        .with_unit("ms")
        .build()
}

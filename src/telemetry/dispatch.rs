//! Dispatch span helpers.
//!
//! Provides span creation and state-transition recording for calls
//! flowing through the gate.

use tracing::Span;

/// Start a span for one gated call.
///
/// The `dispatch.state` field is declared empty and is updated by
/// [`record_state_transition`].
pub fn start_dispatch_span(action: &str, namespace: &str, seq: u64) -> Span {
    tracing::info_span!(
        "dispatch.execute",
        "dispatch.action" = action,
        "dispatch.namespace" = namespace,
        "dispatch.seq" = seq,
        "dispatch.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the span and emit an `info` event in it.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("dispatch.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}

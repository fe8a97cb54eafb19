//! The dispatch gate: wraps a host dispatcher with per-namespace mutual
//! exclusion and duplicate-call suppression.
//!
//! Every decision about a call (scope, dedupe, reentrancy, queue position)
//! is taken synchronously inside [`DispatchGate::dispatch_call`]. Accepted
//! calls then run on their own tokio task, so the caller dropping its
//! future neither cancels the action nor skips bookkeeping.

use crate::action::{ActionId, ActionRef, DispatchCall, DispatchOptions};
use crate::config::GateConfig;
use crate::dispatch::{Dispatch, DispatchFuture};
use crate::error::{Error, Result};
use crate::telemetry::dispatch::{record_state_transition, start_dispatch_span};
use crate::telemetry::metrics;
use crate::telemetry::throttle::LogThrottle;
use futures::FutureExt;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use super::dedupe::{Decision, DedupeLedger, PendingResult, Phase, dedupe_key};
use super::instrument::{HealthSnapshot, Instrumentation};
use super::mutex::MutexRegistry;
use super::reentrancy::{ReentrancyTracker, ScopeKey};

/// Gate around one host dispatcher. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DispatchGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    id: Uuid,
    target: Arc<dyn Dispatch>,
    config: GateConfig,
    mutexes: MutexRegistry,
    ledger: Mutex<DedupeLedger>,
    instrument: Instrumentation,
    throttle: LogThrottle,
    next_call: AtomicU64,
}

/// Point-in-time view of a gate's state.
#[derive(Debug, Clone, Serialize)]
pub struct GateSnapshot {
    pub gate_id: Uuid,
    pub namespaces: usize,
    pub in_flight: Vec<String>,
    pub completed_keys: usize,
    pub health: HealthSnapshot,
}

/// How an accepted call reaches the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Locked,
    Reentrant,
}

impl Route {
    fn as_str(self) -> &'static str {
        match self {
            Route::Locked => "locked",
            Route::Reentrant => "reentrant",
        }
    }
}

impl DispatchGate {
    /// Wrap `target`. Prefer [`DispatchGate::install`] when `target` may
    /// already be gated.
    pub fn new(target: Arc<dyn Dispatch>, config: GateConfig) -> Self {
        let instrument = Instrumentation::new(config.debug_mode, config.health_idle());
        let throttle = LogThrottle::new(config.log_throttle());
        Self {
            inner: Arc::new(GateInner {
                id: Uuid::new_v4(),
                target,
                config,
                mutexes: MutexRegistry::new(),
                ledger: Mutex::new(DedupeLedger::new()),
                instrument,
                throttle,
                next_call: AtomicU64::new(1),
            }),
        }
    }

    /// Gate `target` unless it already is a gate, in which case it is
    /// returned unchanged.
    pub fn install(target: Arc<dyn Dispatch>, config: GateConfig) -> Arc<dyn Dispatch> {
        if let Some(gate) = target.as_gate() {
            debug!(gate_id = %gate.id(), "dispatcher already gated");
            return target;
        }
        Arc::new(Self::new(target, config))
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &GateConfig {
        &self.inner.config
    }

    /// Dispatch `action` with an optional explicit payload.
    pub fn dispatch(
        &self,
        action: impl Into<ActionRef>,
        payload: Option<Value>,
        options: DispatchOptions,
    ) -> DispatchFuture {
        self.dispatch_call(DispatchCall {
            action: action.into(),
            payload,
            options,
        })
    }

    /// Route one call through the gate.
    ///
    /// Must be called from within a tokio runtime: accepted calls are
    /// spawned onto it.
    pub fn dispatch_call(&self, call: DispatchCall) -> DispatchFuture {
        let inner = &self.inner;

        let Some(id) = call.action.key().and_then(ActionId::parse) else {
            debug!(action = ?call.action, "unparseable action, passing through");
            return inner.target.dispatch(call);
        };

        if !inner.config.in_scope(&id.full_key) {
            metrics::dispatches().add(
                1,
                &[
                    KeyValue::new("namespace", id.namespace.clone()),
                    KeyValue::new("route", "passthrough"),
                ],
            );
            return inner.target.dispatch(call);
        }

        let payload = call.effective_payload();
        let key = dedupe_key(&id, payload.as_ref());
        let track_dedupe = !inner.config.skips_dedupe(&id.full_key);
        let scope = ScopeKey::new(inner.id, id.namespace.clone());
        let route = if ReentrancyTracker::is_active_here(&scope) {
            Route::Reentrant
        } else {
            Route::Locked
        };

        // Check and registration happen under one ledger lock so that no
        // identical call can slip in between them.
        let mut ledger = inner.ledger.lock();

        if track_dedupe {
            let verdict = ledger.check(
                &id.full_key,
                &key,
                &inner.config.dedupe,
                Instant::now(),
                route == Route::Reentrant,
            );
            for phase in verdict.warned {
                self.log_duplicate(&id, &key, phase, "warn", None);
            }
            let outcome = verdict.decision.label();
            match verdict.decision {
                Decision::Proceed => {}
                Decision::Share(handle) => {
                    self.log_duplicate(&id, &key, Phase::InFlight, outcome, None);
                    self.count_deduped(&id);
                    return handle.boxed();
                }
                Decision::Drop { phase } => {
                    self.log_duplicate(&id, &key, phase, outcome, None);
                    self.count_deduped(&id);
                    return futures::future::ready(Ok(None)).boxed();
                }
                Decision::Block(err) => {
                    let phase = match err {
                        Error::BlockedQuickRepeat { .. } => Phase::QuickRepeat,
                        _ => Phase::InFlight,
                    };
                    self.log_duplicate(&id, &key, phase, outcome, Some(&err));
                    self.count_deduped(&id);
                    return futures::future::ready(Err(err)).boxed();
                }
            }
        }

        let owner = inner.next_call.fetch_add(1, Ordering::SeqCst);
        let seq = inner.instrument.call_queued(&key);
        let span = start_dispatch_span(&id.full_key, &id.namespace, seq);
        if inner.config.debug_mode {
            record_state_transition(&span, "parsed", "queued");
        }
        metrics::dispatches().add(
            1,
            &[
                KeyValue::new("namespace", id.namespace.clone()),
                KeyValue::new("route", route.as_str()),
            ],
        );

        let settle = Settle {
            gate: Arc::clone(inner),
            key: key.clone(),
            owner,
            track_dedupe,
            ran: false,
            ok: false,
        };
        let namespace = id.namespace.clone();
        let execution = Execution {
            gate: Arc::clone(inner),
            call,
            id,
            settle,
            stack: ReentrancyTracker::current(),
            scope,
            queued_at: Instant::now(),
        };

        // Queue position is taken under the ledger lock. The task is spawned
        // only after it is released: a shutting-down runtime drops the task
        // inline, and settling takes the lock.
        let work = match route {
            Route::Reentrant => execution.run().boxed(),
            Route::Locked => inner
                .mutexes
                .acquire(&namespace)
                .run_exclusive(execution.run())
                .boxed(),
        };

        let (task_tx, task_rx) = oneshot::channel::<JoinHandle<Result<Option<Value>>>>();
        let handle: PendingResult = async move {
            match task_rx.await {
                Ok(task) => task
                    .await
                    .unwrap_or_else(|e| Err(Error::Aborted(e.to_string()))),
                Err(_) => Err(Error::Aborted("execution was never started".to_string())),
            }
        }
        .boxed()
        .shared();

        if track_dedupe {
            ledger.register(&key, owner, route == Route::Reentrant, handle.clone());
        }
        drop(ledger);

        let _ = task_tx.send(tokio::spawn(work.instrument(span)));
        handle.boxed()
    }

    /// Current state of the gate.
    pub fn snapshot(&self) -> GateSnapshot {
        let ledger = self.inner.ledger.lock();
        GateSnapshot {
            gate_id: self.inner.id,
            namespaces: self.inner.mutexes.len(),
            in_flight: ledger.in_flight_keys(),
            completed_keys: ledger.completed_len(),
            health: self.inner.instrument.health(),
        }
    }

    /// Whether `namespace` is entered on the running task's call stack.
    pub fn is_active_here(&self, namespace: &str) -> bool {
        ReentrancyTracker::is_active_here(&ScopeKey::new(self.inner.id, namespace))
    }

    /// Nesting depth of `namespace` on the running task's call stack.
    pub fn depth_here(&self, namespace: &str) -> usize {
        ReentrancyTracker::depth_here(&ScopeKey::new(self.inner.id, namespace))
    }

    fn log_duplicate(
        &self,
        id: &ActionId,
        key: &str,
        phase: Phase,
        outcome: &'static str,
        error: Option<&Error>,
    ) {
        let modes = &self.inner.config.dedupe;
        let mode = match phase {
            Phase::InFlight => modes.in_flight_mode,
            Phase::QuickRepeat => modes.quick_repeat_mode,
        };
        metrics::dedupe_decisions().add(
            1,
            &[
                KeyValue::new("phase", phase.as_str()),
                KeyValue::new("mode", mode.as_str()),
            ],
        );

        if self.inner.config.production_mode || !self.inner.throttle.allow(phase.as_str(), key) {
            return;
        }
        match error {
            Some(err) => {
                warn!(action = %id, %phase, %mode, error = %err, "duplicate call blocked");
            }
            None => {
                warn!(
                    action = %id,
                    %phase,
                    %mode,
                    decision = outcome,
                    dedupe_key = key,
                    "duplicate call"
                );
            }
        }
    }

    fn count_deduped(&self, id: &ActionId) {
        metrics::dispatches().add(
            1,
            &[
                KeyValue::new("namespace", id.namespace.clone()),
                KeyValue::new("route", "deduped"),
            ],
        );
    }
}

impl Dispatch for DispatchGate {
    fn dispatch(&self, call: DispatchCall) -> DispatchFuture {
        self.dispatch_call(call)
    }

    fn as_gate(&self) -> Option<&DispatchGate> {
        Some(self)
    }
}

/// An accepted call, moved onto its own task.
struct Execution {
    gate: Arc<GateInner>,
    call: DispatchCall,
    id: ActionId,
    settle: Settle,
    stack: ReentrancyTracker,
    scope: ScopeKey,
    queued_at: Instant,
}

impl Execution {
    async fn run(self) -> Result<Option<Value>> {
        let Execution {
            gate,
            call,
            id,
            mut settle,
            stack,
            scope,
            queued_at,
        } = self;

        let namespace = KeyValue::new("namespace", id.namespace.clone());
        metrics::queue_wait_ms().record(
            queued_at.elapsed().as_secs_f64() * 1000.0,
            std::slice::from_ref(&namespace),
        );

        let debug_mode = gate.config.debug_mode;
        let span = tracing::Span::current();
        if debug_mode {
            record_state_transition(&span, "queued", "running");
        }
        gate.instrument.call_running(&settle.key);
        settle.ran = true;

        let started = Instant::now();
        let target = Arc::clone(&gate.target);
        let result = stack
            .run_within(scope, async move { target.dispatch(call).await })
            .await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        settle.ok = result.is_ok();
        metrics::action_duration_ms().record(elapsed_ms, std::slice::from_ref(&namespace));
        metrics::executions().add(
            1,
            &[
                namespace,
                KeyValue::new("result", if settle.ok { "ok" } else { "error" }),
            ],
        );
        if debug_mode {
            record_state_transition(&span, "running", "settled");
            match &result {
                Ok(_) => info!(action = %id, elapsed_ms, "action settled"),
                Err(e) => info!(action = %id, elapsed_ms, error = %e, "action failed"),
            }
        }

        drop(settle);
        result
    }
}

/// Bookkeeping that must run however an execution ends. Created when the
/// call is accepted, so a call dropped while still queued settles too.
struct Settle {
    gate: Arc<GateInner>,
    key: String,
    owner: u64,
    track_dedupe: bool,
    ran: bool,
    ok: bool,
}

impl Drop for Settle {
    fn drop(&mut self) {
        if self.track_dedupe {
            let mut ledger = self.gate.ledger.lock();
            ledger.record_completion(&self.key, Instant::now());
            ledger.release(&self.key, self.owner);
        }
        self.gate
            .instrument
            .call_settled(&self.key, self.ok, self.ran);
    }
}

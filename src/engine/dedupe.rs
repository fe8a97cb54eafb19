//! Dedupe keys and the two-phase dedupe ledger.
//!
//! Phase 1 looks for an identical call that is still queued or running;
//! phase 2 looks for one that settled within the quick-repeat threshold.
//! Each phase answers with its configured [`DedupeMode`].

use crate::action::ActionId;
use crate::config::{DedupeConfig, DedupeMode};
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Result handle shared by every caller of one execution.
pub type PendingResult = Shared<BoxFuture<'static, Result<Option<Value>>>>;

/// Build the dedupe key of a call.
pub fn dedupe_key(id: &ActionId, payload: Option<&Value>) -> String {
    let mut key = String::with_capacity(id.full_key.len() + 32);
    key.push_str(&id.namespace);
    key.push_str(&id.action_name);
    key.push('|');
    write_canonical(payload.unwrap_or(&Value::Null), &mut key);
    key
}

/// Serialize `value` with object keys sorted at every level and date-like
/// strings rewritten to UTC RFC 3339 with millisecond precision.
pub fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_json_string(k, out);
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => match canonical_date(s) {
            Some(date) => push_json_string(&date, out),
            None => push_json_string(s, out),
        },
        other => out.push_str(&other.to_string()),
    }
}

fn push_json_string(s: &str, out: &mut String) {
    out.push_str(&Value::String(s.to_string()).to_string());
}

/// Canonical form of a date-like string, if it is one.
pub fn canonical_date(s: &str) -> Option<String> {
    // Cheap reject before trying the parsers.
    let bytes = s.as_bytes();
    if bytes.len() < 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let utc: DateTime<Utc> = if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        dt.with_timezone(&Utc)
    } else if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        naive.and_utc()
    } else if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        date.and_hms_opt(0, 0, 0)?.and_utc()
    } else {
        return None;
    };
    Some(utc.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Which dedupe check matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    InFlight,
    QuickRepeat,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::InFlight => "in_flight",
            Phase::QuickRepeat => "quick_repeat",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the ledger answers a new call.
pub enum Decision {
    /// Execute.
    Proceed,
    /// Reuse the pending result of the identical in-flight call.
    Share(PendingResult),
    /// Resolve with no result.
    Drop { phase: Phase },
    /// Reject.
    Block(Error),
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Proceed => "proceed",
            Decision::Share(_) => "share",
            Decision::Drop { .. } => "drop",
            Decision::Block(_) => "block",
        }
    }
}

impl std::fmt::Debug for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Proceed => f.write_str("Proceed"),
            Decision::Share(_) => f.write_str("Share(..)"),
            Decision::Drop { phase } => f.debug_struct("Drop").field("phase", phase).finish(),
            Decision::Block(err) => f.debug_tuple("Block").field(err).finish(),
        }
    }
}

/// Result of [`DedupeLedger::check`].
#[derive(Debug)]
pub struct Verdict {
    /// Phases that matched in `warn` mode on the way to `decision`.
    pub warned: Vec<Phase>,
    pub decision: Decision,
}

struct InFlight {
    owner: u64,
    /// Dispatched from inside a running call of the same namespace.
    reentrant: bool,
    handle: PendingResult,
}

/// Per-key in-flight handles and last completion times.
#[derive(Default)]
pub struct DedupeLedger {
    in_flight: HashMap<String, InFlight>,
    last_completion: HashMap<String, Instant>,
}

impl DedupeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run both phases for `key` at time `now`. Only `warn` lets phase 1
    /// fall through to phase 2.
    ///
    /// A `reentrant` call never shares a non-reentrant entry: that entry
    /// is either the lock holder or queued behind it, so waiting on it
    /// from inside the holder would never resolve. It is treated as
    /// `warn` instead.
    pub fn check(
        &self,
        action: &str,
        key: &str,
        modes: &DedupeConfig,
        now: Instant,
        reentrant: bool,
    ) -> Verdict {
        let mut warned = Vec::new();

        if let Some(entry) = self.in_flight.get(key) {
            let mode = match modes.in_flight_mode {
                DedupeMode::Share if reentrant && !entry.reentrant => DedupeMode::Warn,
                mode => mode,
            };
            let decision = match mode {
                DedupeMode::Share => Decision::Share(entry.handle.clone()),
                DedupeMode::Drop => Decision::Drop {
                    phase: Phase::InFlight,
                },
                DedupeMode::Block => Decision::Block(Error::BlockedInFlight {
                    action: action.to_string(),
                    dedupe_key: key.to_string(),
                }),
                DedupeMode::Warn => {
                    warned.push(Phase::InFlight);
                    Decision::Proceed
                }
            };
            if !matches!(decision, Decision::Proceed) {
                return Verdict { warned, decision };
            }
        }

        if let Some(last) = self.last_completion.get(key) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed <= modes.threshold() {
                let decision = match modes.quick_repeat_mode {
                    // Nothing pending to share once the original settled.
                    DedupeMode::Share | DedupeMode::Drop => Decision::Drop {
                        phase: Phase::QuickRepeat,
                    },
                    DedupeMode::Block => Decision::Block(Error::BlockedQuickRepeat {
                        action: action.to_string(),
                        dedupe_key: key.to_string(),
                        elapsed_ms: millis(elapsed),
                        threshold_ms: modes.threshold_millis,
                    }),
                    DedupeMode::Warn => {
                        warned.push(Phase::QuickRepeat);
                        Decision::Proceed
                    }
                };
                return Verdict { warned, decision };
            }
        }

        Verdict {
            warned,
            decision: Decision::Proceed,
        }
    }

    /// Make `handle` the in-flight result for `key`, owned by call `owner`.
    pub fn register(&mut self, key: &str, owner: u64, reentrant: bool, handle: PendingResult) {
        self.in_flight.insert(
            key.to_string(),
            InFlight {
                owner,
                reentrant,
                handle,
            },
        );
    }

    /// Remove the in-flight entry if `owner` still holds it.
    pub fn release(&mut self, key: &str, owner: u64) -> bool {
        match self.in_flight.get(key) {
            Some(entry) if entry.owner == owner => {
                self.in_flight.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn record_completion(&mut self, key: &str, at: Instant) {
        self.last_completion.insert(key.to_string(), at);
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn in_flight_owner(&self, key: &str) -> Option<u64> {
        self.in_flight.get(key).map(|e| e.owner)
    }

    pub fn last_completion(&self, key: &str) -> Option<Instant> {
        self.last_completion.get(key).copied()
    }

    pub fn in_flight_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.in_flight.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn completed_len(&self) -> usize {
        self.last_completion.len()
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

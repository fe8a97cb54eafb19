//! The gate engine: namespace locks, reentrancy tracking, dedupe ledger,
//! instrumentation, and the gate that ties them together.

pub mod dedupe;
pub mod gate;
pub mod instrument;
pub mod mutex;
pub mod reentrancy;

pub use dedupe::{Decision, DedupeLedger, Phase, Verdict, dedupe_key};
pub use gate::{DispatchGate, GateSnapshot};
pub use instrument::{HealthSnapshot, Instrumentation};
pub use mutex::{MutexHandle, MutexRegistry};
pub use reentrancy::{ReentrancyTracker, ScopeKey};

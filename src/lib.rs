//! # actgate
//!
//! Wraps a keyed action dispatcher so that actions in the same namespace
//! never run concurrently and structurally identical calls are shared,
//! dropped, logged, or rejected.
//!
//! Nested dispatches from inside a running action are detected and run
//! without re-taking the namespace lock. All state is in-process.

pub mod action;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod telemetry;

pub use action::{ActionId, ActionRef, DispatchCall, DispatchOptions};
pub use config::{DedupeMode, GateConfig};
pub use dispatch::{Dispatch, DispatchFuture, dispatch_fn};
pub use engine::{DispatchGate, GateSnapshot};
pub use error::{ActionError, Error, Result};
pub use matcher::Matcher;

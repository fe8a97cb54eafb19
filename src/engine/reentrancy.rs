//! Reentrancy tracking for nested dispatches.
//!
//! The logical call stack is a task-local [`ReentrancyTracker`]. The gate
//! snapshots the caller's tracker when a call is accepted and installs it,
//! with the call's namespace entered, around the action body. A dispatch
//! made from inside that body therefore sees the namespace as active and
//! bypasses the namespace lock its ancestor already holds.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use uuid::Uuid;

tokio::task_local! {
    static CALL_STACK: RefCell<ReentrancyTracker>;
}

/// A namespace as seen by one gate instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    pub gate: Uuid,
    pub namespace: String,
}

impl ScopeKey {
    pub fn new(gate: Uuid, namespace: impl Into<String>) -> Self {
        Self {
            gate,
            namespace: namespace.into(),
        }
    }
}

/// Per-namespace call depth of one logical call stack.
#[derive(Debug, Clone, Default)]
pub struct ReentrancyTracker {
    depths: HashMap<ScopeKey, usize>,
}

impl ReentrancyTracker {
    pub fn enter(&mut self, key: &ScopeKey) {
        *self.depths.entry(key.clone()).or_insert(0) += 1;
    }

    /// Leave one level; the entry disappears at depth zero.
    pub fn exit(&mut self, key: &ScopeKey) {
        if let Some(depth) = self.depths.get_mut(key) {
            *depth -= 1;
            if *depth == 0 {
                self.depths.remove(key);
            }
        }
    }

    pub fn is_active(&self, key: &ScopeKey) -> bool {
        self.depths.contains_key(key)
    }

    pub fn depth(&self, key: &ScopeKey) -> usize {
        self.depths.get(key).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }

    /// Copy of the tracker of the running task, or an empty one outside
    /// any gated call.
    pub fn current() -> Self {
        CALL_STACK
            .try_with(|stack| stack.borrow().clone())
            .unwrap_or_default()
    }

    /// Whether the running task is inside `key`.
    pub fn is_active_here(key: &ScopeKey) -> bool {
        CALL_STACK
            .try_with(|stack| stack.borrow().is_active(key))
            .unwrap_or(false)
    }

    /// Depth of `key` in the running task.
    pub fn depth_here(key: &ScopeKey) -> usize {
        CALL_STACK
            .try_with(|stack| stack.borrow().depth(key))
            .unwrap_or(0)
    }

    /// Run `fut` with this tracker as its call stack and `key` entered.
    /// The matching exit runs however `fut` ends, including on drop.
    pub async fn run_within<F>(self, key: ScopeKey, fut: F) -> F::Output
    where
        F: Future,
    {
        CALL_STACK
            .scope(RefCell::new(self), async move {
                let _guard = NamespaceGuard::enter(key);
                fut.await
            })
            .await
    }
}

/// Holds one level of a namespace on the task's call stack.
struct NamespaceGuard {
    key: ScopeKey,
}

impl NamespaceGuard {
    fn enter(key: ScopeKey) -> Self {
        let _ = CALL_STACK.try_with(|stack| stack.borrow_mut().enter(&key));
        Self { key }
    }
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        let _ = CALL_STACK.try_with(|stack| stack.borrow_mut().exit(&self.key));
    }
}

//! Per-namespace FIFO locks.
//!
//! A [`MutexHandle`] is a chain of turns: each submission takes the
//! previous tail and installs its own release signal as the new tail, so
//! the queue position is fixed at submission time rather than at first
//! poll. A turn is released when its task settles or is dropped; a turn
//! dropped before it started hands its release on only once the turn
//! ahead of it has been released.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

/// Exclusive-execution queue for one namespace.
#[derive(Clone)]
pub struct MutexHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    tail: Mutex<oneshot::Receiver<()>>,
    queued: AtomicUsize,
}

impl Default for MutexHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl MutexHandle {
    pub fn new() -> Self {
        let (release, turn) = oneshot::channel();
        drop(release);
        Self {
            inner: Arc::new(HandleInner {
                tail: Mutex::new(turn),
                queued: AtomicUsize::new(0),
            }),
        }
    }

    /// Queue `task` behind every task submitted before it.
    ///
    /// The position is taken when this method is called; the returned
    /// future waits for that turn, runs the task and releases the turn.
    pub fn run_exclusive<F, T>(&self, task: F) -> impl Future<Output = T> + Send + 'static
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (release, tail) = oneshot::channel::<()>();
        let previous = std::mem::replace(&mut *self.inner.tail.lock(), tail);
        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        let mut turn = Turn {
            previous: Some(previous),
            release: Some(release),
            _slot: QueueSlot {
                inner: Arc::clone(&self.inner),
            },
        };

        async move {
            if let Some(previous) = turn.previous.as_mut() {
                // Err means the previous holder dropped its sender: the turn is ours.
                let _ = previous.await;
            }
            turn.previous = None;
            let out = task.await;
            drop(turn);
            out
        }
    }

    /// Tasks waiting for or holding this lock.
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.queued() == 0
    }

    pub fn same_handle(&self, other: &MutexHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

struct QueueSlot {
    inner: Arc<HandleInner>,
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.inner.queued.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One position in the chain. Dropping it releases the next position,
/// but a position that never started first waits for its predecessor.
struct Turn {
    /// `Some` until the predecessor has released.
    previous: Option<oneshot::Receiver<()>>,
    release: Option<oneshot::Sender<()>>,
    _slot: QueueSlot,
}

impl Drop for Turn {
    fn drop(&mut self) {
        let (Some(previous), Some(release)) = (self.previous.take(), self.release.take()) else {
            return;
        };
        // Without a runtime nothing can be waiting on the chain anyway.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = previous.await;
                drop(release);
            });
        }
    }
}

/// Namespace → lock, created lazily and never removed.
#[derive(Default)]
pub struct MutexRegistry {
    handles: Mutex<HashMap<String, MutexHandle>>,
}

impl MutexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `namespace`, created on first reference.
    pub fn acquire(&self, namespace: &str) -> MutexHandle {
        self.handles
            .lock()
            .entry(namespace.to_string())
            .or_default()
            .clone()
    }

    /// Number of namespaces seen so far.
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}

//! The dispatch boundary shared by host dispatchers and the gate.

use crate::action::DispatchCall;
use crate::engine::DispatchGate;
use crate::error::{ActionError, Error, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Future returned by every dispatch. `Ok(None)` means "no result", which
/// only the gate produces (for dropped duplicates).
pub type DispatchFuture = BoxFuture<'static, Result<Option<Value>>>;

/// Something that runs actions by key.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, call: DispatchCall) -> DispatchFuture;

    /// The gate behind this dispatcher, if it is one.
    fn as_gate(&self) -> Option<&DispatchGate> {
        None
    }
}

/// Adapter turning an async closure into a [`Dispatch`].
pub struct DispatchFn<F> {
    f: F,
}

impl<F, Fut> Dispatch for DispatchFn<F>
where
    F: Fn(DispatchCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, ActionError>> + Send + 'static,
{
    fn dispatch(&self, call: DispatchCall) -> DispatchFuture {
        (self.f)(call)
            .map(|res| res.map(Some).map_err(Error::Action))
            .boxed()
    }
}

/// Wrap a host closure as a shareable dispatcher.
pub fn dispatch_fn<F, Fut>(f: F) -> Arc<dyn Dispatch>
where
    F: Fn(DispatchCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, ActionError>> + Send + 'static,
{
    Arc::new(DispatchFn { f })
}

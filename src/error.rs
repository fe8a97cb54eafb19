//! Error types for actgate.

use std::sync::Arc;
use thiserror::Error;

/// An error raised by a host action body.
///
/// Cheap to clone so that every caller sharing an in-flight result
/// receives the same error value.
#[derive(Debug, Clone)]
pub struct ActionError(Arc<anyhow::Error>);

impl ActionError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    /// Build an error from a plain message.
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    /// Access the underlying error, e.g. for `downcast_ref`.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// True when both values are the same shared error instance.
    pub fn ptr_eq(&self, other: &ActionError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("blocked duplicate of in-flight action {action} (key {dedupe_key})")]
    BlockedInFlight { action: String, dedupe_key: String },

    #[error(
        "blocked quick repeat of {action}: {elapsed_ms}ms since last completion, threshold {threshold_ms}ms"
    )]
    BlockedQuickRepeat {
        action: String,
        dedupe_key: String,
        elapsed_ms: u64,
        threshold_ms: u64,
    },

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("action task aborted: {0}")]
    Aborted(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the errors the gate synthesizes to reject a duplicate call.
    pub fn is_blocked_duplicate(&self) -> bool {
        matches!(
            self,
            Error::BlockedInFlight { .. } | Error::BlockedQuickRepeat { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

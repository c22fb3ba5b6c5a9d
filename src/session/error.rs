//! Session error types

use thiserror::Error;

use crate::engine::{EngineError, Status};

/// Errors surfaced by a [`Session`](super::Session).
///
/// Most operations report engine failures as a negative [`Status`] instead;
/// only lookups and construction use this type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The engine returned a null address for the requested name
    #[error("symbol error")]
    SymbolNotFound {
        /// Name that failed to resolve
        name: String,
    },

    /// The engine could not be created
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A configuration step was rejected by the engine
    #[error("configuration step '{step}' failed with status {status}")]
    Configure { step: String, status: Status },
}

/// Dispatch-layer failure of an asynchronous compile.
///
/// Delivered through the completion, never returned at submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Async compilation was requested on an inspect-only session
    #[error("async compilation requires an execute-mode session")]
    InspectOnly,

    /// The worker pool could not be built
    #[error("compile worker pool unavailable: {0}")]
    PoolUnavailable(String),

    /// The engine panicked while the work unit was running
    #[error("compile worker panicked")]
    WorkerPanicked,

    /// The completion was dropped before it could be delivered
    #[error("compile completion was abandoned")]
    Abandoned,
}

/// Session result
pub type SessionResult<T> = Result<T, SessionError>;

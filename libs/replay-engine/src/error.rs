use replay_api::{CodecError, UnixNanos};

use crate::dispatch::{Hook, LoopState};

/// Errors returned to the orchestrator. Raised at configuration/startup time or
/// when the dispatch loop is driven out of order.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("source '{0}' is already registered")]
    DuplicateSource(String),

    #[error("subscriber '{0}' is already registered")]
    DuplicateSubscriber(String),

    #[error("unknown subscriber {0}")]
    UnknownSubscriber(String),

    #[error("dispatch loop is {actual}, expected {expected}")]
    InvalidState { expected: LoopState, actual: LoopState },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Codec` variant, context is added to the inner `CodecError`.
    /// For message variants, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Codec(e) => EngineError::Codec(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            EngineError::Io(e) => EngineError::Io(std::io::Error::new(e.kind(), format!("{ctx}: {e}"))),
            other => other,
        }
    }
}

/// Failure reported by an event source while producing its next record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SourceError {
    pub message: String,
}

impl SourceError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { message: msg.into() }
    }
}

impl From<CodecError> for SourceError {
    fn from(e: CodecError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Runtime fault observed while the loop runs.
///
/// Faults are isolated to one source or one subscriber: they are logged and
/// collected in the dispatch report, and the loop keeps going.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchFault {
    /// A source produced an `event_time` below one it already emitted.
    /// The source is excluded from further merging.
    #[error("source '{source_name}' is not monotonic: {got} after {previous}")]
    NonMonotonicSource {
        source_name: String,
        previous: UnixNanos,
        got: UnixNanos,
    },

    /// A source failed to produce its next record. The source is excluded.
    #[error("source '{source_name}' failed: {message}")]
    SourceFailure { source_name: String, message: String },

    /// A subscriber hook returned an error.
    #[error("subscriber '{subscriber}' failed in {hook}: {message}")]
    SubscriberHookFailure {
        subscriber: String,
        hook: Hook,
        message: String,
    },
}

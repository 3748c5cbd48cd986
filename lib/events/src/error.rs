//! Error types for the events crate.
//!
//! - `HandlerError`: what a single middleware handler reports
//! - `RegistryError`: middleware registration failures
//! - `EventError`: what callers of the event engine see

use parley_core::Direction;
use std::fmt;

/// Failure reported by one middleware handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler ran and failed.
    Failed { reason: String },
    /// The handler did not finish within its time limit.
    TimedOut { after_ms: u64 },
}

impl HandlerError {
    /// Convenience constructor for [`HandlerError::Failed`].
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "handler failed: {reason}"),
            Self::TimedOut { after_ms } => write!(f, "handler timed out after {after_ms}ms"),
        }
    }
}

impl std::error::Error for HandlerError {}

/// Errors from middleware registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A middleware with the same name is already registered for the direction.
    DuplicateMiddleware { name: String, direction: Direction },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateMiddleware { name, direction } => {
                write!(f, "{direction} middleware '{name}' is already registered")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors surfaced by the event engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The event is malformed or not attributable to the calling bot.
    Validation { reason: String },
    /// A critical middleware failed and aborted the chain.
    Middleware {
        name: String,
        direction: Direction,
        source: HandlerError,
    },
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { reason } => write!(f, "invalid event: {reason}"),
            Self::Middleware {
                name,
                direction,
                source,
            } => write!(f, "{direction} middleware '{name}' aborted the chain: {source}"),
        }
    }
}

impl std::error::Error for EventError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Middleware { source, .. } => Some(source),
            Self::Validation { .. } => None,
        }
    }
}

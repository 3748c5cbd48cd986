//! Error types for the sdk crate.
//!
//! Assembly reports `Report<AssemblyError>` so hosts can attach their own
//! context on top; collaborator failures use [`ExternalError`].

use std::fmt;

/// Errors from building a runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    /// The settings are inconsistent.
    InvalidSettings { reason: String },
    /// A built-in middleware could not be registered.
    Registration { reason: String },
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSettings { reason } => write!(f, "invalid settings: {reason}"),
            Self::Registration { reason } => {
                write!(f, "failed to register built-in middleware: {reason}")
            }
        }
    }
}

impl std::error::Error for AssemblyError {}

/// Failure of an external collaborator (realtime emitter, short links).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalError {
    /// Which collaborator failed.
    pub collaborator: &'static str,
    pub reason: String,
}

impl fmt::Display for ExternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.collaborator, self.reason)
    }
}

impl std::error::Error for ExternalError {}

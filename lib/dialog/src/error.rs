//! Error types for the dialog crate.

use crate::session::SessionKey;
use parley_core::SessionId;
use std::fmt;

/// Errors raised while building or loading a flow.
///
/// These are load-time errors: a [`crate::Flow`] that exists has passed
/// every check below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowValidationError {
    /// The flow has no name.
    EmptyName,
    /// The declared start node is not among the flow's nodes.
    MissingStartNode { flow: String, node: String },
    /// Two nodes share a name.
    DuplicateNode { flow: String, node: String },
    /// A transition targets a node that is not declared.
    DanglingTransition {
        flow: String,
        from: String,
        target: String,
    },
    /// The fallback node is not declared.
    DanglingFallback { flow: String, node: String },
    /// An end node declares outgoing transitions.
    TransitionFromEnd { flow: String, node: String },
    /// A text pattern does not compile.
    InvalidPattern { pattern: String, reason: String },
    /// The flow document could not be parsed.
    Malformed { reason: String },
}

impl fmt::Display for FlowValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "flow name is empty"),
            Self::MissingStartNode { flow, node } => {
                write!(f, "flow '{flow}': start node '{node}' is not declared")
            }
            Self::DuplicateNode { flow, node } => {
                write!(f, "flow '{flow}': node '{node}' is declared twice")
            }
            Self::DanglingTransition { flow, from, target } => write!(
                f,
                "flow '{flow}': node '{from}' transitions to undeclared node '{target}'"
            ),
            Self::DanglingFallback { flow, node } => {
                write!(f, "flow '{flow}': fallback node '{node}' is not declared")
            }
            Self::TransitionFromEnd { flow, node } => {
                write!(f, "flow '{flow}': end node '{node}' declares transitions")
            }
            Self::InvalidPattern { pattern, reason } => {
                write!(f, "invalid text pattern '{pattern}': {reason}")
            }
            Self::Malformed { reason } => write!(f, "malformed flow document: {reason}"),
        }
    }
}

impl std::error::Error for FlowValidationError {}

/// Errors from a flow provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowProviderError {
    /// The backing storage could not be reached.
    Unavailable { reason: String },
    /// A stored flow failed validation.
    Invalid(FlowValidationError),
}

impl fmt::Display for FlowProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "flow provider unavailable: {reason}"),
            Self::Invalid(e) => write!(f, "stored flow is invalid: {e}"),
        }
    }
}

impl std::error::Error for FlowProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Invalid(e) => Some(e),
            Self::Unavailable { .. } => None,
        }
    }
}

impl From<FlowValidationError> for FlowProviderError {
    fn from(e: FlowValidationError) -> Self {
        Self::Invalid(e)
    }
}

/// Errors from action execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// No action with this name is registered.
    UnknownAction { name: String },
    /// The action's arguments have the wrong shape.
    InvalidArgs { action: String, reason: String },
    /// The action ran and failed.
    Failed { action: String, reason: String },
    /// The action did not finish within the action timeout.
    TimedOut { action: String, after_ms: u64 },
}

impl ActionError {
    /// Convenience constructor for [`ActionError::Failed`].
    #[must_use]
    pub fn failed(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAction { name } => write!(f, "unknown action '{name}'"),
            Self::InvalidArgs { action, reason } => {
                write!(f, "invalid arguments for action '{action}': {reason}")
            }
            Self::Failed { action, reason } => write!(f, "action '{action}' failed: {reason}"),
            Self::TimedOut { action, after_ms } => {
                write!(f, "action '{action}' timed out after {after_ms}ms")
            }
        }
    }
}

impl std::error::Error for ActionError {}

/// Errors from a session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session lease was not acquired within the wait.
    Busy { key: SessionKey, waited_ms: u64 },
    /// `create` found an existing record.
    AlreadyExists { key: SessionKey },
    /// `save` was given a stale version.
    Conflict {
        key: SessionKey,
        expected: u64,
        found: u64,
    },
    /// `save` found no record to replace.
    NotFound { key: SessionKey },
    /// The backing storage failed.
    Unavailable { reason: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy { key, waited_ms } => {
                write!(f, "session {key} still leased after {waited_ms}ms")
            }
            Self::AlreadyExists { key } => write!(f, "session {key} already exists"),
            Self::Conflict {
                key,
                expected,
                found,
            } => write!(
                f,
                "session {key} was modified concurrently (writer had version {expected}, store has {found})"
            ),
            Self::NotFound { key } => write!(f, "session {key} not found"),
            Self::Unavailable { reason } => write!(f, "session store unavailable: {reason}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Errors surfaced by the dialog engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogError {
    /// The session's flow or node does not resolve and no fallback applies.
    FlowNotFound { flow: String, node: Option<String> },
    /// An entry action failed or timed out.
    ActionExecution { node: String, source: ActionError },
    /// Another call held the session for longer than the lock wait.
    SessionBusy {
        session_id: SessionId,
        waited_ms: u64,
    },
    /// The event cannot be processed by this bot handle.
    Validation { reason: String },
    /// The flow provider failed.
    FlowLookup { source: FlowProviderError },
    /// The session store failed.
    Storage { source: SessionError },
}

impl DialogError {
    /// Whether the caller was answered with an "unable to process" event.
    #[must_use]
    pub fn is_reported_to_user(&self) -> bool {
        !matches!(self, Self::Validation { .. })
    }
}

impl fmt::Display for DialogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FlowNotFound {
                flow,
                node: Some(node),
            } => write!(f, "node '{node}' of flow '{flow}' not found"),
            Self::FlowNotFound { flow, node: None } => write!(f, "flow '{flow}' not found"),
            Self::ActionExecution { node, source } => {
                write!(f, "entry action of node '{node}' failed: {source}")
            }
            Self::SessionBusy {
                session_id,
                waited_ms,
            } => write!(f, "session '{session_id}' busy for {waited_ms}ms"),
            Self::Validation { reason } => write!(f, "invalid event: {reason}"),
            Self::FlowLookup { source } => write!(f, "flow lookup failed: {source}"),
            Self::Storage { source } => write!(f, "session storage failed: {source}"),
        }
    }
}

impl std::error::Error for DialogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ActionExecution { source, .. } => Some(source),
            Self::FlowLookup { source } => Some(source),
            Self::Storage { source } => Some(source),
            Self::FlowNotFound { .. } | Self::SessionBusy { .. } | Self::Validation { .. } => None,
        }
    }
}

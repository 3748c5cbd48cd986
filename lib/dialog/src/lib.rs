//! Flow-driven dialogs for parley.
//!
//! This crate provides:
//! - [`Flow`]: validated flow graphs with typed transition [`Condition`]s
//! - [`FlowProvider`]: where flows come from
//! - [`ActionExecutor`]: how node entry actions run
//! - [`SessionStore`]: leased, compare-and-swap session persistence
//! - [`DialogEngine`]: advances sessions through flows, one event at a time

pub mod action;
pub mod condition;
pub mod engine;
pub mod error;
pub mod flow;
pub mod provider;
pub mod session;

pub use action::{
    Action, ActionContext, ActionExecutor, ActionOutcome, ActionRef, ActionRegistry, SAY_ACTION,
    SET_CONTEXT_ACTION,
};
pub use condition::{Condition, Pattern};
pub use engine::{
    BotDialog, BotSettings, DEFAULT_ACTION_TIMEOUT, DEFAULT_FLOW, DEFAULT_LOCK_WAIT,
    DEFAULT_UNABLE_TO_PROCESS_TEXT, DialogEngine, DialogSettings, NodeRef,
};
pub use error::{
    ActionError, DialogError, FlowProviderError, FlowValidationError, SessionError,
};
pub use flow::{Flow, FlowDefinition, Node, NodeKind, Transition};
pub use provider::{FlowProvider, InMemoryFlowProvider};
pub use session::{
    InMemorySessionStore, Session, SessionContext, SessionKey, SessionLease, SessionStore,
};

//! Node entry actions.
//!
//! Nodes reference actions by name through an [`ActionRef`]; an
//! [`ActionExecutor`] resolves and runs them. Actions are not transactional:
//! a side effect performed by an action stays performed even if a later
//! action of the same node fails.

use crate::error::ActionError;
use crate::session::SessionContext;
use async_trait::async_trait;
use parley_core::{BotId, Event, SessionId};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// A reference to an action from a node definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRef {
    /// Registered action name.
    pub name: String,
    /// Arguments handed to the action, uninterpreted by the engine.
    #[serde(default)]
    pub args: JsonValue,
}

impl ActionRef {
    /// References an action without arguments.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: JsonValue::Null,
        }
    }

    /// Sets the arguments.
    #[must_use]
    pub fn with_args(mut self, args: JsonValue) -> Self {
        self.args = args;
        self
    }

    /// Shorthand for the built-in `say` action.
    #[must_use]
    pub fn say(payload: impl Into<JsonValue>) -> Self {
        Self::new(SAY_ACTION).with_args(payload.into())
    }

    /// Shorthand for the built-in `set_context` action.
    #[must_use]
    pub fn set_context(values: JsonValue) -> Self {
        Self::new(SET_CONTEXT_ACTION).with_args(values)
    }
}

/// What an action sees while it runs.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub session_id: &'a SessionId,
    /// The event being processed.
    pub event: &'a Event,
    /// Session context as updated by earlier actions of the same node.
    pub variables: &'a SessionContext,
}

/// The result of one action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutcome {
    /// Merged into the session context, overwriting existing keys.
    pub context_updates: SessionContext,
    /// Payloads emitted as outgoing events, in order.
    pub replies: Vec<JsonValue>,
}

impl ActionOutcome {
    /// An outcome with no updates and no replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply payload.
    #[must_use]
    pub fn reply(mut self, payload: JsonValue) -> Self {
        self.replies.push(payload);
        self
    }

    /// Sets a context variable.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }
}

/// Resolves and runs actions referenced by nodes.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Runs one action on behalf of a bot.
    async fn execute(
        &self,
        bot_id: &BotId,
        action: &ActionRef,
        context: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError>;
}

/// A single named action implementation.
#[async_trait]
pub trait Action: Send + Sync {
    async fn run(
        &self,
        bot_id: &BotId,
        args: &JsonValue,
        context: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError>;
}

/// Built-in action that queues its `args` as a reply.
pub const SAY_ACTION: &str = "say";
/// Built-in action that merges its `args` object into the context.
pub const SET_CONTEXT_ACTION: &str = "set_context";

/// A name → [`Action`] table.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in `say` and `set_context`.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new()
            .with(SAY_ACTION, Arc::new(Say))
            .with(SET_CONTEXT_ACTION, Arc::new(SetContext))
    }

    /// Registers an action, replacing any action of the same name.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, action: Arc<dyn Action>) -> Self {
        self.register(name, action);
        self
    }

    /// Registers an action, returning the one it replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        action: Arc<dyn Action>,
    ) -> Option<Arc<dyn Action>> {
        self.actions.insert(name.into(), action)
    }

    /// Whether an action is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.actions.keys().collect();
        names.sort();
        f.debug_struct("ActionRegistry")
            .field("actions", &names)
            .finish()
    }
}

#[async_trait]
impl ActionExecutor for ActionRegistry {
    async fn execute(
        &self,
        bot_id: &BotId,
        action: &ActionRef,
        context: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let Some(implementation) = self.actions.get(&action.name) else {
            return Err(ActionError::UnknownAction {
                name: action.name.clone(),
            });
        };
        debug!(action = %action.name, bot = %bot_id, "executing action");
        implementation.run(bot_id, &action.args, context).await
    }
}

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("placeholder pattern compiles")
});

/// Renders `{{variable}}` placeholders from the session context.
///
/// Unknown variables render as the empty string; non-string values render
/// as their JSON text.
fn render(template: &str, variables: &SessionContext) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            match variables.get(&caps[1]) {
                Some(JsonValue::String(s)) => s.clone(),
                Some(JsonValue::Null) | None => String::new(),
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}

/// Built-in: queues its arguments as a reply.
///
/// A string argument becomes a text message; an object is sent as-is with
/// its `"text"` field rendered.
struct Say;

#[async_trait]
impl Action for Say {
    async fn run(
        &self,
        _bot_id: &BotId,
        args: &JsonValue,
        context: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let payload = match args {
            JsonValue::String(text) => json!({"type": "text", "text": render(text, context.variables)}),
            JsonValue::Object(map) => {
                let mut map = map.clone();
                if let Some(JsonValue::String(text)) = map.get("text") {
                    let rendered = render(text, context.variables);
                    map.insert("text".to_string(), JsonValue::String(rendered));
                }
                JsonValue::Object(map)
            }
            other => {
                return Err(ActionError::InvalidArgs {
                    action: SAY_ACTION.to_string(),
                    reason: format!("expected a string or an object, got {other}"),
                });
            }
        };
        Ok(ActionOutcome::new().reply(payload))
    }
}

/// Built-in: merges its object argument into the session context.
struct SetContext;

#[async_trait]
impl Action for SetContext {
    async fn run(
        &self,
        _bot_id: &BotId,
        args: &JsonValue,
        _context: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        match args {
            JsonValue::Object(map) => Ok(ActionOutcome {
                context_updates: map.clone(),
                replies: Vec::new(),
            }),
            other => Err(ActionError::InvalidArgs {
                action: SET_CONTEXT_ACTION.to_string(),
                reason: format!("expected an object, got {other}"),
            }),
        }
    }
}

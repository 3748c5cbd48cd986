//! The dialog engine.
//!
//! Advances a session through its flow in response to one incoming event:
//!
//! 1. Lease the session (bounded wait, [`DialogError::SessionBusy`] on timeout)
//! 2. Load the session, or create it at the default flow's start node
//! 3. Resolve its flow and node, moving to a fallback node if they are gone
//! 4. Run the node's entry actions, each bounded by the action timeout
//! 5. Take the first transition whose condition holds, or stay
//! 6. Persist with one compare-and-swap write
//! 7. Emit the queued replies through the outgoing chain
//! 8. Release the lease
//!
//! A failure in steps 1-6 leaves the stored session as it was. Replies
//! queued before an action failed are still emitted, followed by an
//! "unable to process" event.

use crate::action::{ActionContext, ActionExecutor};
use crate::error::{ActionError, DialogError, SessionError};
use crate::flow::{Flow, Node};
use crate::provider::FlowProvider;
use crate::session::{Session, SessionKey, SessionLease, SessionStore};
use chrono::Utc;
use parley_core::{BotId, Direction, Event, SessionId};
use parley_events::EventEngine;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Default wait for a busy session.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(2);
/// Default time limit for one entry action.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(10);
/// Flow new sessions start in unless configured otherwise.
pub const DEFAULT_FLOW: &str = "main";
/// Reply sent when an event cannot be processed.
pub const DEFAULT_UNABLE_TO_PROCESS_TEXT: &str = "Sorry, I was unable to process your message.";

/// A `(flow, node)` position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub flow: String,
    pub node: String,
}

impl NodeRef {
    /// Points at `node` of `flow`.
    #[must_use]
    pub fn new(flow: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            flow: flow.into(),
            node: node.into(),
        }
    }
}

/// Per-bot overrides of [`DialogSettings`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotSettings {
    /// Replaces [`DialogSettings::default_flow`].
    pub default_flow: Option<String>,
    /// Replaces [`DialogSettings::fallback`].
    pub fallback: Option<NodeRef>,
}

/// Dialog engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogSettings {
    /// How long to wait for a busy session.
    pub lock_wait: Duration,
    /// Time limit for one entry action.
    pub action_timeout: Duration,
    /// Flow new sessions start in.
    pub default_flow: String,
    /// Text of the "unable to process" event.
    pub unable_to_process_text: String,
    /// Where sessions go when their flow or node no longer resolves.
    pub fallback: Option<NodeRef>,
    /// Per-bot overrides.
    pub bots: HashMap<BotId, BotSettings>,
}

impl Default for DialogSettings {
    fn default() -> Self {
        Self {
            lock_wait: DEFAULT_LOCK_WAIT,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            default_flow: DEFAULT_FLOW.to_string(),
            unable_to_process_text: DEFAULT_UNABLE_TO_PROCESS_TEXT.to_string(),
            fallback: None,
            bots: HashMap::new(),
        }
    }
}

impl DialogSettings {
    /// Adds per-bot overrides.
    #[must_use]
    pub fn with_bot(mut self, bot_id: BotId, settings: BotSettings) -> Self {
        self.bots.insert(bot_id, settings);
        self
    }

    /// The flow new sessions of `bot_id` start in.
    #[must_use]
    pub fn default_flow_for(&self, bot_id: &BotId) -> &str {
        self.bots
            .get(bot_id)
            .and_then(|bot| bot.default_flow.as_deref())
            .unwrap_or(&self.default_flow)
    }

    /// The fallback position for `bot_id`, if any.
    #[must_use]
    pub fn fallback_for(&self, bot_id: &BotId) -> Option<&NodeRef> {
        self.bots
            .get(bot_id)
            .and_then(|bot| bot.fallback.as_ref())
            .or(self.fallback.as_ref())
    }
}

/// Runs dialogs for every bot.
pub struct DialogEngine {
    sessions: Arc<dyn SessionStore>,
    flows: Arc<dyn FlowProvider>,
    actions: Arc<dyn ActionExecutor>,
    events: Arc<EventEngine>,
    settings: DialogSettings,
}

impl DialogEngine {
    /// Creates an engine over its collaborators.
    ///
    /// Replies and error events are sent through `events`.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        flows: Arc<dyn FlowProvider>,
        actions: Arc<dyn ActionExecutor>,
        events: Arc<EventEngine>,
        settings: DialogSettings,
    ) -> Self {
        Self {
            sessions,
            flows,
            actions,
            events,
            settings,
        }
    }

    /// Returns a handle scoped to one bot.
    ///
    /// Every session and flow accessed through the handle belongs to
    /// `bot_id`.
    #[must_use]
    pub fn for_bot(&self, bot_id: BotId) -> BotDialog<'_> {
        BotDialog {
            engine: self,
            bot_id,
        }
    }

    /// The engine's settings.
    #[must_use]
    pub fn settings(&self) -> &DialogSettings {
        &self.settings
    }

    /// The session store.
    #[must_use]
    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }
}

impl fmt::Debug for DialogEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialogEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// How a session's position resolved.
enum Resolution {
    Found(Arc<Flow>, String),
    MissingNode(Arc<Flow>),
    MissingFlow,
}

/// Where a session will process the current event.
struct Position {
    session: Session,
    flow: Arc<Flow>,
    /// Whether the session was moved to a fallback node.
    fell_back: bool,
}

/// A bot-scoped dialog handle.
#[derive(Debug)]
pub struct BotDialog<'a> {
    engine: &'a DialogEngine,
    bot_id: BotId,
}

impl BotDialog<'_> {
    /// The bot this handle is scoped to.
    #[must_use]
    pub fn bot_id(&self) -> &BotId {
        &self.bot_id
    }

    /// Processes one incoming event for a session.
    ///
    /// # Errors
    ///
    /// - [`DialogError::Validation`] if the event is not an incoming event of
    ///   this bot and session
    /// - [`DialogError::SessionBusy`] if the session stayed leased for the
    ///   whole lock wait
    /// - [`DialogError::FlowNotFound`] if the session's position does not
    ///   resolve and no fallback applies
    /// - [`DialogError::ActionExecution`] if an entry action fails or times out
    /// - [`DialogError::FlowLookup`] / [`DialogError::Storage`] on collaborator
    ///   failures
    ///
    /// Every error but `Validation` is also answered with an
    /// "unable to process" event.
    #[instrument(skip(self, event), fields(bot = %self.bot_id, session = %session_id, event = %event.id()))]
    pub async fn process_message(
        &self,
        session_id: &SessionId,
        event: Event,
    ) -> Result<Session, DialogError> {
        self.validate(session_id, &event)?;

        let result = self.run(session_id, &event).await;
        match &result {
            Ok(session) => debug!(
                flow = %session.current_flow,
                node = %session.current_node,
                version = session.version,
                "event processed"
            ),
            Err(e) => {
                error!(error = %e, "unable to process event");
                self.emit_unable_to_process(&event).await;
            }
        }
        result
    }

    /// Moves a session to a node, creating the session if needed.
    ///
    /// No entry actions run; they run when the next event arrives. `node`
    /// defaults to the flow's start node.
    ///
    /// # Errors
    ///
    /// Returns [`DialogError::FlowNotFound`] if the target does not resolve,
    /// or the lease and storage errors of [`Self::process_message`].
    #[instrument(skip(self), fields(bot = %self.bot_id))]
    pub async fn jump_to(
        &self,
        session_id: &SessionId,
        flow: &str,
        node: Option<&str>,
    ) -> Result<Session, DialogError> {
        let key = self.key(session_id);
        let _lease = self.lease(&key).await?;

        let Resolution::Found(target, node_name) = self.resolve(flow, node).await? else {
            return Err(DialogError::FlowNotFound {
                flow: flow.to_string(),
                node: node.map(str::to_string),
            });
        };

        let stored = self.engine.sessions.get(&key).await.map_err(storage)?;
        let result = match stored {
            Some(mut session) => {
                session.move_to(target.name(), node_name);
                session.last_active_at = Utc::now();
                self.engine.sessions.save(session).await
            }
            None => {
                let session = Session::new(key, target.name(), node_name);
                self.engine.sessions.create(session).await
            }
        };
        let session = result.map_err(storage)?;
        debug!(flow = %session.current_flow, node = %session.current_node, "session moved");
        Ok(session)
    }

    /// Returns a session's stored state.
    ///
    /// # Errors
    ///
    /// Returns [`DialogError::Storage`] if the store fails.
    pub async fn session(&self, session_id: &SessionId) -> Result<Option<Session>, DialogError> {
        self.engine
            .sessions
            .get(&self.key(session_id))
            .await
            .map_err(storage)
    }

    /// Deletes a session once no event is being processed for it.
    ///
    /// Returns whether a session was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`DialogError::SessionBusy`] if the lease stays held for the
    /// whole lock wait.
    pub async fn reset(&self, session_id: &SessionId) -> Result<bool, DialogError> {
        self.engine
            .sessions
            .delete(&self.key(session_id), self.engine.settings.lock_wait)
            .await
            .map_err(|e| busy_or_storage(session_id, e))
    }

    fn key(&self, session_id: &SessionId) -> SessionKey {
        SessionKey::new(self.bot_id.clone(), session_id.clone())
    }

    fn validate(&self, session_id: &SessionId, event: &Event) -> Result<(), DialogError> {
        if event.direction() != Direction::Incoming {
            return Err(DialogError::Validation {
                reason: format!("{} events are not processed by dialogs", event.direction()),
            });
        }
        match event.bot_id() {
            Some(owner) if owner == &self.bot_id => {}
            Some(owner) => {
                return Err(DialogError::Validation {
                    reason: format!("event belongs to bot '{owner}', not '{}'", self.bot_id),
                });
            }
            None => {
                return Err(DialogError::Validation {
                    reason: "event is not attributed to a bot".to_string(),
                });
            }
        }
        if event.session_id() != session_id {
            return Err(DialogError::Validation {
                reason: format!(
                    "event belongs to session '{}', not '{session_id}'",
                    event.session_id()
                ),
            });
        }
        Ok(())
    }

    async fn lease(&self, key: &SessionKey) -> Result<SessionLease, DialogError> {
        self.engine
            .sessions
            .lease(key, self.engine.settings.lock_wait)
            .await
            .map_err(|e| busy_or_storage(&key.session_id, e))
    }

    /// Runs steps 1-8 under the session lease.
    async fn run(&self, session_id: &SessionId, event: &Event) -> Result<Session, DialogError> {
        let key = self.key(session_id);
        let _lease = self.lease(&key).await?;

        let mut outbox = Vec::new();
        let result = self.advance(key, event, &mut outbox).await;
        self.emit(event, outbox).await;
        result
    }

    async fn advance(
        &self,
        key: SessionKey,
        event: &Event,
        outbox: &mut Vec<JsonValue>,
    ) -> Result<Session, DialogError> {
        let stored = self.engine.sessions.get(&key).await.map_err(storage)?;
        let existed = stored.is_some();

        let Position {
            mut session,
            flow,
            fell_back,
        } = self.position(key, stored).await?;

        let Some(node) = flow.node(&session.current_node) else {
            return Err(DialogError::FlowNotFound {
                flow: session.current_flow.clone(),
                node: Some(session.current_node.clone()),
            });
        };

        self.run_entry_actions(node, event, &mut session, outbox)
            .await?;

        if !fell_back {
            match node.first_match(event, &session.context) {
                Some(transition) => {
                    debug!(from = %node.name, to = %transition.target, "transition taken");
                    session.current_node.clone_from(&transition.target);
                }
                None => debug!(node = %node.name, "no transition matched, staying"),
            }
        }

        session.last_active_at = Utc::now();
        let persisted = if existed {
            self.engine.sessions.save(session).await
        } else {
            self.engine.sessions.create(session).await
        };
        persisted.map_err(storage)
    }

    /// Loads or creates the working copy and resolves where it stands.
    async fn position(
        &self,
        key: SessionKey,
        stored: Option<Session>,
    ) -> Result<Position, DialogError> {
        let (flow_name, node_name) = match &stored {
            Some(session) => (
                session.current_flow.clone(),
                Some(session.current_node.clone()),
            ),
            None => (
                self.engine
                    .settings
                    .default_flow_for(&self.bot_id)
                    .to_string(),
                None,
            ),
        };

        let missing_flow = match self.resolve(&flow_name, node_name.as_deref()).await? {
            Resolution::Found(flow, node) => {
                let session = stored.unwrap_or_else(|| Session::new(key, flow.name(), node));
                return Ok(Position {
                    session,
                    flow,
                    fell_back: false,
                });
            }
            Resolution::MissingNode(flow) => match flow.fallback_node() {
                Some(fallback) => {
                    let target = NodeRef::new(flow.name(), fallback);
                    return Ok(self.fall_back(key, stored, flow, target));
                }
                None => false,
            },
            Resolution::MissingFlow => true,
        };

        let not_found = DialogError::FlowNotFound {
            flow: flow_name,
            node: if missing_flow { None } else { node_name },
        };

        let Some(target) = self.engine.settings.fallback_for(&self.bot_id) else {
            return Err(not_found);
        };
        match self.resolve(&target.flow, Some(&target.node)).await? {
            Resolution::Found(flow, _) => Ok(self.fall_back(key, stored, flow, target.clone())),
            Resolution::MissingNode(_) | Resolution::MissingFlow => {
                warn!(
                    flow = %target.flow,
                    node = %target.node,
                    "configured fallback does not resolve"
                );
                Err(not_found)
            }
        }
    }

    fn fall_back(
        &self,
        key: SessionKey,
        stored: Option<Session>,
        flow: Arc<Flow>,
        target: NodeRef,
    ) -> Position {
        warn!(flow = %target.flow, node = %target.node, "moving session to fallback node");
        let mut session =
            stored.unwrap_or_else(|| Session::new(key, target.flow.clone(), target.node.clone()));
        session.move_to(target.flow, target.node);
        Position {
            session,
            flow,
            fell_back: true,
        }
    }

    async fn resolve(&self, flow_name: &str, node: Option<&str>) -> Result<Resolution, DialogError> {
        let Some(flow) = self
            .engine
            .flows
            .get_flow(&self.bot_id, flow_name)
            .await
            .map_err(|source| DialogError::FlowLookup { source })?
        else {
            return Ok(Resolution::MissingFlow);
        };

        let node = node.unwrap_or(flow.start_node()).to_string();
        if flow.contains(&node) {
            Ok(Resolution::Found(flow, node))
        } else {
            Ok(Resolution::MissingNode(flow))
        }
    }

    async fn run_entry_actions(
        &self,
        node: &Node,
        event: &Event,
        session: &mut Session,
        outbox: &mut Vec<JsonValue>,
    ) -> Result<(), DialogError> {
        let timeout = self.engine.settings.action_timeout;

        for action in &node.entry_actions {
            debug!(node = %node.name, action = %action.name, "running entry action");
            let context = ActionContext {
                session_id: &session.session_id,
                event,
                variables: &session.context,
            };
            let outcome = match tokio::time::timeout(
                timeout,
                self.engine.actions.execute(&self.bot_id, action, &context),
            )
            .await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(source)) => {
                    return Err(DialogError::ActionExecution {
                        node: node.name.clone(),
                        source,
                    });
                }
                Err(_) => {
                    return Err(DialogError::ActionExecution {
                        node: node.name.clone(),
                        source: ActionError::TimedOut {
                            action: action.name.clone(),
                            after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        },
                    });
                }
            };
            session.merge_context(outcome.context_updates);
            outbox.extend(outcome.replies);
        }
        Ok(())
    }

    async fn emit(&self, event: &Event, outbox: Vec<JsonValue>) {
        for payload in outbox {
            let reply = event.reply(payload);
            if let Err(e) = self.engine.events.send_outgoing(&self.bot_id, reply).await {
                warn!(error = %e, "failed to emit reply");
            }
        }
    }

    async fn emit_unable_to_process(&self, event: &Event) {
        let payload = json!({
            "type": "error",
            "text": self.engine.settings.unable_to_process_text,
        });
        self.emit(event, vec![payload]).await;
    }
}

fn storage(source: SessionError) -> DialogError {
    DialogError::Storage { source }
}

fn busy_or_storage(session_id: &SessionId, e: SessionError) -> DialogError {
    match e {
        SessionError::Busy { waited_ms, .. } => DialogError::SessionBusy {
            session_id: session_id.clone(),
            waited_ms,
        },
        other => storage(other),
    }
}

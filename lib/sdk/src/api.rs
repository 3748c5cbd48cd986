//! The bot-facing API.
//!
//! [`BotApi`] groups everything a bot module may call. Each group is a cheap
//! handle over a shared component, so the facade can be cloned freely.

use crate::error::ExternalError;
use crate::external::{RealtimeEmitter, RealtimePayload, ShortLinkCreator};
use parley_core::{BotId, ConfigError, ConfigReader, ConfigValue, Event, SessionId};
use parley_dialog::{DialogEngine, DialogError, Session};
use parley_events::{EventEngine, EventError, MiddlewareDefinition, RegistryError};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

/// Event operations.
#[derive(Debug, Clone)]
pub struct EventApi {
    engine: Arc<EventEngine>,
}

impl EventApi {
    /// Registers a middleware.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateMiddleware`] if the name is taken
    /// in the definition's direction.
    pub fn register(&self, definition: MiddlewareDefinition) -> Result<(), RegistryError> {
        self.engine.register(definition)
    }

    /// Sends an event through the incoming chain.
    ///
    /// # Errors
    ///
    /// See [`EventEngine::send_incoming`].
    pub async fn send_incoming(&self, bot_id: &BotId, event: Event) -> Result<Event, EventError> {
        self.engine.send_incoming(bot_id, event).await
    }

    /// Sends an event through the outgoing chain.
    ///
    /// # Errors
    ///
    /// See [`EventEngine::send_outgoing`].
    pub async fn send_outgoing(&self, bot_id: &BotId, event: Event) -> Result<Event, EventError> {
        self.engine.send_outgoing(bot_id, event).await
    }
}

/// Dialog operations.
#[derive(Debug, Clone)]
pub struct DialogApi {
    engine: Arc<DialogEngine>,
}

impl DialogApi {
    /// Processes an incoming event for a session.
    ///
    /// # Errors
    ///
    /// See [`parley_dialog::BotDialog::process_message`].
    pub async fn process_message(
        &self,
        bot_id: &BotId,
        session_id: &SessionId,
        event: Event,
    ) -> Result<Session, DialogError> {
        self.engine
            .for_bot(bot_id.clone())
            .process_message(session_id, event)
            .await
    }

    /// Moves a session to a flow node.
    ///
    /// # Errors
    ///
    /// See [`parley_dialog::BotDialog::jump_to`].
    pub async fn jump_to(
        &self,
        bot_id: &BotId,
        session_id: &SessionId,
        flow: &str,
        node: Option<&str>,
    ) -> Result<Session, DialogError> {
        self.engine
            .for_bot(bot_id.clone())
            .jump_to(session_id, flow, node)
            .await
    }

    /// Returns a session's stored state.
    ///
    /// # Errors
    ///
    /// Returns [`DialogError::Storage`] if the store fails.
    pub async fn session(
        &self,
        bot_id: &BotId,
        session_id: &SessionId,
    ) -> Result<Option<Session>, DialogError> {
        self.engine.for_bot(bot_id.clone()).session(session_id).await
    }

    /// Deletes a session.
    ///
    /// # Errors
    ///
    /// See [`parley_dialog::BotDialog::reset`].
    pub async fn reset(&self, bot_id: &BotId, session_id: &SessionId) -> Result<bool, DialogError> {
        self.engine.for_bot(bot_id.clone()).reset(session_id).await
    }
}

/// Module configuration lookup.
#[derive(Clone)]
pub struct ConfigApi {
    reader: Arc<dyn ConfigReader>,
}

impl ConfigApi {
    /// Returns a module's global configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration source fails.
    pub async fn module_config(&self, module_id: &str) -> Result<Option<ConfigValue>, ConfigError> {
        self.reader.get_global(module_id).await
    }

    /// Returns a module's configuration for one bot.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration source fails.
    pub async fn module_config_for_bot(
        &self,
        module_id: &str,
        bot_id: &BotId,
    ) -> Result<Option<ConfigValue>, ConfigError> {
        self.reader.get_for_bot(module_id, bot_id).await
    }
}

impl fmt::Debug for ConfigApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigApi").finish_non_exhaustive()
    }
}

/// Logging for bot modules.
///
/// Messages go to `tracing` tagged with the module scope. Logging never
/// fails.
#[derive(Debug, Clone)]
pub struct ConsoleApi {
    scope: Arc<str>,
}

impl ConsoleApi {
    /// Returns a console tagged with another scope.
    #[must_use]
    pub fn scoped(&self, scope: &str) -> Self {
        Self {
            scope: Arc::from(scope),
        }
    }

    /// The scope messages are tagged with.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Logs at debug level.
    pub fn debug(&self, message: &str) {
        tracing::debug!(scope = %self.scope, "{message}");
    }

    /// Logs at info level.
    pub fn info(&self, message: &str) {
        tracing::info!(scope = %self.scope, "{message}");
    }
}

/// Realtime pushes.
#[derive(Clone)]
pub struct RealtimeApi {
    emitter: Arc<dyn RealtimeEmitter>,
}

impl RealtimeApi {
    /// Pushes a payload to connected clients.
    ///
    /// # Errors
    ///
    /// Returns the emitter's error.
    pub async fn emit(&self, payload: RealtimePayload) -> Result<(), ExternalError> {
        self.emitter.emit(payload).await
    }
}

impl fmt::Debug for RealtimeApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeApi").finish_non_exhaustive()
    }
}

/// HTTP helpers.
#[derive(Clone)]
pub struct HttpApi {
    short_links: Arc<dyn ShortLinkCreator>,
}

impl HttpApi {
    /// Registers a short link.
    ///
    /// # Errors
    ///
    /// Returns the short link creator's error.
    pub async fn create_short_link(
        &self,
        name: &str,
        destination: &str,
        params: Option<JsonValue>,
    ) -> Result<(), ExternalError> {
        self.short_links
            .create_short_link(name, destination, params)
            .await
    }
}

impl fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpApi").finish_non_exhaustive()
    }
}

/// Everything a bot module can reach.
#[derive(Debug, Clone)]
pub struct BotApi {
    pub events: EventApi,
    pub dialog: DialogApi,
    pub config: ConfigApi,
    pub console: ConsoleApi,
    pub realtime: RealtimeApi,
    pub http: HttpApi,
}

impl BotApi {
    pub(crate) fn new(
        events: Arc<EventEngine>,
        dialog: Arc<DialogEngine>,
        config: Arc<dyn ConfigReader>,
        realtime: Arc<dyn RealtimeEmitter>,
        short_links: Arc<dyn ShortLinkCreator>,
    ) -> Self {
        Self {
            events: EventApi { engine: events },
            dialog: DialogApi { engine: dialog },
            config: ConfigApi { reader: config },
            console: ConsoleApi {
                scope: Arc::from("bot"),
            },
            realtime: RealtimeApi { emitter: realtime },
            http: HttpApi { short_links },
        }
    }
}

//! The event engine.
//!
//! Dispatches an event through the ordered middleware chain of its direction,
//! scoped to one bot. Within one traversal handlers run strictly in chain
//! order; separate events are not ordered relative to each other.

use crate::error::{EventError, HandlerError, RegistryError};
use crate::middleware::{HandlerTimeout, MiddlewareDefinition};
use crate::registry::MiddlewareRegistry;
use parley_core::{BotId, Direction, Event};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Default per-handler time limit.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

/// Event engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventEngineConfig {
    /// Time limit for a single handler invocation.
    pub handler_timeout: Duration,
}

impl Default for EventEngineConfig {
    fn default() -> Self {
        Self {
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }
}

/// Runs events through the middleware chains of a registry.
#[derive(Debug)]
pub struct EventEngine {
    registry: Arc<MiddlewareRegistry>,
    config: EventEngineConfig,
}

impl EventEngine {
    /// Creates an engine over a registry.
    #[must_use]
    pub fn new(registry: Arc<MiddlewareRegistry>, config: EventEngineConfig) -> Self {
        Self { registry, config }
    }

    /// Returns the registry backing this engine.
    #[must_use]
    pub fn registry(&self) -> &Arc<MiddlewareRegistry> {
        &self.registry
    }

    /// Registers a middleware on the backing registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already registered for the direction.
    pub fn register(&self, definition: MiddlewareDefinition) -> Result<(), RegistryError> {
        self.registry.register(definition)
    }

    /// Sends an event through the incoming chain.
    ///
    /// # Errors
    ///
    /// - [`EventError::Validation`] if the event cannot be attributed to `bot_id`
    /// - [`EventError::Middleware`] if a critical middleware fails
    #[instrument(skip(self, event), fields(bot = %bot_id, event = %event.id()))]
    pub async fn send_incoming(&self, bot_id: &BotId, event: Event) -> Result<Event, EventError> {
        self.dispatch(bot_id, Direction::Incoming, event).await
    }

    /// Sends an event through the outgoing chain.
    ///
    /// # Errors
    ///
    /// - [`EventError::Validation`] if the event cannot be attributed to `bot_id`
    /// - [`EventError::Middleware`] if a critical middleware fails
    #[instrument(skip(self, event), fields(bot = %bot_id, event = %event.id()))]
    pub async fn send_outgoing(&self, bot_id: &BotId, event: Event) -> Result<Event, EventError> {
        self.dispatch(bot_id, Direction::Outgoing, event).await
    }

    async fn dispatch(
        &self,
        bot_id: &BotId,
        direction: Direction,
        mut event: Event,
    ) -> Result<Event, EventError> {
        validate(bot_id, direction, &mut event)?;

        let chain = self.registry.list_for(direction);
        for entry in chain.iter() {
            if event.is_handled() {
                debug!(%direction, "event handled, chain halted");
                break;
            }

            let definition = &entry.definition;
            debug!(middleware = %definition.name, %direction, "running middleware");

            let limit = match definition.timeout {
                HandlerTimeout::EngineDefault => Some(self.config.handler_timeout),
                HandlerTimeout::After(limit) => Some(limit),
                HandlerTimeout::Unbounded => None,
            };
            let outcome = match limit {
                Some(limit) => tokio::time::timeout(limit, definition.handler.handle(&mut event))
                    .await
                    .unwrap_or_else(|_| {
                        Err(HandlerError::TimedOut {
                            after_ms: duration_ms(limit),
                        })
                    }),
                None => definition.handler.handle(&mut event).await,
            };

            let Err(failure) = outcome else {
                continue;
            };

            if definition.critical {
                error!(
                    middleware = %definition.name,
                    %direction,
                    error = %failure,
                    "critical middleware failed, aborting chain"
                );
                return Err(EventError::Middleware {
                    name: definition.name.clone(),
                    direction,
                    source: failure,
                });
            }

            warn!(
                middleware = %definition.name,
                %direction,
                error = %failure,
                "middleware failed, continuing chain"
            );
        }

        Ok(event)
    }
}

fn validate(bot_id: &BotId, direction: Direction, event: &mut Event) -> Result<(), EventError> {
    if event.direction() != direction {
        return Err(EventError::Validation {
            reason: format!(
                "{} event {} sent through the {direction} chain",
                event.direction(),
                event.id()
            ),
        });
    }

    event
        .attribute_to(bot_id)
        .map_err(|e| EventError::Validation {
            reason: e.to_string(),
        })
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

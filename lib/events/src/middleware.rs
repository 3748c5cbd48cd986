//! Middleware definitions.
//!
//! A middleware is a named handler bound to one [`Direction`]. Handlers run
//! in `(priority, registration sequence)` order; a lower priority runs first.

use crate::error::HandlerError;
use async_trait::async_trait;
use parley_core::{Direction, Event};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default priority for middleware that does not care about its position.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Logic invoked for every event passing through a chain.
///
/// A handler may rewrite the payload and flags. Calling
/// [`Event::mark_handled`] halts the rest of the chain.
#[async_trait]
pub trait MiddlewareHandler: Send + Sync {
    /// Processes one event.
    async fn handle(&self, event: &mut Event) -> Result<(), HandlerError>;
}

/// How long one handler invocation may run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandlerTimeout {
    /// The engine's `handler_timeout`.
    #[default]
    EngineDefault,
    /// A limit of its own.
    After(Duration),
    /// No limit. The handler must bound its own work.
    Unbounded,
}

/// Registration-time description of a middleware.
#[derive(Clone)]
pub struct MiddlewareDefinition {
    /// Unique name within its direction.
    pub name: String,
    /// The chain this middleware belongs to.
    pub direction: Direction,
    /// Ordering key; lower runs first.
    pub priority: i32,
    /// Whether a failure aborts the chain instead of being skipped.
    pub critical: bool,
    /// Human-readable description.
    pub description: String,
    /// Time limit applied by the engine.
    pub timeout: HandlerTimeout,
    /// The handler itself.
    pub handler: Arc<dyn MiddlewareHandler>,
}

impl MiddlewareDefinition {
    /// Creates a best-effort middleware with the default priority.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        handler: Arc<dyn MiddlewareHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            priority: DEFAULT_PRIORITY,
            critical: false,
            description: String::new(),
            timeout: HandlerTimeout::EngineDefault,
            handler,
        }
    }

    /// Creates a middleware for the incoming chain.
    #[must_use]
    pub fn incoming(name: impl Into<String>, handler: Arc<dyn MiddlewareHandler>) -> Self {
        Self::new(name, Direction::Incoming, handler)
    }

    /// Creates a middleware for the outgoing chain.
    #[must_use]
    pub fn outgoing(name: impl Into<String>, handler: Arc<dyn MiddlewareHandler>) -> Self {
        Self::new(name, Direction::Outgoing, handler)
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the middleware critical: its failures abort the chain.
    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Gives the handler its own time limit instead of the engine's.
    #[must_use]
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = HandlerTimeout::After(limit);
        self
    }

    /// Exempts the handler from time limits.
    ///
    /// Only for handlers that enforce their own deadlines and must not be
    /// cancelled halfway.
    #[must_use]
    pub fn without_timeout(mut self) -> Self {
        self.timeout = HandlerTimeout::Unbounded;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl fmt::Debug for MiddlewareDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareDefinition")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("priority", &self.priority)
            .field("critical", &self.critical)
            .field("description", &self.description)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A definition as stored by the registry, stamped with its sequence number.
#[derive(Debug, Clone)]
pub struct RegisteredMiddleware {
    /// The registered definition.
    pub definition: MiddlewareDefinition,
    /// Registry-wide registration order.
    pub sequence: u64,
}

impl RegisteredMiddleware {
    /// The sort key that defines chain order.
    #[must_use]
    pub fn order_key(&self) -> (i32, u64) {
        (self.definition.priority, self.sequence)
    }

    /// The middleware's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl MiddlewareHandler for Noop {
        async fn handle(&self, _event: &mut Event) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn definition_builder() {
        let def = MiddlewareDefinition::incoming("auth", Arc::new(Noop))
            .with_priority(5)
            .critical()
            .with_description("rejects unknown users");

        assert_eq!(def.name, "auth");
        assert_eq!(def.direction, Direction::Incoming);
        assert_eq!(def.priority, 5);
        assert!(def.critical);
        assert_eq!(def.description, "rejects unknown users");
    }

    #[test]
    fn defaults_are_best_effort() {
        let def = MiddlewareDefinition::outgoing("log", Arc::new(Noop));
        assert_eq!(def.priority, DEFAULT_PRIORITY);
        assert!(!def.critical);
        assert_eq!(def.timeout, HandlerTimeout::EngineDefault);
        assert!(format!("{def:?}").contains("log"));
    }

    #[test]
    fn timeout_overrides() {
        let limited = MiddlewareDefinition::incoming("nlu", Arc::new(Noop))
            .with_timeout(Duration::from_millis(250));
        assert_eq!(
            limited.timeout,
            HandlerTimeout::After(Duration::from_millis(250))
        );

        let unbounded = limited.without_timeout();
        assert_eq!(unbounded.timeout, HandlerTimeout::Unbounded);
    }
}

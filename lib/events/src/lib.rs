//! Middleware registry and event engine.
//!
//! Events travel through one of two ordered middleware chains, incoming or
//! outgoing. Each middleware may rewrite the event, mark it handled to stop
//! the chain, or fail. Failures of critical middleware abort the chain; all
//! others are logged and skipped.

pub mod engine;
pub mod error;
pub mod middleware;
pub mod registry;

pub use engine::{DEFAULT_HANDLER_TIMEOUT, EventEngine, EventEngineConfig};
pub use error::{EventError, HandlerError, RegistryError};
pub use middleware::{
    DEFAULT_PRIORITY, HandlerTimeout, MiddlewareDefinition, MiddlewareHandler,
    RegisteredMiddleware,
};
pub use registry::{Chain, MiddlewareRegistry};

//! External collaborators that sit outside the engine.
//!
//! Realtime pushes and short links belong to the hosting platform. The
//! engine only forwards to them; the defaults do nothing.

use crate::error::ExternalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

/// A message pushed to connected realtime clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimePayload {
    /// Client-side event name.
    pub event_name: String,
    pub data: JsonValue,
}

impl RealtimePayload {
    /// Creates a payload for `event_name`.
    #[must_use]
    pub fn new(event_name: impl Into<String>, data: JsonValue) -> Self {
        Self {
            event_name: event_name.into(),
            data,
        }
    }
}

/// Pushes payloads to realtime clients.
#[async_trait]
pub trait RealtimeEmitter: Send + Sync {
    async fn emit(&self, payload: RealtimePayload) -> Result<(), ExternalError>;
}

/// Registers short links that redirect to a destination.
#[async_trait]
pub trait ShortLinkCreator: Send + Sync {
    async fn create_short_link(
        &self,
        name: &str,
        destination: &str,
        params: Option<JsonValue>,
    ) -> Result<(), ExternalError>;
}

/// Drops every realtime payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRealtime;

#[async_trait]
impl RealtimeEmitter for NoopRealtime {
    async fn emit(&self, payload: RealtimePayload) -> Result<(), ExternalError> {
        debug!(event_name = %payload.event_name, "realtime emit ignored");
        Ok(())
    }
}

/// Accepts and forgets every short link.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopShortLinks;

#[async_trait]
impl ShortLinkCreator for NoopShortLinks {
    async fn create_short_link(
        &self,
        name: &str,
        destination: &str,
        _params: Option<JsonValue>,
    ) -> Result<(), ExternalError> {
        debug!(name, destination, "short link ignored");
        Ok(())
    }
}

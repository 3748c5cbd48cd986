//! Directional message events.
//!
//! An [`Event`] carries a payload between a transport and the dialog logic.
//! Its identity is fixed at construction; the payload and [`EventFlags`] may
//! be changed by middleware while the event traverses a chain. The owning bot
//! is write-once: it can be stamped while absent, never re-assigned.

use crate::id::{BotId, EventId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Which way an event travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// From a transport towards the bot.
    Incoming,
    /// From the bot towards a transport.
    Outgoing,
}

impl Direction {
    /// Returns the direction as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable processing flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFlags {
    /// Set by a middleware to stop the rest of the chain.
    pub handled: bool,
}

/// Returned when an event is attributed to a second bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributionError {
    /// The bot the event already belongs to.
    pub owner: BotId,
    /// The bot that tried to claim it.
    pub requested: BotId,
}

impl fmt::Display for AttributionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event belongs to bot '{}', not '{}'",
            self.owner, self.requested
        )
    }
}

impl std::error::Error for AttributionError {}

/// A directional message unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    bot_id: Option<BotId>,
    direction: Direction,
    /// Transport channel name (e.g. "web", "telegram").
    pub channel: String,
    /// Transport-level thread, if the channel has threads.
    pub thread_id: Option<String>,
    session_id: SessionId,
    /// Message body.
    pub payload: JsonValue,
    timestamp: DateTime<Utc>,
    /// Processing flags.
    #[serde(default)]
    pub flags: EventFlags,
}

impl Event {
    /// Creates an unattributed incoming event.
    #[must_use]
    pub fn incoming(channel: impl Into<String>, session_id: SessionId, payload: JsonValue) -> Self {
        Self::new(Direction::Incoming, channel, session_id, payload)
    }

    /// Creates an unattributed outgoing event.
    #[must_use]
    pub fn outgoing(channel: impl Into<String>, session_id: SessionId, payload: JsonValue) -> Self {
        Self::new(Direction::Outgoing, channel, session_id, payload)
    }

    fn new(
        direction: Direction,
        channel: impl Into<String>,
        session_id: SessionId,
        payload: JsonValue,
    ) -> Self {
        Self {
            id: EventId::new(),
            bot_id: None,
            direction,
            channel: channel.into(),
            thread_id: None,
            session_id,
            payload,
            timestamp: Utc::now(),
            flags: EventFlags::default(),
        }
    }

    /// Attributes the event to a bot up front.
    #[must_use]
    pub fn for_bot(mut self, bot_id: BotId) -> Self {
        self.bot_id = Some(bot_id);
        self
    }

    /// Sets the transport thread.
    #[must_use]
    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Builds the outgoing counterpart of this event.
    ///
    /// The reply keeps the bot, channel, thread and session and gets a fresh
    /// id and timestamp.
    #[must_use]
    pub fn reply(&self, payload: JsonValue) -> Self {
        Self {
            id: EventId::new(),
            bot_id: self.bot_id.clone(),
            direction: Direction::Outgoing,
            channel: self.channel.clone(),
            thread_id: self.thread_id.clone(),
            session_id: self.session_id.clone(),
            payload,
            timestamp: Utc::now(),
            flags: EventFlags::default(),
        }
    }

    /// The event's unique id.
    #[must_use]
    pub fn id(&self) -> EventId {
        self.id
    }

    /// The owning bot, once attributed.
    #[must_use]
    pub fn bot_id(&self) -> Option<&BotId> {
        self.bot_id.as_ref()
    }

    /// Which chain the event travels through.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The conversation the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// When the event was created.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Stamps the owning bot, or confirms it.
    ///
    /// # Errors
    ///
    /// Returns an error if the event already belongs to another bot.
    pub fn attribute_to(&mut self, bot_id: &BotId) -> Result<(), AttributionError> {
        match &self.bot_id {
            Some(owner) if owner != bot_id => Err(AttributionError {
                owner: owner.clone(),
                requested: bot_id.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                self.bot_id = Some(bot_id.clone());
                Ok(())
            }
        }
    }

    /// Marks the event handled, halting the current chain.
    pub fn mark_handled(&mut self) {
        self.flags.handled = true;
    }

    /// Whether a middleware marked the event handled.
    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.flags.handled
    }

    /// Returns the textual content of the payload.
    ///
    /// A string payload is its own text; an object payload contributes its
    /// `"text"` field when that is a string.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            JsonValue::String(text) => Some(text),
            JsonValue::Object(map) => map.get("text").and_then(JsonValue::as_str),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> SessionId {
        "s1".parse().expect("session id")
    }

    #[test]
    fn attribute_stamps_missing_bot() {
        let mut event = Event::incoming("web", session(), json!("hello"));
        let bot: BotId = "bot1".parse().expect("bot id");

        event.attribute_to(&bot).expect("stamp");
        assert_eq!(event.bot_id(), Some(&bot));

        event.attribute_to(&bot).expect("same bot is fine");
    }

    #[test]
    fn attribute_refuses_second_bot() {
        let bot1: BotId = "bot1".parse().expect("bot id");
        let bot2: BotId = "bot2".parse().expect("bot id");
        let mut event = Event::incoming("web", session(), json!("hello")).for_bot(bot1.clone());

        let err = event.attribute_to(&bot2).unwrap_err();
        assert_eq!(err.owner, bot1);
        assert_eq!(event.bot_id(), Some(&bot1));
    }

    #[test]
    fn reply_keeps_routing_and_changes_identity() {
        let bot: BotId = "bot1".parse().expect("bot id");
        let incoming = Event::incoming("web", session(), json!("hi"))
            .for_bot(bot.clone())
            .with_thread("t-9");

        let reply = incoming.reply(json!({"text": "hey"}));

        assert_ne!(reply.id(), incoming.id());
        assert_eq!(reply.direction(), Direction::Outgoing);
        assert_eq!(reply.bot_id(), Some(&bot));
        assert_eq!(reply.thread_id.as_deref(), Some("t-9"));
        assert_eq!(reply.session_id(), incoming.session_id());
        assert_eq!(reply.text(), Some("hey"));
    }

    #[test]
    fn text_extraction() {
        assert_eq!(
            Event::incoming("web", session(), json!("plain")).text(),
            Some("plain")
        );
        assert_eq!(
            Event::incoming("web", session(), json!({"text": "boxed"})).text(),
            Some("boxed")
        );
        assert_eq!(Event::incoming("web", session(), json!(42)).text(), None);
    }

    #[test]
    fn mark_handled_sets_flag() {
        let mut event = Event::outgoing("web", session(), json!(null));
        assert!(!event.is_handled());
        event.mark_handled();
        assert!(event.is_handled());
    }
}

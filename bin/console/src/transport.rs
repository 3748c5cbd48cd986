//! Line transport over async readers and writers.
//!
//! Each input line is `<bot_id> <session_id> <text...>`. Replies leave
//! through the outgoing chain and are printed by [`ReplyPrinter`] as
//! `[<bot_id>/<session_id>] <text>`.

use crate::error::ConsoleError;
use async_trait::async_trait;
use parley_core::{BotId, Event, SessionId};
use parley_events::{HandlerError, MiddlewareHandler};
use parley_sdk::BotApi;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Channel name stamped on console events.
pub const CHANNEL: &str = "console";

/// Name of the outgoing middleware that prints replies.
pub const REPLY_PRINTER: &str = "console.reply";

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundLine {
    pub bot_id: BotId,
    pub session_id: SessionId,
    pub text: String,
}

impl InboundLine {
    /// Parses a line. Blank lines yield `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::MalformedLine`] if the bot, session or text
    /// is missing.
    pub fn parse(line: &str) -> Result<Option<Self>, ConsoleError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let malformed = || ConsoleError::MalformedLine {
            line: line.to_string(),
        };

        let mut parts = line.splitn(3, char::is_whitespace);
        let (Some(bot), Some(session), Some(text)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        let text = text.trim();
        if text.is_empty() {
            return Err(malformed());
        }

        Ok(Some(Self {
            bot_id: BotId::try_new(bot).map_err(|_| malformed())?,
            session_id: SessionId::try_new(session).map_err(|_| malformed())?,
            text: text.to_string(),
        }))
    }

    /// Converts to an incoming console event and its bot.
    #[must_use]
    pub fn into_event(self) -> (BotId, Event) {
        let event = Event::incoming(CHANNEL, self.session_id, JsonValue::String(self.text));
        (self.bot_id, event)
    }
}

/// Totals for one run over an input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStats {
    pub processed: usize,
    pub failed: usize,
    pub malformed: usize,
}

/// Sends every line of `input` through the incoming chain until EOF.
///
/// Failed events are logged and counted; the dialog has already answered
/// the user.
///
/// # Errors
///
/// Returns [`ConsoleError::Io`] if reading the input fails.
pub async fn run_lines<R>(
    api: &BotApi,
    input: R,
) -> parley_core::Result<LineStats, ConsoleError>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = LineStats::default();
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await.map_err(|e| ConsoleError::Io {
        details: e.to_string(),
    })? {
        let inbound = match InboundLine::parse(&line) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "skipping input line");
                stats.malformed += 1;
                continue;
            }
        };

        let (bot_id, event) = inbound.into_event();
        match api.events.send_incoming(&bot_id, event).await {
            Ok(event) => {
                debug!(event = %event.id(), handled = event.is_handled(), "line processed");
                stats.processed += 1;
            }
            Err(e) => {
                warn!(bot = %bot_id, error = %e, "line failed");
                stats.failed += 1;
            }
        }
    }

    Ok(stats)
}

/// Renders an outgoing event as one output line.
#[must_use]
pub fn format_reply(event: &Event) -> String {
    let bot = event.bot_id().map_or("-", BotId::as_str);
    match event.text() {
        Some(text) => format!("[{bot}/{}] {text}", event.session_id()),
        None => format!("[{bot}/{}] {}", event.session_id(), event.payload),
    }
}

/// Outgoing middleware that writes replies to a writer.
pub struct ReplyPrinter<W> {
    out: Arc<Mutex<W>>,
}

impl<W> ReplyPrinter<W> {
    /// Writes replies to `out`.
    pub fn new(out: Arc<Mutex<W>>) -> Self {
        Self { out }
    }
}

#[async_trait]
impl<W> MiddlewareHandler for ReplyPrinter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn handle(&self, event: &mut Event) -> Result<(), HandlerError> {
        let mut line = format_reply(event);
        line.push('\n');

        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| HandlerError::failed(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| HandlerError::failed(e.to_string()))?;
        Ok(())
    }
}

//! Module configuration lookup.
//!
//! Configuration blobs are opaque to the engine: they are stored and handed
//! out as JSON mappings, and only the module that owns a blob interprets it.

use crate::id::BotId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

/// An uninterpreted configuration blob.
pub type ConfigValue = JsonValue;

/// Errors from configuration lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The backing source could not be read.
    SourceUnavailable { reason: String },
    /// The backing document is malformed.
    InvalidDocument { reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceUnavailable { reason } => {
                write!(f, "configuration source unavailable: {reason}")
            }
            Self::InvalidDocument { reason } => {
                write!(f, "invalid configuration document: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Reads module configuration, globally or per bot.
#[async_trait]
pub trait ConfigReader: Send + Sync {
    /// Returns the global configuration of a module, if any.
    async fn get_global(&self, module_id: &str) -> Result<Option<ConfigValue>, ConfigError>;

    /// Returns a module's configuration for one bot, if any.
    async fn get_for_bot(
        &self,
        module_id: &str,
        bot_id: &BotId,
    ) -> Result<Option<ConfigValue>, ConfigError>;
}

/// On-disk shape of a [`StaticConfigReader`] document.
///
/// ```json
/// {
///   "global": { "analytics": { "enabled": true } },
///   "bots": { "bot1": { "analytics": { "enabled": false } } }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigDocument {
    /// module → blob
    #[serde(default)]
    pub global: HashMap<String, ConfigValue>,
    /// bot → module → blob
    #[serde(default)]
    pub bots: HashMap<BotId, HashMap<String, ConfigValue>>,
}

/// A fixed, in-memory configuration source.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigReader {
    document: ConfigDocument,
}

impl StaticConfigReader {
    /// Creates an empty reader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reader from a parsed document.
    #[must_use]
    pub fn from_document(document: ConfigDocument) -> Self {
        Self { document }
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not match [`ConfigDocument`].
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json)
            .map(Self::from_document)
            .map_err(|e| ConfigError::InvalidDocument {
                reason: e.to_string(),
            })
    }

    /// Sets a module's global configuration.
    #[must_use]
    pub fn with_global(mut self, module_id: impl Into<String>, value: ConfigValue) -> Self {
        self.document.global.insert(module_id.into(), value);
        self
    }

    /// Sets a module's configuration for one bot.
    #[must_use]
    pub fn with_bot(
        mut self,
        bot_id: BotId,
        module_id: impl Into<String>,
        value: ConfigValue,
    ) -> Self {
        self.document
            .bots
            .entry(bot_id)
            .or_default()
            .insert(module_id.into(), value);
        self
    }
}

#[async_trait]
impl ConfigReader for StaticConfigReader {
    async fn get_global(&self, module_id: &str) -> Result<Option<ConfigValue>, ConfigError> {
        Ok(self.document.global.get(module_id).cloned())
    }

    async fn get_for_bot(
        &self,
        module_id: &str,
        bot_id: &BotId,
    ) -> Result<Option<ConfigValue>, ConfigError> {
        Ok(self
            .document
            .bots
            .get(bot_id)
            .and_then(|modules| modules.get(module_id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn static_reader_separates_global_and_bot_values() {
        let bot: BotId = "bot1".parse().expect("bot id");
        let reader = StaticConfigReader::new()
            .with_global("analytics", json!({"enabled": true}))
            .with_bot(bot.clone(), "analytics", json!({"enabled": false}));

        assert_eq!(
            reader.get_global("analytics").await.expect("read"),
            Some(json!({"enabled": true}))
        );
        assert_eq!(
            reader.get_for_bot("analytics", &bot).await.expect("read"),
            Some(json!({"enabled": false}))
        );
        assert_eq!(reader.get_global("missing").await.expect("read"), None);
    }

    #[tokio::test]
    async fn bot_lookup_does_not_fall_back_to_global() {
        let reader = StaticConfigReader::new().with_global("nlu", json!({"lang": "en"}));
        let bot: BotId = "bot2".parse().expect("bot id");

        assert_eq!(reader.get_for_bot("nlu", &bot).await.expect("read"), None);
    }

    #[test]
    fn from_json_parses_document() {
        let reader = StaticConfigReader::from_json(
            r#"{"global":{"m":{"a":1}},"bots":{"b1":{"m":{"a":2}}}}"#,
        )
        .expect("parse");
        assert_eq!(reader.document.global.len(), 1);
        assert_eq!(reader.document.bots.len(), 1);

        let err = StaticConfigReader::from_json("[]").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDocument { .. }));
    }
}

//! Transition conditions.
//!
//! A [`Condition`] is a typed predicate over the incoming event and the
//! session context. Conditions are pure: evaluating one never has side
//! effects and never fails. A missing field or a payload without text makes
//! the predicate false.

use crate::error::FlowValidationError;
use crate::session::SessionContext;
use parley_core::Event;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// A compiled text pattern.
///
/// Compilation happens when the pattern is built or deserialized, so an
/// invalid pattern is rejected together with the flow that declares it.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern(Regex);

impl Pattern {
    /// Compiles a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is not a valid regular expression.
    pub fn new(pattern: &str) -> Result<Self, FlowValidationError> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|e| FlowValidationError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    /// The source pattern.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Whether the pattern matches anywhere in `text`.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.as_str()).finish()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl TryFrom<String> for Pattern {
    type Error = FlowValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Pattern> for String {
    fn from(pattern: Pattern) -> Self {
        pattern.as_str().to_string()
    }
}

/// A transition predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Always true.
    Always,
    /// The event text equals `value`.
    TextEquals {
        value: String,
        #[serde(default)]
        case_sensitive: bool,
    },
    /// The event text matches `pattern`.
    TextMatches { pattern: Pattern },
    /// A payload field, addressed by a dotted path, equals `value`.
    PayloadFieldEquals { field: String, value: JsonValue },
    /// A context variable equals `value`.
    ContextEquals { key: String, value: JsonValue },
    /// A context variable is set to anything but null.
    ContextPresent { key: String },
    /// Every inner condition holds. True when empty.
    All { of: Vec<Condition> },
    /// At least one inner condition holds. False when empty.
    Any { of: Vec<Condition> },
    /// The inner condition does not hold.
    Not { condition: Box<Condition> },
}

impl Condition {
    /// Case-insensitive text equality.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::TextEquals {
            value: value.into(),
            case_sensitive: false,
        }
    }

    /// Pattern match on the event text.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` does not compile.
    pub fn matches(pattern: &str) -> Result<Self, FlowValidationError> {
        Pattern::new(pattern).map(|pattern| Self::TextMatches { pattern })
    }

    /// Evaluates the condition.
    #[must_use]
    pub fn evaluate(&self, event: &Event, context: &SessionContext) -> bool {
        match self {
            Self::Always => true,
            Self::TextEquals {
                value,
                case_sensitive,
            } => event.text().is_some_and(|text| {
                let text = text.trim();
                if *case_sensitive {
                    text == value
                } else {
                    text.to_lowercase() == value.to_lowercase()
                }
            }),
            Self::TextMatches { pattern } => event.text().is_some_and(|text| pattern.is_match(text)),
            Self::PayloadFieldEquals { field, value } => {
                lookup_path(&event.payload, field) == Some(value)
            }
            Self::ContextEquals { key, value } => context.get(key) == Some(value),
            Self::ContextPresent { key } => context.get(key).is_some_and(|v| !v.is_null()),
            Self::All { of } => of.iter().all(|c| c.evaluate(event, context)),
            Self::Any { of } => of.iter().any(|c| c.evaluate(event, context)),
            Self::Not { condition } => !condition.evaluate(event, context),
        }
    }
}

fn lookup_path<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(value, |current, segment| match current {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

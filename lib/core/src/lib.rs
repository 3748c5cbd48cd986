//! Core domain types shared by the parley crates.
//!
//! This crate provides identifiers, the directional [`Event`] that flows
//! through middleware chains and dialogs, the module configuration contract,
//! and the rootcause-based `Result` alias.

pub mod config;
pub mod error;
pub mod event;
pub mod id;

pub use config::{ConfigDocument, ConfigError, ConfigReader, ConfigValue, StaticConfigReader};
pub use error::Result;
pub use event::{AttributionError, Direction, Event, EventFlags};
pub use id::{BotId, EventId, ParseIdError, SessionId};

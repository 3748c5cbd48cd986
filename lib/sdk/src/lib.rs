//! Runtime assembly and the bot-facing API for parley.
//!
//! - [`ParleyConfig`]: configuration loaded from the environment
//! - [`assemble`]: builds the event and dialog engines from explicit
//!   collaborators and wires them together
//! - [`BotApi`]: the grouped facade bot modules call

pub mod api;
pub mod assembly;
pub mod config;
pub mod error;
pub mod external;

pub use api::{BotApi, ConfigApi, ConsoleApi, DialogApi, EventApi, HttpApi, RealtimeApi};
pub use assembly::{Collaborators, DIALOG_MIDDLEWARE, Runtime, assemble};
pub use config::{DialogConfig, EventsConfig, ParleyConfig, RuntimeSettings, SessionsConfig};
pub use error::{AssemblyError, ExternalError};
pub use external::{
    NoopRealtime, NoopShortLinks, RealtimeEmitter, RealtimePayload, ShortLinkCreator,
};

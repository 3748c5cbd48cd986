//! Runtime configuration.
//!
//! Loaded via the `config` crate from `PARLEY_`-prefixed environment
//! variables, with `__` separating nested keys:
//!
//! ```text
//! PARLEY_EVENTS__HANDLER_TIMEOUT_MS=5000
//! PARLEY_DIALOG__DEFAULT_FLOW=main
//! PARLEY_DIALOG__FALLBACK_FLOW=support
//! PARLEY_DIALOG__FALLBACK_NODE=intro
//! PARLEY_SESSIONS__IDLE_TIMEOUT_SECS=1800
//! PARLEY_FLOWS_DIR=./flows
//! ```

use crate::error::AssemblyError;
use parley_dialog::{DEFAULT_FLOW, DEFAULT_UNABLE_TO_PROCESS_TEXT, DialogSettings, NodeRef};
use parley_events::EventEngineConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub dialog: DialogConfig,

    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Directory holding `<bot_id>/<flow>.json` flow documents.
    #[serde(default = "default_flows_dir")]
    pub flows_dir: PathBuf,

    /// Optional JSON module configuration document.
    #[serde(default)]
    pub module_config_file: Option<PathBuf>,
}

/// Event engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Time limit for one middleware handler, in milliseconds.
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,
}

/// Dialog engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DialogConfig {
    /// How long an event waits for a busy session, in milliseconds.
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,

    /// Time limit for one entry action, in milliseconds.
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,

    #[serde(default = "default_flow")]
    pub default_flow: String,

    #[serde(default = "default_unable_to_process_text")]
    pub unable_to_process_text: String,

    /// Fallback flow; requires `fallback_node`.
    #[serde(default)]
    pub fallback_flow: Option<String>,

    #[serde(default)]
    pub fallback_node: Option<String>,
}

/// Session housekeeping configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Sessions idle for longer than this are evicted.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Interval between eviction sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_flows_dir() -> PathBuf {
    PathBuf::from("./flows")
}

fn default_handler_timeout_ms() -> u64 {
    5_000
}

fn default_lock_wait_ms() -> u64 {
    2_000
}

fn default_action_timeout_ms() -> u64 {
    10_000
}

fn default_flow() -> String {
    DEFAULT_FLOW.to_string()
}

fn default_unable_to_process_text() -> String {
    DEFAULT_UNABLE_TO_PROCESS_TEXT.to_string()
}

fn default_idle_timeout_secs() -> u64 {
    1_800
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            events: EventsConfig::default(),
            dialog: DialogConfig::default(),
            sessions: SessionsConfig::default(),
            flows_dir: default_flows_dir(),
            module_config_file: None,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: default_handler_timeout_ms(),
        }
    }
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            lock_wait_ms: default_lock_wait_ms(),
            action_timeout_ms: default_action_timeout_ms(),
            default_flow: default_flow(),
            unable_to_process_text: default_unable_to_process_text(),
            fallback_flow: None,
            fallback_node: None,
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Engine settings derived from a [`ParleyConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub events: EventEngineConfig,
    pub dialog: DialogSettings,
}

impl ParleyConfig {
    /// Loads configuration from `PARLEY_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable has the wrong type.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("PARLEY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Converts to engine settings.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::InvalidSettings`] if the default flow is
    /// empty, a timeout is zero, or only half of the fallback is set.
    pub fn runtime_settings(&self) -> Result<RuntimeSettings, AssemblyError> {
        let invalid = |reason: &str| AssemblyError::InvalidSettings {
            reason: reason.to_string(),
        };

        if self.dialog.default_flow.trim().is_empty() {
            return Err(invalid("dialog.default_flow is empty"));
        }
        if self.events.handler_timeout_ms == 0 || self.dialog.action_timeout_ms == 0 {
            return Err(invalid("timeouts must be greater than zero"));
        }

        let fallback = match (&self.dialog.fallback_flow, &self.dialog.fallback_node) {
            (Some(flow), Some(node)) => Some(NodeRef::new(flow, node)),
            (None, None) => None,
            _ => {
                return Err(invalid(
                    "dialog.fallback_flow and dialog.fallback_node must be set together",
                ));
            }
        };

        Ok(RuntimeSettings {
            events: EventEngineConfig {
                handler_timeout: Duration::from_millis(self.events.handler_timeout_ms),
            },
            dialog: DialogSettings {
                lock_wait: Duration::from_millis(self.dialog.lock_wait_ms),
                action_timeout: Duration::from_millis(self.dialog.action_timeout_ms),
                default_flow: self.dialog.default_flow.clone(),
                unable_to_process_text: self.dialog.unable_to_process_text.clone(),
                fallback,
                ..DialogSettings::default()
            },
        })
    }

    /// How long a session may stay idle before eviction.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.sessions.idle_timeout_secs)
    }

    /// Interval between eviction sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.sweep_interval_secs)
    }
}

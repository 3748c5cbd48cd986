//! Flow lookup.
//!
//! Flow definitions are stored outside the engine; the engine only needs to
//! fetch them by bot and name.

use crate::error::{FlowProviderError, FlowValidationError};
use crate::flow::Flow;
use async_trait::async_trait;
use parley_core::BotId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Source of flow definitions.
#[async_trait]
pub trait FlowProvider: Send + Sync {
    /// Returns a bot's flow by name, or `None` if the bot has no such flow.
    async fn get_flow(
        &self,
        bot_id: &BotId,
        flow_name: &str,
    ) -> Result<Option<Arc<Flow>>, FlowProviderError>;
}

/// Flows held in memory, per bot.
#[derive(Debug, Default)]
pub struct InMemoryFlowProvider {
    flows: RwLock<HashMap<BotId, HashMap<String, Arc<Flow>>>>,
}

impl InMemoryFlowProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a bot's flow, returning the replaced one.
    pub fn insert(&self, bot_id: BotId, flow: Flow) -> Option<Arc<Flow>> {
        debug!(bot = %bot_id, flow = flow.name(), "loading flow");
        let mut flows = self.flows.write().unwrap_or_else(|e| e.into_inner());
        flows
            .entry(bot_id)
            .or_default()
            .insert(flow.name().to_string(), Arc::new(flow))
    }

    /// Parses, validates and adds a JSON flow document.
    ///
    /// # Errors
    ///
    /// Returns the validation error; nothing is stored in that case.
    pub fn insert_json(&self, bot_id: BotId, json: &str) -> Result<(), FlowValidationError> {
        let flow = Flow::from_json(json)?;
        self.insert(bot_id, flow);
        Ok(())
    }

    /// Removes a bot's flow.
    pub fn remove(&self, bot_id: &BotId, flow_name: &str) -> Option<Arc<Flow>> {
        let mut flows = self.flows.write().unwrap_or_else(|e| e.into_inner());
        flows.get_mut(bot_id)?.remove(flow_name)
    }

    /// Returns the sorted flow names of a bot.
    #[must_use]
    pub fn flow_names(&self, bot_id: &BotId) -> Vec<String> {
        let flows = self.flows.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = flows
            .get(bot_id)
            .map(|bot_flows| bot_flows.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[async_trait]
impl FlowProvider for InMemoryFlowProvider {
    async fn get_flow(
        &self,
        bot_id: &BotId,
        flow_name: &str,
    ) -> Result<Option<Arc<Flow>>, FlowProviderError> {
        let flows = self.flows.read().unwrap_or_else(|e| e.into_inner());
        Ok(flows
            .get(bot_id)
            .and_then(|bot_flows| bot_flows.get(flow_name))
            .cloned())
    }
}

//! Middleware registry.
//!
//! The registry is read-mostly: chains are read for every event and
//! registrations happen rarely, mostly at startup. Each direction's chain is
//! kept as an immutable sorted snapshot that is replaced wholesale on
//! registration, so a reader sees either the old or the new chain.

use crate::error::RegistryError;
use crate::middleware::{MiddlewareDefinition, RegisteredMiddleware};
use parley_core::Direction;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// An ordered, immutable view of one direction's chain.
pub type Chain = Arc<[RegisteredMiddleware]>;

#[derive(Debug)]
struct RegistryState {
    incoming: Chain,
    outgoing: Chain,
    next_sequence: u64,
}

impl RegistryState {
    fn chain(&self, direction: Direction) -> &Chain {
        match direction {
            Direction::Incoming => &self.incoming,
            Direction::Outgoing => &self.outgoing,
        }
    }

    fn chain_mut(&mut self, direction: Direction) -> &mut Chain {
        match direction {
            Direction::Incoming => &mut self.incoming,
            Direction::Outgoing => &mut self.outgoing,
        }
    }
}

/// Holds the registered middleware of both directions.
#[derive(Debug)]
pub struct MiddlewareRegistry {
    state: RwLock<RegistryState>,
}

impl MiddlewareRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState {
                incoming: Arc::from(Vec::new()),
                outgoing: Arc::from(Vec::new()),
                next_sequence: 0,
            }),
        }
    }

    /// Registers a middleware.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateMiddleware`] if the name is already
    /// taken in the definition's direction. The existing entry is kept.
    pub fn register(&self, definition: MiddlewareDefinition) -> Result<(), RegistryError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let direction = definition.direction;

        if state
            .chain(direction)
            .iter()
            .any(|entry| entry.definition.name == definition.name)
        {
            return Err(RegistryError::DuplicateMiddleware {
                name: definition.name,
                direction,
            });
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        debug!(
            name = %definition.name,
            %direction,
            priority = definition.priority,
            critical = definition.critical,
            sequence,
            "registering middleware"
        );

        let mut chain: Vec<RegisteredMiddleware> = state.chain(direction).to_vec();
        chain.push(RegisteredMiddleware {
            definition,
            sequence,
        });
        chain.sort_by_key(RegisteredMiddleware::order_key);
        *state.chain_mut(direction) = Arc::from(chain);

        Ok(())
    }

    /// Returns the ordered chain for a direction.
    #[must_use]
    pub fn list_for(&self, direction: Direction) -> Chain {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(state.chain(direction))
    }

    /// Returns the names in chain order.
    #[must_use]
    pub fn names(&self, direction: Direction) -> Vec<String> {
        self.list_for(direction)
            .iter()
            .map(|entry| entry.definition.name.clone())
            .collect()
    }

    /// Returns the total number of registered middleware.
    #[must_use]
    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.incoming.len() + state.outgoing.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MiddlewareRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::middleware::MiddlewareHandler;
    use async_trait::async_trait;
    use parley_core::Event;

    struct Noop;

    #[async_trait]
    impl MiddlewareHandler for Noop {
        async fn handle(&self, _event: &mut Event) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn def(name: &str, direction: Direction, priority: i32) -> MiddlewareDefinition {
        MiddlewareDefinition::new(name, direction, Arc::new(Noop)).with_priority(priority)
    }

    #[test]
    fn orders_by_priority() {
        let registry = MiddlewareRegistry::new();
        registry.register(def("b", Direction::Incoming, 2)).unwrap();
        registry.register(def("a", Direction::Incoming, 1)).unwrap();

        assert_eq!(registry.names(Direction::Incoming), vec!["a", "b"]);
    }

    #[test]
    fn ties_break_on_registration_order() {
        let registry = MiddlewareRegistry::new();
        registry.register(def("first", Direction::Incoming, 10)).unwrap();
        registry.register(def("early", Direction::Incoming, 0)).unwrap();
        registry.register(def("second", Direction::Incoming, 10)).unwrap();
        registry.register(def("third", Direction::Incoming, 10)).unwrap();

        assert_eq!(
            registry.names(Direction::Incoming),
            vec!["early", "first", "second", "third"]
        );
    }

    #[test]
    fn order_matches_sorted_keys_for_any_interleaving() {
        let priorities = [3, -1, 3, 0, 7, -1, 0, 3, 2];
        let registry = MiddlewareRegistry::new();
        for (i, priority) in priorities.iter().enumerate() {
            let direction = if i % 2 == 0 {
                Direction::Incoming
            } else {
                Direction::Outgoing
            };
            registry
                .register(def(&format!("m{i}"), direction, *priority))
                .unwrap();
        }

        for direction in [Direction::Incoming, Direction::Outgoing] {
            let chain = registry.list_for(direction);
            let keys: Vec<_> = chain.iter().map(RegisteredMiddleware::order_key).collect();
            let mut sorted = keys.clone();
            sorted.sort();
            assert_eq!(keys, sorted);
        }
        assert_eq!(registry.len(), priorities.len());
    }

    #[test]
    fn duplicate_name_is_rejected_and_original_kept() {
        let registry = MiddlewareRegistry::new();
        registry
            .register(def("auth", Direction::Incoming, 1).with_description("original"))
            .unwrap();

        let err = registry
            .register(def("auth", Direction::Incoming, 50).with_description("replacement"))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateMiddleware {
                name: "auth".to_string(),
                direction: Direction::Incoming,
            }
        );

        let chain = registry.list_for(Direction::Incoming);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].definition.description, "original");
    }

    #[test]
    fn same_name_allowed_in_other_direction() {
        let registry = MiddlewareRegistry::new();
        registry.register(def("log", Direction::Incoming, 1)).unwrap();
        registry.register(def("log", Direction::Outgoing, 1)).unwrap();

        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_registration() {
        let registry = MiddlewareRegistry::new();
        registry.register(def("a", Direction::Incoming, 1)).unwrap();
        let snapshot = registry.list_for(Direction::Incoming);

        registry.register(def("b", Direction::Incoming, 0)).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.list_for(Direction::Incoming).len(), 2);
    }

    #[test]
    fn empty_registry() {
        let registry = MiddlewareRegistry::default();
        assert!(registry.is_empty());
        assert!(registry.list_for(Direction::Outgoing).is_empty());
    }
}

//! Flow definitions.
//!
//! A flow is a named directed graph of nodes. Each node has ordered entry
//! actions and ordered transitions; a transition's condition is evaluated
//! against the incoming event and the session context.
//!
//! Flows are validated when built or deserialized. A [`Flow`] value always
//! satisfies:
//! - the start node is declared
//! - node names are unique
//! - every transition target and the fallback node are declared
//! - end nodes have no transitions

use crate::action::ActionRef;
use crate::condition::Condition;
use crate::error::FlowValidationError;
use crate::session::SessionContext;
use parley_core::Event;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// The role of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Runs its entry actions and evaluates transitions.
    #[default]
    Standard,
    /// Ends the conversation; declares no transitions.
    End,
}

/// A conditional edge to another node of the same flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub condition: Condition,
    /// Target node name.
    #[serde(alias = "target_node")]
    pub target: String,
}

/// A conversational state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default, alias = "type")]
    pub kind: NodeKind,
    /// Run in order each time the node processes an event.
    #[serde(default)]
    pub entry_actions: Vec<ActionRef>,
    /// Evaluated in order; the first match wins.
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

impl Node {
    /// Creates a standard node.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Standard,
            entry_actions: Vec::new(),
            transitions: Vec::new(),
        }
    }

    /// Creates an end node.
    #[must_use]
    pub fn end(name: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::End,
            ..Self::new(name)
        }
    }

    /// Appends an entry action.
    #[must_use]
    pub fn with_entry(mut self, action: ActionRef) -> Self {
        self.entry_actions.push(action);
        self
    }

    /// Appends a transition.
    #[must_use]
    pub fn with_transition(mut self, condition: Condition, target: impl Into<String>) -> Self {
        self.transitions.push(Transition {
            condition,
            target: target.into(),
        });
        self
    }

    /// Returns the first transition whose condition holds.
    #[must_use]
    pub fn first_match(&self, event: &Event, context: &SessionContext) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|t| t.condition.evaluate(event, context))
    }
}

/// Unvalidated flow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    pub start_node: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Node to move to when a session's node no longer resolves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_node: Option<String>,
}

impl FlowDefinition {
    /// Starts a definition with no nodes.
    #[must_use]
    pub fn new(name: impl Into<String>, start_node: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_node: start_node.into(),
            nodes: Vec::new(),
            fallback_node: None,
        }
    }

    /// Appends a node.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Sets the node sessions fall back to when their node is gone.
    #[must_use]
    pub fn with_fallback(mut self, node: impl Into<String>) -> Self {
        self.fallback_node = Some(node.into());
        self
    }

    /// Validates the definition.
    ///
    /// # Errors
    ///
    /// Returns the first [`FlowValidationError`] found.
    pub fn build(self) -> Result<Flow, FlowValidationError> {
        Flow::try_from(self)
    }
}

/// A validated flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "FlowDefinition", into = "FlowDefinition")]
pub struct Flow {
    definition: FlowDefinition,
    /// Node weights are positions in `definition.nodes`, edge weights are
    /// transition positions within the source node.
    graph: DiGraph<usize, usize>,
    node_index_map: HashMap<String, NodeIndex>,
}

impl Flow {
    /// Parses and validates a JSON flow document.
    ///
    /// # Errors
    ///
    /// Returns [`FlowValidationError::Malformed`] if the JSON does not parse,
    /// or the validation error of the parsed definition.
    pub fn from_json(json: &str) -> Result<Self, FlowValidationError> {
        let definition: FlowDefinition =
            serde_json::from_str(json).map_err(|e| FlowValidationError::Malformed {
                reason: e.to_string(),
            })?;
        definition.build()
    }

    /// The flow's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The node new sessions start on.
    #[must_use]
    pub fn start_node(&self) -> &str {
        &self.definition.start_node
    }

    /// The flow-level fallback node, if declared.
    #[must_use]
    pub fn fallback_node(&self) -> Option<&str> {
        self.definition.fallback_node.as_deref()
    }

    /// The validated definition.
    #[must_use]
    pub fn definition(&self) -> &FlowDefinition {
        &self.definition
    }

    /// Looks up a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&Node> {
        let index = self.node_index_map.get(name)?;
        self.node_at(*index)
    }

    /// Whether the flow has a node named `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.node_index_map.contains_key(name)
    }

    /// Returns all nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.definition.nodes.iter()
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns nodes that have no outgoing transitions.
    ///
    /// A session that reaches one of these stays there until it is moved
    /// from outside the flow.
    pub fn terminal_nodes(&self) -> Vec<&Node> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .filter_map(|idx| self.node_at(idx))
            .collect()
    }

    /// Returns the distinct nodes reachable in one transition from `name`,
    /// in transition order.
    pub fn successors(&self, name: &str) -> Vec<&Node> {
        let Some(&index) = self.node_index_map.get(name) else {
            return Vec::new();
        };

        let mut edges: Vec<(usize, NodeIndex)> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| (*edge.weight(), edge.target()))
            .collect();
        edges.sort_unstable_by_key(|(position, _)| *position);

        let mut seen = HashSet::new();
        edges
            .into_iter()
            .filter(|(_, target)| seen.insert(*target))
            .filter_map(|(_, target)| self.node_at(target))
            .collect()
    }

    fn node_at(&self, index: NodeIndex) -> Option<&Node> {
        let position = self.graph.node_weight(index)?;
        self.definition.nodes.get(*position)
    }
}

impl TryFrom<FlowDefinition> for Flow {
    type Error = FlowValidationError;

    fn try_from(definition: FlowDefinition) -> Result<Self, Self::Error> {
        if definition.name.trim().is_empty() {
            return Err(FlowValidationError::EmptyName);
        }
        let flow_name = definition.name.clone();

        let mut graph = DiGraph::new();
        let mut node_index_map = HashMap::new();
        for (position, node) in definition.nodes.iter().enumerate() {
            if node_index_map.contains_key(&node.name) {
                return Err(FlowValidationError::DuplicateNode {
                    flow: flow_name,
                    node: node.name.clone(),
                });
            }
            node_index_map.insert(node.name.clone(), graph.add_node(position));
        }

        if !node_index_map.contains_key(&definition.start_node) {
            return Err(FlowValidationError::MissingStartNode {
                flow: flow_name,
                node: definition.start_node.clone(),
            });
        }

        for node in &definition.nodes {
            if node.kind == NodeKind::End && !node.transitions.is_empty() {
                return Err(FlowValidationError::TransitionFromEnd {
                    flow: flow_name,
                    node: node.name.clone(),
                });
            }
            let source = node_index_map[&node.name];
            for (position, transition) in node.transitions.iter().enumerate() {
                let Some(&target) = node_index_map.get(&transition.target) else {
                    return Err(FlowValidationError::DanglingTransition {
                        flow: flow_name,
                        from: node.name.clone(),
                        target: transition.target.clone(),
                    });
                };
                graph.add_edge(source, target, position);
            }
        }

        if let Some(fallback) = &definition.fallback_node {
            if !node_index_map.contains_key(fallback) {
                return Err(FlowValidationError::DanglingFallback {
                    flow: flow_name,
                    node: fallback.clone(),
                });
            }
        }

        Ok(Self {
            definition,
            graph,
            node_index_map,
        })
    }
}

impl From<Flow> for FlowDefinition {
    fn from(flow: Flow) -> Self {
        flow.definition
    }
}

impl PartialEq for Flow {
    fn eq(&self, other: &Self) -> bool {
        self.definition == other.definition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn greeting_flow() -> FlowDefinition {
        FlowDefinition::new("main", "start")
            .with_node(
                Node::new("start")
                    .with_transition(Condition::text("hello"), "greet")
                    .with_transition(Condition::text("bye"), "done"),
            )
            .with_node(
                Node::new("greet")
                    .with_entry(ActionRef::say("Hi!"))
                    .with_transition(Condition::text("bye"), "done"),
            )
            .with_node(Node::end("done"))
    }

    #[test]
    fn builds_valid_flow() {
        let flow = greeting_flow().build().unwrap();

        assert_eq!(flow.name(), "main");
        assert_eq!(flow.start_node(), "start");
        assert_eq!(flow.node_count(), 3);
        assert!(flow.contains("greet"));
        assert_eq!(flow.node("greet").unwrap().entry_actions.len(), 1);
        assert!(flow.node("missing").is_none());
    }

    #[test]
    fn terminal_and_successor_queries() {
        let flow = greeting_flow().build().unwrap();

        let terminals: Vec<_> = flow.terminal_nodes().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(terminals, vec!["done"]);

        let next: Vec<_> = flow.successors("start").iter().map(|n| n.name.as_str()).collect();
        assert_eq!(next, vec!["greet", "done"]);
        assert!(flow.successors("nowhere").is_empty());
    }

    #[test]
    fn successors_are_distinct() {
        let flow = FlowDefinition::new("f", "a")
            .with_node(
                Node::new("a")
                    .with_transition(Condition::text("x"), "b")
                    .with_transition(Condition::text("y"), "b"),
            )
            .with_node(Node::new("b"))
            .build()
            .unwrap();

        assert_eq!(flow.successors("a").len(), 1);
    }

    #[test]
    fn rejects_missing_start_node() {
        let err = FlowDefinition::new("main", "nope")
            .with_node(Node::new("start"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            FlowValidationError::MissingStartNode {
                flow: "main".to_string(),
                node: "nope".to_string(),
            }
        );
    }

    #[test]
    fn rejects_duplicate_nodes() {
        let err = FlowDefinition::new("main", "start")
            .with_node(Node::new("start"))
            .with_node(Node::new("start"))
            .build()
            .unwrap_err();
        assert!(matches!(err, FlowValidationError::DuplicateNode { .. }));
    }

    #[test]
    fn rejects_dangling_transition() {
        let err = FlowDefinition::new("main", "start")
            .with_node(Node::new("start").with_transition(Condition::Always, "ghost"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            FlowValidationError::DanglingTransition {
                flow: "main".to_string(),
                from: "start".to_string(),
                target: "ghost".to_string(),
            }
        );
    }

    #[test]
    fn rejects_dangling_fallback() {
        let err = greeting_flow().with_fallback("ghost").build().unwrap_err();
        assert!(matches!(err, FlowValidationError::DanglingFallback { .. }));

        let ok = greeting_flow().with_fallback("start").build().unwrap();
        assert_eq!(ok.fallback_node(), Some("start"));
    }

    #[test]
    fn rejects_transitions_from_end_nodes() {
        let err = FlowDefinition::new("main", "start")
            .with_node(Node::end("start").with_transition(Condition::Always, "start"))
            .build()
            .unwrap_err();
        assert!(matches!(err, FlowValidationError::TransitionFromEnd { .. }));
    }

    #[test]
    fn rejects_empty_name() {
        let err = FlowDefinition::new(" ", "start")
            .with_node(Node::new("start"))
            .build()
            .unwrap_err();
        assert_eq!(err, FlowValidationError::EmptyName);
    }

    #[test]
    fn parses_json_document() {
        let doc = json!({
            "name": "main",
            "start_node": "start",
            "fallback_node": "start",
            "nodes": [
                {
                    "name": "start",
                    "entry_actions": [{"name": "say", "args": "Welcome"}],
                    "transitions": [
                        {"condition": {"type": "text_matches", "pattern": "^hel+o$"}, "target_node": "greet"}
                    ]
                },
                {"name": "greet", "type": "end"}
            ]
        });

        let flow = Flow::from_json(&doc.to_string()).unwrap();

        assert_eq!(flow.node("greet").unwrap().kind, NodeKind::End);
        assert_eq!(flow.node("start").unwrap().transitions[0].target, "greet");

        let round_trip: Flow =
            serde_json::from_value(serde_json::to_value(&flow).unwrap()).unwrap();
        assert_eq!(round_trip, flow);
    }

    #[test]
    fn invalid_json_documents_are_load_errors() {
        let err = Flow::from_json("{").unwrap_err();
        assert!(matches!(err, FlowValidationError::Malformed { .. }));

        let dangling = json!({
            "name": "main",
            "start_node": "start",
            "nodes": [{"name": "start", "transitions": [{"condition": {"type": "always"}, "target": "x"}]}]
        });
        let err = Flow::from_json(&dangling.to_string()).unwrap_err();
        assert!(matches!(err, FlowValidationError::DanglingTransition { .. }));

        // Validation also runs through plain deserialization.
        assert!(serde_json::from_value::<Flow>(dangling).is_err());
    }
}

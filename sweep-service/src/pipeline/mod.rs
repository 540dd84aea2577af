// Pipeline Module
// Named nodes plus the connections between their ports

pub mod graph;

pub use graph::{Connection, GraphError, GraphErrorKind, NodeGraph};

use crate::node::{Node, PortRef};
use crate::params::{BindingWarning, ParamError, ParamGroup, Value};

use std::collections::BTreeMap;
use std::sync::OnceLock;

/// A set of named nodes wired into a dependency graph
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    nodes: BTreeMap<String, Node>,
    connections: Vec<Connection>,
    graph: OnceLock<NodeGraph>,
}

impl Pipeline {
    /// Create a pipeline from explicitly constructed nodes
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Result<Self, GraphError> {
        let mut map = BTreeMap::new();
        for node in nodes {
            if map.contains_key(&node.name) {
                return Err(GraphError::duplicate_node(format!(
                    "node '{}' is defined more than once",
                    node.name
                )));
            }
            map.insert(node.name.clone(), node);
        }

        Ok(Self {
            nodes: map,
            connections: Vec::new(),
            graph: OnceLock::new(),
        })
    }

    /// Record a directed edge from `src` into the input port `dst`
    pub fn connect(&mut self, src: PortRef, dst: PortRef) -> Result<(), GraphError> {
        self.check_port(&src)?;
        self.check_port(&dst)?;

        if !dst.is_input() {
            return Err(GraphError::invalid_connection(format!(
                "cannot connect '{}' to '{}': destination must be an input port",
                src, dst
            )));
        }
        if src == dst {
            return Err(GraphError::cyclic(format!("port '{}' connected to itself", src)));
        }
        if src.is_output() && src.node == dst.node {
            return Err(GraphError::cyclic(format!(
                "circular dependency detected between nodes: {} -> {}",
                src.node, dst.node
            )));
        }
        if let Some(existing) = self.inbound(&dst) {
            return Err(GraphError::double_connection(format!(
                "input '{}' is already connected to '{}'",
                dst, existing.src
            )));
        }

        tracing::debug!(src = %src, dst = %dst, "connecting ports");
        self.connections.push(Connection { src, dst });
        self.graph = OnceLock::new();
        Ok(())
    }

    /// Connect the primary output of `src_node` into `dst`
    pub fn connect_primary(&mut self, src_node: &str, dst: PortRef) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get(src_node)
            .ok_or_else(|| GraphError::unknown_node(format!("unknown node '{}'", src_node)))?;
        let src = node.primary_output().ok_or_else(|| {
            GraphError::unknown_port(format!("node '{}' has no primary output", src_node))
        })?;
        self.connect(src, dst)
    }

    /// Build the dependency graph, reusing it until the wiring changes
    pub fn build_graph(&self) -> Result<&NodeGraph, GraphError> {
        if let Some(graph) = self.graph.get() {
            return Ok(graph);
        }
        let graph = NodeGraph::build(&self.nodes, &self.connections)?;
        Ok(self.graph.get_or_init(|| graph))
    }

    /// Validate the wiring and collect binding warnings
    pub fn validate(&self) -> Result<Vec<BindingWarning>, GraphError> {
        self.build_graph()?;
        Ok(self.unbound_inputs())
    }

    /// Inputs with no value and no inbound connection
    pub fn unbound_inputs(&self) -> Vec<BindingWarning> {
        self.nodes
            .values()
            .flat_map(|node| {
                node.groups
                    .unbound_in_paths()
                    .filter(|key| self.inbound(&node.input(*key)).is_none())
                    .map(|key| BindingWarning::unbound_in_path(Some(node.name.as_str()), key))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// The edge feeding an input port, if any
    pub fn inbound(&self, dst: &PortRef) -> Option<&Connection> {
        self.connections.iter().find(|conn| &conn.dst == dst)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Nodes in name order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Overwrite one parameter; the wiring is untouched
    pub fn set_param(
        &mut self,
        node: &str,
        param: &str,
        value: Value,
    ) -> Result<ParamGroup, ParamError> {
        let target = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| ParamError::UnknownParam {
                node: node.to_string(),
                param: param.to_string(),
            })?;
        target.set_param(param, value)
    }

    fn check_port(&self, port: &PortRef) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get(&port.node)
            .ok_or_else(|| GraphError::unknown_node(format!("unknown node '{}'", port.node)))?;
        if !node.has_port(port) {
            return Err(GraphError::unknown_port(format!(
                "node '{}' has no port '{}'",
                port.node, port
            )));
        }
        Ok(())
    }
}

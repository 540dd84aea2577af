// Node Dependency Graph
// Validates port connections and derives execution ordering between nodes

use crate::node::{Node, PortRef};

use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;

/// Error type for graph operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphError {
    pub message: String,
    pub kind: GraphErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// Circular dependency detected
    CyclicDependency,
    /// Reference to a node that is not part of the pipeline
    UnknownNode,
    /// Reference to a port the node does not declare
    UnknownPort,
    /// Second inbound edge into one input port
    DoubleConnection,
    /// Two nodes share a name
    DuplicateNode,
    /// Edge that does not end in an input port
    InvalidConnection,
    /// Input with neither a value nor a connection
    UnboundInput,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    fn new(kind: GraphErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn cyclic(message: impl Into<String>) -> Self {
        Self::new(GraphErrorKind::CyclicDependency, message)
    }

    pub fn unknown_node(message: impl Into<String>) -> Self {
        Self::new(GraphErrorKind::UnknownNode, message)
    }

    pub fn unknown_port(message: impl Into<String>) -> Self {
        Self::new(GraphErrorKind::UnknownPort, message)
    }

    pub fn double_connection(message: impl Into<String>) -> Self {
        Self::new(GraphErrorKind::DoubleConnection, message)
    }

    pub fn duplicate_node(message: impl Into<String>) -> Self {
        Self::new(GraphErrorKind::DuplicateNode, message)
    }

    pub fn invalid_connection(message: impl Into<String>) -> Self {
        Self::new(GraphErrorKind::InvalidConnection, message)
    }

    pub fn unbound_input(message: impl Into<String>) -> Self {
        Self::new(GraphErrorKind::UnboundInput, message)
    }
}

/// Directed edge into an input port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub src: PortRef,
    pub dst: PortRef,
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// Validated dependency structure of a pipeline
#[derive(Debug, Clone)]
pub struct NodeGraph {
    /// Upstream nodes each node waits on
    dependencies: BTreeMap<String, BTreeSet<String>>,
    /// Where each connected input ultimately gets its value
    sources: BTreeMap<PortRef, PortRef>,
    order: Vec<String>,
}

impl NodeGraph {
    /// Build and validate the graph for a set of nodes and connections
    pub fn build(
        nodes: &BTreeMap<String, Node>,
        connections: &[Connection],
    ) -> Result<Self, GraphError> {
        let mut inbound: BTreeMap<&PortRef, &PortRef> = BTreeMap::new();
        for conn in connections {
            check_port(nodes, &conn.src)?;
            check_port(nodes, &conn.dst)?;
            if !conn.dst.is_input() {
                return Err(GraphError::invalid_connection(format!(
                    "connection '{}' must end in an input port",
                    conn
                )));
            }
            if let Some(existing) = inbound.insert(&conn.dst, &conn.src) {
                return Err(GraphError::double_connection(format!(
                    "input '{}' is already connected to '{}'",
                    conn.dst, existing
                )));
            }
        }

        let mut sources = BTreeMap::new();
        for dst in inbound.keys() {
            let root = resolve_source(&inbound, dst)?;
            sources.insert((*dst).clone(), root);
        }

        let mut dependencies: BTreeMap<String, BTreeSet<String>> = nodes
            .keys()
            .map(|name| (name.clone(), BTreeSet::new()))
            .collect();
        for (dst, src) in &sources {
            if src.is_output() {
                if let Some(deps) = dependencies.get_mut(&dst.node) {
                    deps.insert(src.node.clone());
                }
            }
        }

        detect_cycles(&dependencies)?;
        let order = topological_order(&dependencies);

        Ok(Self {
            dependencies,
            sources,
            order,
        })
    }

    /// Node names, every node after all of its dependencies
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Nodes that can run in parallel, grouped by depth
    pub fn parallel_levels(&self) -> Vec<Vec<&str>> {
        let mut levels: Vec<Vec<&str>> = Vec::new();
        let mut assigned: BTreeMap<&str, usize> = BTreeMap::new();

        for name in &self.order {
            let level = self
                .dependencies(name)
                .filter_map(|dep| assigned.get(dep))
                .max()
                .map(|l| l + 1)
                .unwrap_or(0);

            assigned.insert(name, level);

            if level >= levels.len() {
                levels.resize(level + 1, Vec::new());
            }
            levels[level].push(name);
        }

        levels
    }

    /// Direct upstream nodes of `node`
    pub fn dependencies<'a>(&'a self, node: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.dependencies
            .get(node)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    /// Direct downstream nodes of `node`
    pub fn dependents<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.dependencies
            .iter()
            .filter(move |(_, deps)| deps.contains(node))
            .map(|(name, _)| name.as_str())
    }

    /// Resolved source of a connected input port.
    ///
    /// Input-to-input connections are followed to their root, which is
    /// either an upstream output or an input that holds the shared value.
    pub fn source_of(&self, input: &PortRef) -> Option<&PortRef> {
        self.sources.get(input)
    }
}

fn check_port(nodes: &BTreeMap<String, Node>, port: &PortRef) -> Result<(), GraphError> {
    let node = nodes
        .get(&port.node)
        .ok_or_else(|| GraphError::unknown_node(format!("unknown node '{}' in '{}'", port.node, port)))?;
    if !node.has_port(port) {
        return Err(GraphError::unknown_port(format!(
            "node '{}' has no port '{}'",
            port.node, port
        )));
    }
    Ok(())
}

/// Follow input-to-input aliases until an output or an unconnected input
fn resolve_source(
    inbound: &BTreeMap<&PortRef, &PortRef>,
    start: &PortRef,
) -> Result<PortRef, GraphError> {
    let mut chain = vec![start.to_string()];
    let mut seen: HashSet<&PortRef> = HashSet::new();
    seen.insert(start);

    let mut current = match inbound.get(start) {
        Some(src) => *src,
        None => return Ok(start.clone()),
    };

    loop {
        chain.push(current.to_string());
        if current.is_output() {
            return Ok(current.clone());
        }
        if !seen.insert(current) {
            return Err(GraphError::cyclic(format!(
                "circular input connection: {}",
                chain.join(" -> ")
            )));
        }
        match inbound.get(current) {
            Some(src) => current = *src,
            None => return Ok(current.clone()),
        }
    }
}

/// Detect cycles in node dependencies using DFS
fn detect_cycles(dependencies: &BTreeMap<String, BTreeSet<String>>) -> Result<(), GraphError> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();

    for name in dependencies.keys() {
        if !visited.contains(name.as_str()) {
            if let Some(cycle) = dfs_cycle(dependencies, name, &mut visited, &mut rec_stack) {
                return Err(GraphError::cyclic(format!(
                    "circular dependency detected between nodes: {}",
                    cycle.join(" -> ")
                )));
            }
        }
    }

    Ok(())
}

fn dfs_cycle<'a>(
    dependencies: &'a BTreeMap<String, BTreeSet<String>>,
    name: &'a str,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(name);
    rec_stack.insert(name);

    if let Some(deps) = dependencies.get(name) {
        for dep in deps {
            if !visited.contains(dep.as_str()) {
                if let Some(mut cycle) = dfs_cycle(dependencies, dep, visited, rec_stack) {
                    cycle.insert(0, name.to_string());
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep.as_str()) {
                return Some(vec![name.to_string(), dep.clone()]);
            }
        }
    }

    rec_stack.remove(name);
    None
}

/// Kahn's algorithm; ties are broken by node name
fn topological_order(dependencies: &BTreeMap<String, BTreeSet<String>>) -> Vec<String> {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut adj_list: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (name, deps) in dependencies {
        in_degree.entry(name).or_insert(0);
        adj_list.entry(name).or_default();
        for dep in deps {
            adj_list.entry(dep.as_str()).or_default().push(name);
            *in_degree.entry(name).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&name, _)| name)
        .collect();

    let mut result = Vec::with_capacity(dependencies.len());

    while let Some(name) = queue.pop_front() {
        result.push(name.to_string());

        if let Some(neighbors) = adj_list.get(name) {
            for &neighbor in neighbors {
                if let Some(deg) = in_degree.get_mut(neighbor) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(neighbor);
                    }
                }
            }
        }
    }

    result
}

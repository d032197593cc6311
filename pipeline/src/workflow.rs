//! Workflow graphs: nodes joined by output-to-input connections.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Result, anyhow};

use crate::core::expand::{Expansion, Instance, Iterable, expand};
use crate::core::graph;
use crate::node::Node;

/// Data flowing from `source.output` into `target.input`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Connection {
    pub source: String,
    pub output: String,
    pub target: String,
    pub input: String,
}

#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    /// Parent of the workflow directory.
    pub base_dir: PathBuf,
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            base_dir: base_dir.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if !is_valid_name(&node.name) {
            return Err(anyhow!(
                "invalid node name '{}': use letters, digits, '_' or '-'",
                node.name
            ));
        }
        if self.node(&node.name).is_some() {
            return Err(anyhow!("duplicate node '{}'", node.name));
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn connect(&mut self, source: &str, output: &str, target: &str, input: &str) -> Result<()> {
        let connection = Connection {
            source: source.to_string(),
            output: output.to_string(),
            target: target.to_string(),
            input: input.to_string(),
        };
        if let Some(err) = self.check_connection(&connection) {
            return Err(anyhow!(err));
        }
        if self
            .connections
            .iter()
            .any(|existing| existing.target == target && existing.input == input)
        {
            return Err(anyhow!("input '{target}.{input}' is already connected"));
        }
        self.connections.push(connection);
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name == name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.name == name)
    }

    /// Connections feeding `target`.
    pub fn incoming(&self, target: &str) -> impl Iterator<Item = &Connection> {
        self.connections
            .iter()
            .filter(move |connection| connection.target == target)
    }

    /// Node-level edges, deduplicated.
    pub fn node_edges(&self) -> Vec<(String, String)> {
        let edges: BTreeSet<(String, String)> = self
            .connections
            .iter()
            .map(|connection| (connection.source.clone(), connection.target.clone()))
            .collect();
        edges.into_iter().collect()
    }

    pub fn validate(&self) -> Result<()> {
        let errors = validate_workflow(self);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "workflow '{}' is invalid: {}",
                self.name,
                errors.join("; ")
            ))
        }
    }

    pub fn expand(&self, parameterize_dirs: bool) -> Result<Expansion> {
        let nodes: Vec<(&str, &[Iterable])> = self
            .nodes
            .iter()
            .map(|node| (node.name.as_str(), node.iterables.as_slice()))
            .collect();
        expand(&nodes, &self.node_edges(), parameterize_dirs).map_err(|err| anyhow!(err))
    }

    /// Layers of instance ids; each layer only depends on earlier ones.
    pub fn stages(&self) -> Result<Vec<Vec<String>>> {
        Ok(self.expand(true)?.stages())
    }

    /// Graphviz rendering of the node graph.
    pub fn to_dot(&self) -> String {
        let mut dot = String::new();
        let _ = writeln!(dot, "digraph \"{}\" {{", self.name);
        let _ = writeln!(dot, "  rankdir=TB;");
        for node in &self.nodes {
            let mut label = format!("{}\\n({})", node.name, node.spec.name);
            if node.is_map_node() {
                label.push_str("\\nmap");
            }
            let shape = if node.iterables.is_empty() { "box" } else { "box3d" };
            let _ = writeln!(dot, "  \"{}\" [label=\"{}\", shape={}];", node.name, label, shape);
        }
        for connection in &self.connections {
            let _ = writeln!(
                dot,
                "  \"{}\" -> \"{}\" [label=\"{} -> {}\"];",
                connection.source, connection.target, connection.output, connection.input
            );
        }
        dot.push_str("}\n");
        dot
    }

    pub fn workflow_dir(&self) -> PathBuf {
        self.base_dir.join(&self.name)
    }

    /// `<base_dir>/<workflow>/<param dirs...>/<node>`.
    pub fn instance_dir(&self, instance: &Instance) -> PathBuf {
        let mut dir = self.workflow_dir();
        for param in &instance.param_dirs {
            dir.push(param);
        }
        dir.push(&instance.node);
        dir
    }

    fn check_connection(&self, connection: &Connection) -> Option<String> {
        let Connection {
            source,
            output,
            target,
            input,
        } = connection;
        let Some(from) = self.node(source) else {
            return Some(format!("connection from unknown node '{source}'"));
        };
        let Some(to) = self.node(target) else {
            return Some(format!("connection to unknown node '{target}'"));
        };
        if source == target {
            return Some(format!("node '{source}' cannot connect to itself"));
        }
        if from.spec.output(output).is_none() {
            return Some(format!(
                "node '{source}' ({}) has no output '{output}'",
                from.spec.name
            ));
        }
        if to.spec.input(input).is_none() {
            return Some(format!(
                "node '{target}' ({}) has no input '{input}'",
                to.spec.name
            ));
        }
        None
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
}

/// Every problem with the graph, in a stable order.
pub fn validate_workflow(workflow: &Workflow) -> Vec<String> {
    let mut errors = Vec::new();
    if !is_valid_name(&workflow.name) {
        errors.push(format!("invalid workflow name '{}'", workflow.name));
    }

    let mut seen = BTreeSet::new();
    for node in &workflow.nodes {
        if !is_valid_name(&node.name) {
            errors.push(format!("invalid node name '{}'", node.name));
        }
        if !seen.insert(node.name.as_str()) {
            errors.push(format!("duplicate node '{}'", node.name));
        }
        for (name, value) in &node.inputs {
            if let Some(err) = node.check_input(name, value) {
                errors.push(format!("node '{}': {}", node.name, err));
            }
        }
        for field in &node.map_fields {
            if node.spec.input(field).is_none() {
                errors.push(format!(
                    "node '{}': map field '{}' is not an input of {}",
                    node.name, field, node.spec.name
                ));
            }
        }
        for iterable in &node.iterables {
            if iterable.values.is_empty() {
                errors.push(format!(
                    "node '{}': iterable '{}' has no values",
                    node.name, iterable.field
                ));
            }
            for value in &iterable.values {
                if let Some(err) = node.check_input(&iterable.field, value) {
                    errors.push(format!("node '{}': iterable {}", node.name, err));
                }
            }
            if workflow
                .incoming(&node.name)
                .any(|connection| connection.input == iterable.field)
            {
                errors.push(format!(
                    "node '{}': iterable field '{}' is also connected",
                    node.name, iterable.field
                ));
            }
        }
    }

    let mut targets = BTreeSet::new();
    for connection in &workflow.connections {
        if let Some(err) = workflow.check_connection(connection) {
            errors.push(err);
        }
        if !targets.insert((connection.target.as_str(), connection.input.as_str())) {
            errors.push(format!(
                "input '{}.{}' is connected more than once",
                connection.target, connection.input
            ));
        }
    }

    let names: Vec<String> = workflow.nodes.iter().map(|node| node.name.clone()).collect();
    if let Err(stuck) = graph::stages(&names, &workflow.node_edges()) {
        errors.push(format!("workflow has a cycle through [{}]", stuck.join(", ")));
    }
    errors
}

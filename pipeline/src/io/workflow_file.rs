//! Workflow documents (TOML).
//!
//! ```toml
//! name = "preproc"
//! base_dir = "work"
//! interfaces = ["interfaces"]
//!
//! [[nodes]]
//! name = "strip"
//! interface = "fsl.bet"
//! inputs = { in_file = "data/t1.nii.gz", mask = true }
//! iterables = [{ field = "frac", values = [0.3, 0.5] }]
//!
//! [[connections]]
//! from = "strip.out_file"
//! to = "smooth.in_file"
//! ```
//!
//! Relative `base_dir`, interface paths and must-exist path inputs resolve
//! against the document's directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::expand::Iterable;
use crate::io::inputs::{absolutize_field, absolutize_inputs};
use crate::io::interface_store::InterfaceRegistry;
use crate::node::Node;
use crate::value::Value;
use crate::workflow::Workflow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDocument {
    pub name: String,
    /// Defaults to the document's directory.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    /// Extra interface definition files or directories.
    #[serde(default)]
    pub interfaces: Vec<PathBuf>,
    #[serde(default)]
    pub nodes: Vec<NodeDocument>,
    #[serde(default)]
    pub connections: Vec<ConnectionDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDocument {
    pub name: String,
    pub interface: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub iterables: Vec<Iterable>,
    #[serde(default)]
    pub map_over: Vec<String>,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionDocument {
    /// `node.output`
    pub from: String,
    /// `node.input`
    pub to: String,
}

/// Read a workflow document, load the interfaces it names into `registry`,
/// and build a validated [`Workflow`].
pub fn load_workflow(path: &Path, registry: &mut InterfaceRegistry) -> Result<Workflow> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read workflow {}", path.display()))?;
    let doc: WorkflowDocument =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    let base = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let base = base
        .canonicalize()
        .with_context(|| format!("resolve {}", base.display()))?;
    build_workflow(doc, &base, registry).with_context(|| format!("load workflow {}", path.display()))
}

/// Turn a parsed document into a workflow, resolving paths against `base`.
pub fn build_workflow(
    doc: WorkflowDocument,
    base: &Path,
    registry: &mut InterfaceRegistry,
) -> Result<Workflow> {
    for extra in &doc.interfaces {
        let location = base.join(extra);
        if location.is_dir() {
            registry.load_dir(&location)?;
        } else {
            registry.load_file(&location)?;
        }
    }

    let base_dir = doc
        .base_dir
        .map_or_else(|| base.to_path_buf(), |dir| base.join(dir));
    let mut workflow = Workflow::new(doc.name, base_dir);

    for node_doc in doc.nodes {
        let spec = registry.get(&node_doc.interface).ok_or_else(|| {
            anyhow!(
                "node '{}': unknown interface '{}'",
                node_doc.name,
                node_doc.interface
            )
        })?;
        let mut node = Node::new(node_doc.name, spec);
        node.inputs = absolutize_inputs(&node.spec, &node_doc.inputs, base);
        node.iterables = node_doc
            .iterables
            .into_iter()
            .map(|iterable| resolve_iterable(&node, iterable, base))
            .collect();
        node.map_fields = node_doc.map_over;
        node.overwrite = node_doc.overwrite;
        workflow.add_node(node)?;
    }

    for connection in &doc.connections {
        let (source, output) = split_endpoint(&connection.from)?;
        let (target, input) = split_endpoint(&connection.to)?;
        workflow.connect(source, output, target, input)?;
    }

    workflow.validate()?;
    debug!(
        workflow = %workflow.name,
        nodes = workflow.nodes.len(),
        connections = workflow.connections.len(),
        "loaded workflow"
    );
    Ok(workflow)
}

fn resolve_iterable(node: &Node, iterable: Iterable, base: &Path) -> Iterable {
    let values = iterable
        .values
        .iter()
        .map(|value| absolutize_field(&node.spec, &iterable.field, value, base))
        .collect();
    Iterable {
        field: iterable.field,
        values,
    }
}

fn split_endpoint(endpoint: &str) -> Result<(&str, &str)> {
    endpoint
        .split_once('.')
        .filter(|(node, field)| !node.is_empty() && !field.is_empty())
        .ok_or_else(|| anyhow!("connection endpoint '{endpoint}' must look like 'node.field'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::interface_store::write_interface;
    use crate::test_support::{TestWorkspace, bet_like_spec};

    const DOC: &str = r#"
name = "preproc"
base_dir = "work"
interfaces = ["defs"]

[[nodes]]
name = "strip"
interface = "fsl.bet"
inputs = { in_file = "data/t1.nii.gz", mask = true }
iterables = [{ field = "frac", values = [0.3, 0.5] }]

[[nodes]]
name = "again"
interface = "fsl.bet"

[[connections]]
from = "strip.out_file"
to = "again.in_file"
"#;

    #[test]
    fn loads_nodes_connections_and_resolves_paths() {
        let workspace = TestWorkspace::new().expect("workspace");
        write_interface(&workspace.path().join("defs/bet.json"), &bet_like_spec())
            .expect("definition");
        workspace.file("data/t1.nii.gz", "img").expect("input");
        let path = workspace.file("preproc.toml", DOC).expect("doc");

        let mut registry = InterfaceRegistry::new();
        let workflow = load_workflow(&path, &mut registry).expect("load");
        let base = workspace.path().canonicalize().expect("canonical");

        assert_eq!(workflow.workflow_dir(), base.join("work/preproc"));
        let strip = workflow.node("strip").expect("strip");
        assert_eq!(strip.inputs["in_file"], Value::from(base.join("data/t1.nii.gz")));
        assert_eq!(strip.inputs["mask"], Value::Bool(true));
        assert_eq!(strip.iterables[0].values, vec![Value::Float(0.3), Value::Float(0.5)]);
        assert_eq!(workflow.connections.len(), 1);
        assert_eq!(workflow.connections[0].input, "in_file");
    }

    #[test]
    fn unknown_interfaces_and_bad_endpoints_fail() {
        let mut registry = InterfaceRegistry::new();
        registry.insert(bet_like_spec(), "test").expect("insert");

        let doc: WorkflowDocument = toml::from_str(
            "name = \"wf\"\n[[nodes]]\nname = \"a\"\ninterface = \"fsl.nope\"\n",
        )
        .expect("parse");
        let err = build_workflow(doc, Path::new("/w"), &mut registry).unwrap_err();
        assert!(err.to_string().contains("unknown interface 'fsl.nope'"));

        let doc: WorkflowDocument = toml::from_str(
            "name = \"wf\"\n[[nodes]]\nname = \"a\"\ninterface = \"fsl.bet\"\n\
             [[connections]]\nfrom = \"a\"\nto = \"a.in_file\"\n",
        )
        .expect("parse");
        let err = build_workflow(doc, Path::new("/w"), &mut registry).unwrap_err();
        assert!(err.to_string().contains("must look like 'node.field'"));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = toml::from_str::<WorkflowDocument>("name = \"wf\"\nnodez = []\n").unwrap_err();
        assert!(err.to_string().contains("nodez"));
    }
}

//! Iterable expansion of the node graph into concrete instances.
//!
//! Every node gets one instance per combination of its iterable ancestors
//! (itself included). An edge joins a downstream instance to the upstream
//! instance whose assignment is the matching projection, so diamonds stay
//! consistent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::graph::{self, ancestors};
use crate::core::hashing::sha256_hex;
use crate::value::Value;

/// Longest parameter directory name kept verbatim when dirs are not parameterized.
const MAX_PARAM_DIR_LEN: usize = 32;

/// One input swept over several values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iterable {
    pub field: String,
    pub values: Vec<Value>,
}

/// A concrete, schedulable copy of a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub id: String,
    pub node: String,
    /// Chosen combination index per iterable ancestor.
    pub assignment: BTreeMap<String, usize>,
    /// Values of the node's own iterables for this instance.
    pub overrides: BTreeMap<String, Value>,
    /// Parameter directory per iterable ancestor, outermost first.
    pub param_dirs: Vec<String>,
    /// Upstream node name to the instance id feeding this one.
    pub upstream: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expansion {
    /// Instances in topological order.
    pub instances: Vec<Instance>,
}

impl Expansion {
    pub fn get(&self, id: &str) -> Option<&Instance> {
        self.instances.iter().find(|instance| instance.id == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.instances.iter().map(|instance| instance.id.clone()).collect()
    }

    /// Instance-level edges, upstream first.
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges = Vec::new();
        for instance in &self.instances {
            for upstream in instance.upstream.values() {
                edges.push((upstream.clone(), instance.id.clone()));
            }
        }
        edges
    }

    /// Kahn layering of the instances, each stage sorted by id.
    pub fn stages(&self) -> Vec<Vec<String>> {
        graph::stages(&self.ids(), &self.edges()).unwrap_or_default()
    }
}

/// Expand `nodes` (name plus iterables) connected by node-level `edges`.
///
/// Fails with the nodes involved when the graph has a cycle.
pub fn expand(
    nodes: &[(&str, &[Iterable])],
    edges: &[(String, String)],
    parameterize_dirs: bool,
) -> Result<Expansion, String> {
    let names: Vec<String> = nodes.iter().map(|(name, _)| (*name).to_string()).collect();
    let order = graph::topological_order(&names, edges)
        .map_err(|stuck| format!("workflow has a cycle through [{}]", stuck.join(", ")))?;
    let iterables: BTreeMap<&str, &[Iterable]> = nodes.iter().copied().collect();
    let position: BTreeMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(index, name)| (name.as_str(), index))
        .collect();

    let axes_of = |name: &str| -> Vec<String> {
        let mut axes: Vec<String> = ancestors(name, edges)
            .into_iter()
            .chain([name.to_string()])
            .filter(|node| iterables.get(node.as_str()).is_some_and(|its| !its.is_empty()))
            .collect();
        axes.sort_by_key(|node| position.get(node.as_str()).copied().unwrap_or(usize::MAX));
        axes
    };

    let mut expansion = Expansion::default();
    let mut index: BTreeMap<(String, Vec<(String, usize)>), String> = BTreeMap::new();

    for name in &order {
        let axes = axes_of(name);
        let combos: Vec<Vec<Vec<(String, Value)>>> = axes
            .iter()
            .map(|axis| combinations(iterables.get(axis.as_str()).copied().unwrap_or_default()))
            .collect();
        let counts: Vec<usize> = combos.iter().map(Vec::len).collect();

        let mut parents: Vec<&String> = edges
            .iter()
            .filter(|(_, to)| to == name)
            .map(|(from, _)| from)
            .collect();
        parents.sort();
        parents.dedup();

        for (k, picks) in cartesian(&counts).into_iter().enumerate() {
            let assignment: BTreeMap<String, usize> =
                axes.iter().cloned().zip(picks.iter().copied()).collect();
            let id = if axes.is_empty() {
                name.clone()
            } else {
                format!("{name}.a{k}")
            };

            let mut overrides = BTreeMap::new();
            let mut param_dirs = Vec::new();
            for ((axis, choices), pick) in axes.iter().zip(&combos).zip(&picks) {
                let combo = &choices[*pick];
                param_dirs.push(param_dir(combo, parameterize_dirs));
                if axis == name {
                    overrides.extend(combo.iter().cloned());
                }
            }

            let mut upstream = BTreeMap::new();
            for parent in &parents {
                let projected: BTreeMap<String, usize> = axes_of(parent)
                    .into_iter()
                    .filter_map(|axis| assignment.get(&axis).map(|pick| (axis, *pick)))
                    .collect();
                let key: (String, Vec<(String, usize)>) =
                    ((*parent).clone(), projected.into_iter().collect());
                if let Some(parent_id) = index.get(&key) {
                    upstream.insert((*parent).clone(), parent_id.clone());
                }
            }

            index.insert(
                (name.clone(), assignment.clone().into_iter().collect()),
                id.clone(),
            );
            expansion.instances.push(Instance {
                id,
                node: name.clone(),
                assignment,
                overrides,
                param_dirs,
                upstream,
            });
        }
    }

    Ok(expansion)
}

/// Cartesian product of a node's iterables, first field outermost.
fn combinations(iterables: &[Iterable]) -> Vec<Vec<(String, Value)>> {
    let mut combos: Vec<Vec<(String, Value)>> = vec![Vec::new()];
    for iterable in iterables {
        let mut next = Vec::with_capacity(combos.len() * iterable.values.len());
        for prefix in &combos {
            for value in &iterable.values {
                let mut combo = prefix.clone();
                combo.push((iterable.field.clone(), value.clone()));
                next.push(combo);
            }
        }
        combos = next;
    }
    combos
}

fn cartesian(counts: &[usize]) -> Vec<Vec<usize>> {
    let mut picks: Vec<Vec<usize>> = vec![Vec::new()];
    for count in counts {
        picks = picks
            .into_iter()
            .flat_map(|prefix| {
                (0..*count).map(move |i| {
                    let mut next = prefix.clone();
                    next.push(i);
                    next
                })
            })
            .collect();
    }
    picks
}

/// `_field_value` per field joined by `_`, unsafe characters replaced.
pub fn param_dir(combo: &[(String, Value)], parameterize_dirs: bool) -> String {
    let raw = combo
        .iter()
        .map(|(field, value)| format!("{field}_{}", value.render()))
        .collect::<Vec<_>>()
        .join("_");
    let name: String = format!("_{raw}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !parameterize_dirs && name.len() > MAX_PARAM_DIR_LEN {
        sha256_hex(name.as_bytes())
    } else {
        name
    }
}

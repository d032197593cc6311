//! Directed-graph helpers: Kahn layering, cycle reporting, reachability.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Layer `nodes` so every edge points from an earlier stage to a later one.
///
/// Stages are sorted by id. On a cycle, returns the sorted ids of every node
/// that could not be layered.
pub fn stages(nodes: &[String], edges: &[(String, String)]) -> Result<Vec<Vec<String>>, Vec<String>> {
    let mut in_degree: BTreeMap<&str, usize> = nodes.iter().map(|id| (id.as_str(), 0)).collect();
    let mut downstream: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for (from, to) in edges {
        if !in_degree.contains_key(from.as_str()) || !in_degree.contains_key(to.as_str()) {
            continue;
        }
        if downstream.entry(from.as_str()).or_default().insert(to.as_str())
            && let Some(degree) = in_degree.get_mut(to.as_str())
        {
            *degree += 1;
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut layers = Vec::new();
    let mut placed = 0;

    while !ready.is_empty() {
        ready.sort_unstable();
        let mut next = Vec::new();
        for id in &ready {
            for child in downstream.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(*child);
                    }
                }
            }
        }
        placed += ready.len();
        layers.push(ready.iter().map(|id| (*id).to_string()).collect());
        ready = next;
    }

    if placed < in_degree.len() {
        let stuck = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        return Err(stuck);
    }
    Ok(layers)
}

/// Flattened topological order (stage by stage).
pub fn topological_order(
    nodes: &[String],
    edges: &[(String, String)],
) -> Result<Vec<String>, Vec<String>> {
    stages(nodes, edges).map(|layers| layers.into_iter().flatten().collect())
}

/// Every node reachable from `start` (excluding `start`), sorted.
pub fn descendants(start: &str, edges: &[(String, String)]) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([start.to_string()]);
    while let Some(current) = queue.pop_front() {
        for (from, to) in edges {
            if *from == current && to != start && seen.insert(to.clone()) {
                queue.push_back(to.clone());
            }
        }
    }
    seen
}

/// Every node `start` depends on, directly or transitively.
pub fn ancestors(start: &str, edges: &[(String, String)]) -> BTreeSet<String> {
    let reversed: Vec<(String, String)> = edges
        .iter()
        .map(|(from, to)| (to.clone(), from.clone()))
        .collect();
    descendants(start, &reversed)
}

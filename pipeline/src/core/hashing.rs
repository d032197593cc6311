//! Canonical hash documents for node provenance.
//!
//! The document is built from already-computed file fingerprints so hashing
//! stays deterministic; `io::fingerprint` does the filesystem work.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::spec::InterfaceSpec;
use crate::value::Value;

/// Everything that decides whether a node must run again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashDocument {
    pub interface: String,
    pub command: String,
    /// Digest of the serialized definition; editing a definition invalidates caches.
    pub spec_digest: String,
    #[serde(default)]
    pub map_fields: Vec<String>,
    /// Hashed form of each input, keyed by name.
    pub inputs: BTreeMap<String, serde_json::Value>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Short digest of the serialized definition.
pub fn spec_digest(spec: &InterfaceSpec) -> String {
    let serialized = serde_json::to_string(spec).unwrap_or_default();
    sha256_hex(serialized.as_bytes())[..16].to_string()
}

/// Inputs that take part in the hash: user inputs plus applied defaults.
///
/// Generated names are left out; they derive from other inputs.
pub fn hashed_inputs(
    spec: &InterfaceSpec,
    inputs: &BTreeMap<String, Value>,
) -> BTreeMap<String, Value> {
    let mut hashed = inputs.clone();
    for field in &spec.inputs {
        if !hashed.contains_key(&field.name)
            && let Some(default) = field.applied_default()
        {
            hashed.insert(field.name.clone(), default.clone());
        }
    }
    hashed
}

/// Paths whose content or timestamp feeds the hash.
pub fn fingerprinted_paths(spec: &InterfaceSpec, inputs: &BTreeMap<String, Value>) -> Vec<String> {
    let mut paths = Vec::new();
    for (name, value) in inputs {
        let Some(field) = spec.input(name) else {
            continue;
        };
        if field.kind.must_exist() && field.hash_files {
            collect_paths(value, &mut paths);
        }
    }
    paths.sort();
    paths.dedup();
    paths
}

fn collect_paths(value: &Value, paths: &mut Vec<String>) {
    match value {
        Value::Str(path) => paths.push(path.clone()),
        Value::List(items) => {
            for item in items {
                collect_paths(item, paths);
            }
        }
        _ => {}
    }
}

/// Build the hash document. `fingerprints` maps each path returned by
/// [`fingerprinted_paths`] to its fingerprint.
pub fn hash_document(
    spec: &InterfaceSpec,
    inputs: &BTreeMap<String, Value>,
    map_fields: &[String],
    fingerprints: &BTreeMap<String, String>,
) -> HashDocument {
    let hashed = hashed_inputs(spec, inputs);
    let entries = hashed
        .iter()
        .map(|(name, value)| {
            let fingerprinted = spec
                .input(name)
                .is_some_and(|field| field.kind.must_exist() && field.hash_files);
            let entry = if fingerprinted {
                hashed_path_value(value, fingerprints)
            } else {
                json!(value)
            };
            (name.clone(), entry)
        })
        .collect();

    let mut map_fields = map_fields.to_vec();
    map_fields.sort();
    HashDocument {
        interface: spec.name.clone(),
        command: spec.command.clone(),
        spec_digest: spec_digest(spec),
        map_fields,
        inputs: entries,
    }
}

fn hashed_path_value(value: &Value, fingerprints: &BTreeMap<String, String>) -> serde_json::Value {
    match value {
        Value::Str(path) => json!({
            "path": path,
            "fingerprint": fingerprints.get(path).cloned().unwrap_or_default(),
        }),
        Value::List(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| hashed_path_value(item, fingerprints))
                .collect(),
        ),
        other => json!(other),
    }
}

/// SHA-256 hex digest of the canonical JSON form of `doc`.
pub fn node_hash(doc: &HashDocument) -> String {
    let canonical = serde_json::to_string(doc).unwrap_or_default();
    sha256_hex(canonical.as_bytes())
}

/// Names of the entries that differ between two documents.
pub fn diff_entries(old: &HashDocument, new: &HashDocument) -> Vec<String> {
    let mut changed = Vec::new();
    if old.interface != new.interface {
        changed.push("interface".to_string());
    }
    if old.command != new.command {
        changed.push("command".to_string());
    }
    if old.spec_digest != new.spec_digest {
        changed.push("definition".to_string());
    }
    if old.map_fields != new.map_fields {
        changed.push("map_fields".to_string());
    }
    let mut names: Vec<&String> = old.inputs.keys().chain(new.inputs.keys()).collect();
    names.sort();
    names.dedup();
    for name in names {
        if old.inputs.get(name) != new.inputs.get(name) {
            changed.push(name.clone());
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::bet_like_spec;

    fn inputs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    fn fingerprints(path: &str, print: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(path.to_string(), print.to_string())])
    }

    #[test]
    fn hash_is_stable_and_tracks_fingerprints() {
        let spec = bet_like_spec();
        let user = inputs(&[
            ("in_file", Value::from("/d/t1.nii.gz")),
            ("frac", Value::Float(0.3)),
        ]);
        let a = hash_document(&spec, &user, &[], &fingerprints("/d/t1.nii.gz", "10:1"));
        let b = hash_document(&spec, &user, &[], &fingerprints("/d/t1.nii.gz", "10:1"));
        assert_eq!(node_hash(&a), node_hash(&b));
        assert_eq!(node_hash(&a).len(), 64);

        let touched = hash_document(&spec, &user, &[], &fingerprints("/d/t1.nii.gz", "10:2"));
        assert_ne!(node_hash(&a), node_hash(&touched));
        assert_eq!(diff_entries(&a, &touched), vec!["in_file"]);
    }

    #[test]
    fn only_hashable_must_exist_paths_are_fingerprinted() {
        let spec = bet_like_spec();
        let user = inputs(&[
            ("in_file", Value::from("/d/t1.nii.gz")),
            ("out_file", Value::from("/w/o.nii.gz")),
        ]);
        assert_eq!(fingerprinted_paths(&spec, &user), vec!["/d/t1.nii.gz"]);
    }

    #[test]
    fn applied_defaults_are_hashed_and_spec_edits_invalidate() {
        let mut spec = bet_like_spec();
        let user = inputs(&[("in_file", Value::from("/d/t1.nii.gz"))]);
        let before = hash_document(&spec, &user, &[], &BTreeMap::new());

        if let Some(frac) = spec.inputs.iter_mut().find(|f| f.name == "frac") {
            frac.default = Some(Value::Float(0.5));
            frac.use_default = true;
        }
        let after = hash_document(&spec, &user, &[], &BTreeMap::new());
        assert_eq!(after.inputs["frac"], json!(0.5));
        let changed = diff_entries(&before, &after);
        assert!(changed.contains(&"definition".to_string()));
        assert!(changed.contains(&"frac".to_string()));
    }

    #[test]
    fn map_fields_change_the_hash() {
        let spec = bet_like_spec();
        let user = inputs(&[("in_file", Value::from(vec!["/a.nii", "/b.nii"]))]);
        let plain = hash_document(&spec, &user, &[], &BTreeMap::new());
        let mapped = hash_document(&spec, &user, &["in_file".to_string()], &BTreeMap::new());
        assert_ne!(node_hash(&plain), node_hash(&mapped));
    }
}

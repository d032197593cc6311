//! Interface definition load/save helpers with schema + invariant validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value as JsonValue;
use tracing::debug;
use walkdir::WalkDir;

use crate::core::invariants::validate_spec;
use crate::io::config::write_atomic;
use crate::spec::InterfaceSpec;

pub const INTERFACE_SCHEMA: &str = include_str!("../../schemas/interface.v1.schema.json");

/// Parse and validate an interface definition (schema + invariants).
///
/// `origin` names the source in error messages.
pub fn parse_interface(contents: &str, origin: &str) -> Result<InterfaceSpec> {
    let value: JsonValue =
        serde_json::from_str(contents).with_context(|| format!("parse {origin}"))?;
    validate_schema(&value).with_context(|| format!("validate {origin}"))?;
    let spec: InterfaceSpec =
        serde_json::from_value(value).with_context(|| format!("deserialize {origin}"))?;
    let errors = validate_spec(&spec);
    if !errors.is_empty() {
        return Err(anyhow!(
            "{origin}: interface invariants failed: {}",
            errors.join("; ")
        ));
    }
    Ok(spec)
}

pub fn load_interface(path: &Path) -> Result<InterfaceSpec> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read interface {}", path.display()))?;
    parse_interface(&contents, &path.display().to_string())
}

/// Write a definition with stable pretty formatting.
pub fn write_interface(path: &Path, spec: &InterfaceSpec) -> Result<()> {
    let errors = validate_spec(spec);
    if !errors.is_empty() {
        return Err(anyhow!("interface invariants failed: {}", errors.join("; ")));
    }
    let mut buf = serde_json::to_string_pretty(spec).context("serialize interface")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

fn validate_schema(value: &JsonValue) -> Result<()> {
    let schema: JsonValue =
        serde_json::from_str(INTERFACE_SCHEMA).context("parse interface schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "interface schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Known interfaces by name.
#[derive(Debug, Clone, Default)]
pub struct InterfaceRegistry {
    specs: BTreeMap<String, Arc<InterfaceSpec>>,
    origins: BTreeMap<String, String>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition; names must be unique across the registry.
    pub fn insert(&mut self, spec: InterfaceSpec, origin: &str) -> Result<Arc<InterfaceSpec>> {
        if let Some(existing) = self.origins.get(&spec.name) {
            return Err(anyhow!(
                "duplicate interface '{}' in {} (already defined in {})",
                spec.name,
                origin,
                existing
            ));
        }
        let spec = Arc::new(spec);
        self.origins.insert(spec.name.clone(), origin.to_string());
        self.specs.insert(spec.name.clone(), Arc::clone(&spec));
        Ok(spec)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<Arc<InterfaceSpec>> {
        let spec = load_interface(path)?;
        self.insert(spec, &path.display().to_string())
    }

    /// Load every `*.json` below `dir`, in path order. Returns how many were added.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut added = 0;
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walk {}", dir.display()))?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            self.load_file(path)?;
            added += 1;
        }
        debug!(dir = %dir.display(), added, "loaded interface definitions");
        Ok(added)
    }

    pub fn get(&self, name: &str) -> Option<Arc<InterfaceSpec>> {
        self.specs.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.keys().map(String::as_str).collect()
    }

    pub fn specs(&self) -> impl Iterator<Item = &Arc<InterfaceSpec>> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::bet_like_spec;

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bet.json");
        write_interface(&path, &bet_like_spec()).expect("write");
        let loaded = load_interface(&path).expect("load");
        assert_eq!(loaded, bet_like_spec());
    }

    #[test]
    fn schema_rejects_unknown_fields() {
        let raw = r#"{"name": "x", "command": "x", "inputs": [
            {"name": "a", "kind": {"type": "int"}, "argstr": "-a %d", "postion": 1}
        ]}"#;
        let err = parse_interface(raw, "x.json").unwrap_err();
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn invariants_run_after_schema() {
        let raw = r#"{"name": "x", "command": "x", "inputs": [
            {"name": "a", "kind": {"type": "int"}, "argstr": "-a", "xor": ["ghost"]}
        ]}"#;
        let err = parse_interface(raw, "x.json").unwrap_err().to_string();
        assert!(err.contains("invariants failed"));
        assert!(err.contains("unknown input 'ghost'"));
    }

    #[test]
    fn registry_loads_directories_and_rejects_duplicates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let nested = temp.path().join("fsl");
        fs::create_dir_all(&nested).expect("mkdir");
        write_interface(&nested.join("bet.json"), &bet_like_spec()).expect("write");
        fs::write(temp.path().join("notes.txt"), "ignored").expect("write notes");

        let mut registry = InterfaceRegistry::new();
        assert_eq!(registry.load_dir(temp.path()).expect("load"), 1);
        assert!(registry.get(&bet_like_spec().name).is_some());

        let err = registry.load_dir(temp.path()).unwrap_err().to_string();
        assert!(err.contains("duplicate interface"));
    }
}

//! Post-run verification that declared outputs exist.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::spec::{FieldKind, InterfaceSpec};
use crate::value::Value;

/// Check every resolved file and directory output on disk.
///
/// Missing optional outputs are dropped from the returned map; any other
/// missing output fails, naming all of them.
pub fn verify_outputs(
    spec: &InterfaceSpec,
    outputs: BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Value>> {
    let mut missing = Vec::new();
    let mut verified = BTreeMap::new();

    for (name, value) in outputs {
        let Some(field) = spec.output(&name) else {
            verified.insert(name, value);
            continue;
        };
        let mut absent = Vec::new();
        collect_missing(&field.kind, &value, &mut absent);
        if absent.is_empty() {
            verified.insert(name, value);
        } else if field.optional {
            debug!(output = %name, "optional output not produced");
        } else {
            missing.push(format!("{name} ({})", absent.join(", ")));
        }
    }

    if !missing.is_empty() {
        return Err(anyhow!(
            "{}: missing outputs: {}",
            spec.name,
            missing.join("; ")
        ));
    }
    Ok(verified)
}

/// Recorded output paths that no longer exist, regardless of `optional`.
pub fn missing_paths(spec: &InterfaceSpec, outputs: &BTreeMap<String, Value>) -> Vec<String> {
    let mut absent = Vec::new();
    for (name, value) in outputs {
        if let Some(field) = spec.output(name) {
            collect_missing(&field.kind, value, &mut absent);
        }
    }
    absent
}

fn collect_missing(kind: &FieldKind, value: &Value, absent: &mut Vec<String>) {
    match (kind, value) {
        (FieldKind::File { .. }, Value::Str(path)) if !Path::new(path).is_file() => {
            absent.push(path.clone());
        }
        (FieldKind::Directory { .. }, Value::Str(path)) if !Path::new(path).is_dir() => {
            absent.push(path.clone());
        }
        (FieldKind::List { item, .. }, Value::List(items)) => {
            for element in items {
                collect_missing(item, element, absent);
            }
        }
        // Map nodes gather scalar outputs into lists.
        (kind, Value::List(items)) => {
            for element in items {
                collect_missing(kind, element, absent);
            }
        }
        _ => {}
    }
}

//! On-disk checks for path inputs.

use std::collections::BTreeMap;
use std::path::Path;

use crate::spec::{FieldKind, InterfaceSpec};
use crate::value::Value;

/// Report every must-exist file or directory input that is missing on disk.
pub fn check_existing(spec: &InterfaceSpec, inputs: &BTreeMap<String, Value>) -> Vec<String> {
    let mut errors = Vec::new();
    for (name, value) in inputs {
        let Some(field) = spec.input(name) else {
            continue;
        };
        if field.kind.must_exist() {
            check_value(&field.kind, value, &spec.name, name, &mut errors);
        }
    }
    errors
}

fn check_value(kind: &FieldKind, value: &Value, spec: &str, name: &str, errors: &mut Vec<String>) {
    match (kind, value) {
        (FieldKind::File { exists: true }, Value::Str(path)) => {
            if !Path::new(path).is_file() {
                errors.push(format!("{spec}: input '{name}': file '{path}' does not exist"));
            }
        }
        (FieldKind::Directory { exists: true }, Value::Str(path)) => {
            if !Path::new(path).is_dir() {
                errors.push(format!(
                    "{spec}: input '{name}': directory '{path}' does not exist"
                ));
            }
        }
        (FieldKind::List { item, .. }, Value::List(items)) => {
            for element in items {
                check_value(item, element, spec, name, errors);
            }
        }
        _ => {}
    }
}

/// Make relative must-exist paths absolute against `base`.
pub fn absolutize_inputs(
    spec: &InterfaceSpec,
    inputs: &BTreeMap<String, Value>,
    base: &Path,
) -> BTreeMap<String, Value> {
    inputs
        .iter()
        .map(|(name, value)| (name.clone(), absolutize_field(spec, name, value, base)))
        .collect()
}

/// Single-value form of [`absolutize_inputs`].
pub fn absolutize_field(spec: &InterfaceSpec, name: &str, value: &Value, base: &Path) -> Value {
    match spec.input(name) {
        Some(field) if field.kind.must_exist() => absolutize(value, base),
        _ => value.clone(),
    }
}

fn absolutize(value: &Value, base: &Path) -> Value {
    match value {
        Value::Str(path) if Path::new(path).is_relative() => Value::from(base.join(path)),
        Value::List(items) => Value::List(items.iter().map(|v| absolutize(v, base)).collect()),
        other => other.clone(),
    }
}

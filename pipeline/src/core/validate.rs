//! Input validation against an interface spec.
//!
//! Checks are pure: existence of paths on disk is handled by `io::inputs`.

use std::collections::{BTreeMap, BTreeSet};

use crate::spec::{FieldKind, InputField, InterfaceSpec};
use crate::value::Value;

/// Type and constraint check of a single value.
pub fn check_value(kind: &FieldKind, value: &Value) -> Result<(), String> {
    match (kind, value) {
        (FieldKind::Bool, Value::Bool(_)) => Ok(()),
        (FieldKind::Int { min, max }, Value::Int(i)) => {
            check_range(*i as f64, min.map(|m| m as f64), max.map(|m| m as f64))
        }
        (FieldKind::Float { min, max }, Value::Int(_) | Value::Float(_)) => {
            let number = value.as_f64().unwrap_or_default();
            check_range(number, *min, *max)
        }
        (FieldKind::Str, Value::Str(_)) => Ok(()),
        (FieldKind::Enum { values }, Value::Str(s)) => {
            if values.iter().any(|allowed| allowed == s) {
                Ok(())
            } else {
                Err(format!("'{s}' is not one of [{}]", values.join(", ")))
            }
        }
        (FieldKind::File { .. } | FieldKind::Directory { .. }, Value::Str(s)) => {
            if s.trim().is_empty() {
                Err("path must not be empty".to_string())
            } else {
                Ok(())
            }
        }
        (
            FieldKind::List {
                item,
                min_len,
                max_len,
            },
            Value::List(items),
        ) => {
            if let Some(min) = min_len
                && items.len() < *min
            {
                return Err(format!("expected at least {min} item(s), got {}", items.len()));
            }
            if let Some(max) = max_len
                && items.len() > *max
            {
                return Err(format!("expected at most {max} item(s), got {}", items.len()));
            }
            for (index, element) in items.iter().enumerate() {
                check_value(item, element).map_err(|err| format!("item {index}: {err}"))?;
            }
            Ok(())
        }
        (FieldKind::Tuple { items }, Value::List(values)) => {
            if items.len() != values.len() {
                return Err(format!(
                    "expected a tuple of {} item(s), got {}",
                    items.len(),
                    values.len()
                ));
            }
            for (index, (item, element)) in items.iter().zip(values).enumerate() {
                check_value(item, element).map_err(|err| format!("item {index}: {err}"))?;
            }
            Ok(())
        }
        (kind, value) => Err(format!(
            "expected {}, got {} ({})",
            kind.label(),
            value.type_name(),
            value.render()
        )),
    }
}

fn check_range(number: f64, min: Option<f64>, max: Option<f64>) -> Result<(), String> {
    if let Some(min) = min
        && number < min
    {
        return Err(format!("{number} is below the minimum {min}"));
    }
    if let Some(max) = max
        && number > max
    {
        return Err(format!("{number} is above the maximum {max}"));
    }
    Ok(())
}

/// Check user inputs against `spec` and report every violation:
/// - Unknown field names and type errors
/// - Missing mandatory fields (defaults, generated names and xor groups satisfy them)
/// - More than one member of an xor group set
/// - Unsatisfied `requires`
pub fn check_inputs(spec: &InterfaceSpec, inputs: &BTreeMap<String, Value>) -> Vec<String> {
    let mut errors = Vec::new();

    for (name, value) in inputs {
        match spec.input(name) {
            Some(field) => {
                if let Err(err) = check_value(&field.kind, value) {
                    errors.push(format!("{}: input '{}': {}", spec.name, name, err));
                }
            }
            None => errors.push(format!("{}: unknown input '{}'", spec.name, name)),
        }
    }

    let value_of = |name: &str| -> Option<&Value> {
        inputs
            .get(name)
            .or_else(|| spec.input(name).and_then(InputField::applied_default))
    };
    // Any value satisfies `mandatory`; xor conflicts and `requires` count only truthy ones.
    let is_present = |name: &str| value_of(name).is_some();
    let is_set = |name: &str| value_of(name).is_some_and(Value::is_truthy);

    let mut reported_groups = BTreeSet::new();
    for field in &spec.inputs {
        let group = xor_group(field);
        let set_members: Vec<&str> = group.iter().copied().filter(|name| is_set(name)).collect();
        let satisfied = group.iter().any(|name| is_present(name));

        if field.mandatory && !satisfied && !field.generates_name() {
            if group.len() > 1 {
                if reported_groups.insert(group.clone()) {
                    errors.push(format!(
                        "{}: one of [{}] is mandatory",
                        spec.name,
                        group.iter().copied().collect::<Vec<_>>().join(", ")
                    ));
                }
            } else {
                errors.push(format!(
                    "{}: mandatory input '{}' is not set",
                    spec.name, field.name
                ));
            }
        }

        if group.len() > 1 && set_members.len() > 1 && reported_groups.insert(group.clone()) {
            errors.push(format!(
                "{}: inputs [{}] are mutually exclusive",
                spec.name,
                set_members.join(", ")
            ));
        }

        if is_set(&field.name) {
            for required in &field.requires {
                if !is_set(required) {
                    errors.push(format!(
                        "{}: input '{}' requires '{}'",
                        spec.name, field.name, required
                    ));
                }
            }
        }
    }

    errors
}

/// The field plus everything it is declared mutually exclusive with.
fn xor_group(field: &InputField) -> BTreeSet<&str> {
    let mut group: BTreeSet<&str> = field.xor.iter().map(String::as_str).collect();
    group.insert(field.name.as_str());
    group
}

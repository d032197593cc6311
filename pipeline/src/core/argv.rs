//! Command-line assembly from typed inputs.

use std::collections::BTreeMap;
use std::path::Path;

use crate::core::naming::generate_name;
use crate::core::template::{count_placeholders, format_template, format_token, split_at_placeholder};
use crate::spec::{FieldKind, InputField, InterfaceSpec};
use crate::value::Value;

/// User inputs plus applied defaults and generated output names.
pub fn effective_inputs(
    spec: &InterfaceSpec,
    user: &BTreeMap<String, Value>,
    cwd: &Path,
) -> Result<BTreeMap<String, Value>, String> {
    let mut effective = user.clone();

    for field in &spec.inputs {
        if effective.contains_key(&field.name) {
            continue;
        }
        if let Some(default) = field.applied_default() {
            effective.insert(field.name.clone(), default.clone());
        }
    }

    for field in &spec.inputs {
        if effective.contains_key(&field.name) {
            continue;
        }
        let (Some(source_name), Some(template)) = (&field.name_source, &field.name_template) else {
            continue;
        };
        let Some(source) = effective.get(source_name) else {
            continue;
        };
        let source_path = name_source_path(source).ok_or_else(|| {
            format!(
                "{}: input '{}' cannot derive a name from '{}' ({})",
                spec.name,
                field.name,
                source_name,
                source.type_name()
            )
        })?;
        let generated = generate_name(template, &source_path, field.keep_extension, cwd);
        effective.insert(field.name.clone(), Value::from(generated));
    }

    Ok(effective)
}

/// Lists contribute their first element, matching how single outputs are named.
fn name_source_path(value: &Value) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.clone()),
        Value::List(items) => items.first().and_then(name_source_path),
        _ => None,
    }
}

/// Format every set input that has an `argstr` and order the resulting tokens:
/// non-negative positions ascending, then unpositioned fields by name, then
/// negative positions ascending (`-1` last).
pub fn build_args(
    spec: &InterfaceSpec,
    effective: &BTreeMap<String, Value>,
) -> Result<Vec<String>, String> {
    let mut leading: Vec<(i32, Vec<String>)> = Vec::new();
    let mut unpositioned: Vec<(&str, Vec<String>)> = Vec::new();
    let mut trailing: Vec<(i32, Vec<String>)> = Vec::new();

    for field in &spec.inputs {
        let Some(argstr) = field.argstr.as_deref() else {
            continue;
        };
        let Some(value) = effective.get(&field.name) else {
            continue;
        };
        let tokens = format_field(field, argstr, value)
            .map_err(|err| format!("{}: input '{}': {}", spec.name, field.name, err))?;
        if tokens.is_empty() {
            continue;
        }
        match field.position {
            Some(position) if position >= 0 => leading.push((position, tokens)),
            Some(position) => trailing.push((position, tokens)),
            None => unpositioned.push((field.name.as_str(), tokens)),
        }
    }

    leading.sort_by_key(|(position, _)| *position);
    unpositioned.sort_by(|a, b| a.0.cmp(b.0));
    trailing.sort_by_key(|(position, _)| *position);

    let mut args = Vec::new();
    args.extend(leading.into_iter().flat_map(|(_, tokens)| tokens));
    args.extend(unpositioned.into_iter().flat_map(|(_, tokens)| tokens));
    args.extend(trailing.into_iter().flat_map(|(_, tokens)| tokens));
    Ok(args)
}

fn format_field(field: &InputField, argstr: &str, value: &Value) -> Result<Vec<String>, String> {
    match (&field.kind, value) {
        (FieldKind::Bool, Value::Bool(false)) => Ok(Vec::new()),
        (FieldKind::Bool, Value::Bool(true)) if count_placeholders(argstr) == 0 => {
            Ok(argstr.split_whitespace().map(str::to_string).collect())
        }
        (FieldKind::List { .. }, Value::List(items)) => {
            format_list(argstr, field.sep.as_deref().unwrap_or(" "), items)
        }
        (FieldKind::Tuple { .. }, Value::List(items)) => {
            let refs: Vec<&Value> = items.iter().collect();
            format_template(argstr, &refs)
        }
        (_, value) => format_template(argstr, &[value]),
    }
}

fn format_list(argstr: &str, sep: &str, items: &[Value]) -> Result<Vec<String>, String> {
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let (template, repeat) = match argstr.strip_suffix("...") {
        Some(template) => (template, true),
        None => (argstr, false),
    };

    if !sep.trim().is_empty() {
        let joined = Value::Str(
            items
                .iter()
                .map(Value::render)
                .collect::<Vec<_>>()
                .join(sep),
        );
        return format_template(template, &[&joined]);
    }

    if repeat {
        let mut tokens = Vec::new();
        for item in items {
            tokens.extend(format_template(template, &[item])?);
        }
        return Ok(tokens);
    }

    // Whitespace separator: the placeholder token fans out into one token per item.
    let mut tokens = Vec::new();
    let mut expanded = false;
    for token in template.split_whitespace() {
        match split_at_placeholder(token) {
            Some((prefix, placeholder, suffix)) if !expanded => {
                expanded = true;
                let last = items.len() - 1;
                for (index, item) in items.iter().enumerate() {
                    let mut formatted = format_token(placeholder, &mut std::iter::once(item))?;
                    if index == 0 {
                        formatted.insert_str(0, prefix);
                    }
                    if index == last {
                        formatted.push_str(suffix);
                    }
                    tokens.push(formatted);
                }
            }
            Some(_) => {
                return Err(format!(
                    "list template '{argstr}' must have a single placeholder"
                ));
            }
            None => tokens.push(format_token(token, &mut std::iter::empty())?),
        }
    }
    if !expanded {
        return Err(format!("list template '{argstr}' has no placeholder"));
    }
    Ok(tokens)
}

/// Shell-quoted rendering of argv tokens for reports and `command.txt`.
pub fn render_cmdline(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|token| shell_quote(token))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(token: &str) -> String {
    let safe = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if safe {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

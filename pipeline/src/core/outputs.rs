//! Output resolution from effective inputs and captured stdout.

use std::collections::BTreeMap;
use std::path::Path;

use minijinja::Environment;

use crate::core::naming;
use crate::core::validate::check_value;
use crate::spec::{FieldKind, InterfaceSpec, OutputField, OutputSource};
use crate::value::Value;

fn template_env() -> Environment<'static> {
    let mut env = Environment::new();
    env.add_filter("basename", |path: String| -> String {
        Path::new(&path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    env.add_filter("dirname", |path: String| -> String {
        Path::new(&path)
            .parent()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    env.add_filter("stem", |path: String| naming::stem(&path));
    env.add_filter("ext", |path: String| naming::extension(&path));
    env.add_filter("strip_ext", |path: String| naming::strip_extension(&path));
    env
}

/// Parse an output-name template without rendering it.
pub fn check_template(template: &str) -> Result<(), String> {
    let env = template_env();
    env.template_from_str(template)
        .map(|_| ())
        .map_err(|err| format!("invalid template '{template}': {err}"))
}

/// True when `output` is expected given its `when` guard.
pub fn is_expected(output: &OutputField, effective: &BTreeMap<String, Value>) -> bool {
    match &output.when {
        Some(guard) => effective.get(guard).is_some_and(Value::is_truthy),
        None => true,
    }
}

/// Map every expected output to a value. Relative paths are joined onto `cwd`.
pub fn resolve_outputs(
    spec: &InterfaceSpec,
    effective: &BTreeMap<String, Value>,
    cwd: &Path,
    stdout: &str,
) -> Result<BTreeMap<String, Value>, String> {
    let env = template_env();
    let mut resolved = BTreeMap::new();

    for output in spec.outputs.iter().filter(|o| is_expected(o, effective)) {
        let value = match &output.source {
            OutputSource::Input { field } => match effective.get(field) {
                Some(value) => value.clone(),
                None if output.optional => continue,
                None => {
                    return Err(format!(
                        "{}: output '{}' needs input '{}', which is not set",
                        spec.name, output.name, field
                    ));
                }
            },
            OutputSource::Template { template } => {
                let rendered = env.render_str(template, effective).map_err(|err| {
                    format!("{}: output '{}': {}", spec.name, output.name, err)
                })?;
                Value::Str(rendered.trim().to_string())
            }
            OutputSource::Stdout => parse_stdout(&output.kind, stdout).map_err(|err| {
                format!("{}: output '{}': {}", spec.name, output.name, err)
            })?,
        };
        let value = if output.kind.is_path() {
            absolutize(value, cwd)
        } else {
            value
        };
        resolved.insert(output.name.clone(), value);
    }

    Ok(resolved)
}

fn absolutize(value: Value, cwd: &Path) -> Value {
    match value {
        Value::Str(path) if Path::new(&path).is_relative() => Value::from(cwd.join(path)),
        Value::List(items) => Value::List(items.into_iter().map(|v| absolutize(v, cwd)).collect()),
        other => other,
    }
}

/// Parse captured stdout by kind, then hold it to the same checks as an input.
fn parse_stdout(kind: &FieldKind, stdout: &str) -> Result<Value, String> {
    let value = match kind {
        FieldKind::List { item, .. } => stdout
            .split_whitespace()
            .map(|word| parse_scalar(item, word))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List)?,
        kind => parse_scalar(kind, stdout.trim())?,
    };
    check_value(kind, &value)?;
    Ok(value)
}

fn parse_scalar(kind: &FieldKind, text: &str) -> Result<Value, String> {
    match kind {
        FieldKind::Bool => match text.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            _ => Err(format!("cannot read '{text}' as bool")),
        },
        FieldKind::Int { .. } => text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|err| format!("cannot read '{text}' as int: {err}")),
        FieldKind::Float { .. } => text
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|err| format!("cannot read '{text}' as float: {err}")),
        _ => Ok(Value::from(text)),
    }
}

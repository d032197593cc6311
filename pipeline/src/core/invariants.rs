//! Semantic invariants of interface definitions not expressible via JSON Schema.

use std::collections::HashSet;

use crate::core::outputs::check_template;
use crate::core::template::count_placeholders;
use crate::core::validate::check_value;
use crate::spec::{FieldKind, InputField, InterfaceSpec, OutputSource, TerminalOutput};

/// Check semantic invariants of an interface definition:
/// - Non-empty name and command
/// - Unique input and output names, unique positions
/// - `xor`, `requires`, `name_source` and `when` refer to existing inputs
/// - `name_template` pairs with `name_source` and holds exactly one `%s`
/// - Defaults type-check, placeholder counts match the field kind
/// - Enum values present, `min <= max`
/// - Output sources are consistent with their kinds
pub fn validate_spec(spec: &InterfaceSpec) -> Vec<String> {
    let mut errors = Vec::new();
    let name = spec.name.as_str();

    if spec.name.trim().is_empty() {
        errors.push("interface name must not be empty".to_string());
    }
    if spec.command.trim().is_empty() {
        errors.push(format!("{name}: command must not be empty"));
    }

    let mut seen = HashSet::new();
    for field in &spec.inputs {
        if !seen.insert(field.name.as_str()) {
            errors.push(format!("{name}: duplicate input '{}'", field.name));
        }
    }
    let mut seen_outputs = HashSet::new();
    for field in &spec.outputs {
        if !seen_outputs.insert(field.name.as_str()) {
            errors.push(format!("{name}: duplicate output '{}'", field.name));
        }
    }

    let mut positions = HashSet::new();
    for field in &spec.inputs {
        if let Some(position) = field.position
            && !positions.insert(position)
        {
            errors.push(format!(
                "{name}: input '{}' reuses position {position}",
                field.name
            ));
        }
        validate_input(spec, field, &mut errors);
    }

    for output in &spec.outputs {
        let path = format!("{name}: output '{}'", output.name);
        validate_kind(&output.kind, &path, &mut errors);
        if let Some(when) = &output.when
            && spec.input(when).is_none()
        {
            errors.push(format!("{path}: 'when' refers to unknown input '{when}'"));
        }
        match &output.source {
            OutputSource::Input { field } => {
                if spec.input(field).is_none() {
                    errors.push(format!("{path}: source refers to unknown input '{field}'"));
                }
            }
            OutputSource::Template { template } => {
                if !matches!(
                    output.kind,
                    FieldKind::File { .. } | FieldKind::Directory { .. } | FieldKind::Str
                ) {
                    errors.push(format!(
                        "{path}: template sources need a file, directory or str kind"
                    ));
                }
                if let Err(err) = check_template(template) {
                    errors.push(format!("{path}: {err}"));
                }
            }
            OutputSource::Stdout => {
                let scalar = match &output.kind {
                    FieldKind::List { item, .. } => item.is_scalar(),
                    kind => kind.is_scalar(),
                };
                if !scalar {
                    errors.push(format!(
                        "{path}: stdout sources need a scalar or scalar list kind"
                    ));
                }
                if spec.terminal_output == TerminalOutput::None {
                    errors.push(format!(
                        "{path}: stdout source needs terminal_output other than 'none'"
                    ));
                }
            }
        }
    }

    errors
}

fn validate_input(spec: &InterfaceSpec, field: &InputField, errors: &mut Vec<String>) {
    let path = format!("{}: input '{}'", spec.name, field.name);
    validate_kind(&field.kind, &path, errors);

    for other in field.xor.iter().chain(&field.requires) {
        if spec.input(other).is_none() {
            errors.push(format!("{path}: refers to unknown input '{other}'"));
        }
    }

    match (&field.name_source, &field.name_template) {
        (Some(source), Some(template)) => {
            if spec.input(source).is_none() {
                errors.push(format!("{path}: name_source refers to unknown input '{source}'"));
            }
            if template.matches("%s").count() != 1 {
                errors.push(format!(
                    "{path}: name_template '{template}' must contain exactly one %s"
                ));
            }
        }
        (None, None) => {}
        _ => errors.push(format!(
            "{path}: name_source and name_template must be set together"
        )),
    }

    if let Some(default) = &field.default
        && let Err(err) = check_value(&field.kind, default)
    {
        errors.push(format!("{path}: default: {err}"));
    }

    if let Some(argstr) = &field.argstr {
        let template = argstr.strip_suffix("...").unwrap_or(argstr);
        let found = count_placeholders(template);
        let expected = match &field.kind {
            FieldKind::Bool => (0..=1).contains(&found),
            FieldKind::Tuple { items } => found == items.len(),
            _ => found == 1,
        };
        if !expected {
            errors.push(format!(
                "{path}: argstr '{argstr}' has {found} placeholder(s), which does not fit a {} field",
                field.kind.label()
            ));
        }
        if argstr.ends_with("...") && !matches!(field.kind, FieldKind::List { .. }) {
            errors.push(format!("{path}: only list fields may repeat with '...'"));
        }
    }
}

fn validate_kind(kind: &FieldKind, path: &str, errors: &mut Vec<String>) {
    match kind {
        FieldKind::Int {
            min: Some(min),
            max: Some(max),
        } if min > max => errors.push(format!("{path}: min {min} exceeds max {max}")),
        FieldKind::Float {
            min: Some(min),
            max: Some(max),
        } if min > max => errors.push(format!("{path}: min {min} exceeds max {max}")),
        FieldKind::Enum { values } if values.is_empty() => {
            errors.push(format!("{path}: enum needs at least one value"));
        }
        FieldKind::List {
            item,
            min_len,
            max_len,
        } => {
            if let (Some(min), Some(max)) = (min_len, max_len)
                && min > max
            {
                errors.push(format!("{path}: min_len {min} exceeds max_len {max}"));
            }
            validate_kind(item, path, errors);
        }
        FieldKind::Tuple { items } => {
            if items.is_empty() {
                errors.push(format!("{path}: tuple needs at least one item"));
            }
            for item in items {
                validate_kind(item, path, errors);
            }
        }
        _ => {}
    }
}

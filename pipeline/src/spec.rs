//! Declarative interface definitions.
//!
//! An [`InterfaceSpec`] describes one external tool: how its typed inputs turn
//! into command-line tokens and where its outputs land after a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterfaceSpec {
    pub name: String,
    /// Program plus optional fixed leading arguments, whitespace separated.
    pub command: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub terminal_output: TerminalOutput,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub inputs: Vec<InputField>,
    #[serde(default)]
    pub outputs: Vec<OutputField>,
}

impl InterfaceSpec {
    pub fn input(&self, name: &str) -> Option<&InputField> {
        self.inputs.iter().find(|field| field.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputField> {
        self.outputs.iter().find(|field| field.name == name)
    }

    /// Split `command` into the program and its fixed leading arguments.
    pub fn program_and_args(&self) -> (String, Vec<String>) {
        let mut parts = self.command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        (program, parts.collect())
    }
}

/// How the child's stdout/stderr are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalOutput {
    /// Forward each line to the log as it arrives and keep a copy.
    #[default]
    Stream,
    /// Keep a copy, log nothing while running.
    Allatonce,
    /// Keep a copy and write `stdout.log`/`stderr.log` into the working directory.
    File,
    /// Discard everything.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Bool,
    Int {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    Float {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Str,
    Enum {
        values: Vec<String>,
    },
    File {
        #[serde(default)]
        exists: bool,
    },
    Directory {
        #[serde(default)]
        exists: bool,
    },
    List {
        item: Box<FieldKind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_len: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_len: Option<usize>,
    },
    Tuple {
        items: Vec<FieldKind>,
    },
}

impl FieldKind {
    /// File or directory kinds, looking through lists.
    pub fn is_path(&self) -> bool {
        match self {
            FieldKind::File { .. } | FieldKind::Directory { .. } => true,
            FieldKind::List { item, .. } => item.is_path(),
            _ => false,
        }
    }

    /// Paths that must already exist on disk, looking through lists.
    pub fn must_exist(&self) -> bool {
        match self {
            FieldKind::File { exists } | FieldKind::Directory { exists } => *exists,
            FieldKind::List { item, .. } => item.must_exist(),
            _ => false,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            FieldKind::Bool
                | FieldKind::Int { .. }
                | FieldKind::Float { .. }
                | FieldKind::Str
                | FieldKind::Enum { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            FieldKind::Bool => "bool",
            FieldKind::Int { .. } => "int",
            FieldKind::Float { .. } => "float",
            FieldKind::Str => "str",
            FieldKind::Enum { .. } => "enum",
            FieldKind::File { .. } => "file",
            FieldKind::Directory { .. } => "directory",
            FieldKind::List { .. } => "list",
            FieldKind::Tuple { .. } => "tuple",
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputField {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Apply `default` when the field is unset (otherwise it is documentation only).
    #[serde(default)]
    pub use_default: bool,
    /// Format template, e.g. `-f %.2f`; a trailing `...` repeats it per list item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argstr: Option<String>,
    /// Non-negative positions lead, negative positions trail, unset sort by name in between.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sep: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub xor: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_template: Option<String>,
    #[serde(default)]
    pub keep_extension: bool,
    #[serde(default = "default_true")]
    pub hash_files: bool,
}

impl InputField {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            desc: String::new(),
            mandatory: false,
            default: None,
            use_default: false,
            argstr: None,
            position: None,
            sep: None,
            xor: Vec::new(),
            requires: Vec::new(),
            name_source: None,
            name_template: None,
            keep_extension: false,
            hash_files: true,
        }
    }

    pub fn generates_name(&self) -> bool {
        self.name_source.is_some() && self.name_template.is_some()
    }

    /// Default value that takes effect when the field is unset.
    pub fn applied_default(&self) -> Option<&Value> {
        if self.use_default {
            self.default.as_ref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum OutputSource {
    /// Path held by an input field (user set or generated from `name_template`).
    Input { field: String },
    /// minijinja template rendered over the effective inputs.
    Template { template: String },
    /// Captured stdout parsed according to the output kind.
    Stdout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputField {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub desc: String,
    pub source: OutputSource,
    /// Only expected when this input is set and truthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_definition_with_defaults() {
        let raw = r#"{
            "name": "fsl.bet",
            "command": "bet",
            "inputs": [
                {"name": "in_file", "kind": {"type": "file", "exists": true}, "argstr": "%s", "position": 0, "mandatory": true},
                {"name": "centre", "kind": {"type": "list", "item": {"type": "int"}, "min_len": 3, "max_len": 3}, "argstr": "-c %s"}
            ],
            "outputs": [
                {"name": "out_file", "kind": {"type": "file"}, "source": {"from": "input", "field": "in_file"}}
            ]
        }"#;
        let spec: InterfaceSpec = serde_json::from_str(raw).expect("parse");
        assert_eq!(spec.terminal_output, TerminalOutput::Stream);
        let in_file = spec.input("in_file").expect("in_file");
        assert!(in_file.kind.must_exist());
        assert!(in_file.hash_files);
        assert!(matches!(
            spec.input("centre").map(|field| &field.kind),
            Some(FieldKind::List { min_len: Some(3), .. })
        ));
        assert_eq!(
            spec.outputs[0].source,
            OutputSource::Input {
                field: "in_file".to_string()
            }
        );
    }

    #[test]
    fn command_splits_into_program_and_leading_args() {
        let spec = InterfaceSpec {
            name: "wb.smooth".to_string(),
            command: "wb_command  -volume-smoothing".to_string(),
            description: String::new(),
            terminal_output: TerminalOutput::Allatonce,
            env: BTreeMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        };
        let (program, args) = spec.program_and_args();
        assert_eq!(program, "wb_command");
        assert_eq!(args, vec!["-volume-smoothing"]);
    }
}

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A typed field value.
///
/// Serialized untagged so JSON and TOML literals map directly onto variants.
/// Paths are plain strings; the field kind decides how they are interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    /// True for every value except `Bool(false)`.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Short type label used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
        }
    }

    /// Plain textual form used on command lines and in directory names.
    pub fn render(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => render_float(*f),
            Value::Str(s) => s.clone(),
            Value::List(items) => items
                .iter()
                .map(Value::render)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Python-style repr: whole floats keep a trailing `.0`, and magnitudes outside
/// `[1e-4, 1e16)` switch to exponent form (`1e-05`, `1.5e+16`).
fn render_float(value: f64) -> String {
    let magnitude = value.abs();
    if !value.is_finite() {
        value.to_string()
    } else if value != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        pad_exponent(&format!("{value:e}"))
    } else if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Rewrite Rust's `1.5e-5` exponent into the C form `1.5e-05`.
pub(crate) fn pad_exponent(raw: &str) -> String {
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => raw.to_string(),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<&Path> for Value {
    fn from(value: &Path) -> Self {
        Value::Str(value.to_string_lossy().into_owned())
    }
}

impl From<PathBuf> for Value {
    fn from(value: PathBuf) -> Self {
        Value::from(value.as_path())
    }
}

impl From<&PathBuf> for Value {
    fn from(value: &PathBuf) -> Self {
        Value::from(value.as_path())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_json_literals_map_to_variants() {
        let parsed: Vec<Value> =
            serde_json::from_str(r#"[true, 3, 0.5, "a.nii", [1, 2]]"#).expect("parse");
        assert_eq!(
            parsed,
            vec![
                Value::Bool(true),
                Value::Int(3),
                Value::Float(0.5),
                Value::Str("a.nii".to_string()),
                Value::List(vec![Value::Int(1), Value::Int(2)]),
            ]
        );
    }

    #[test]
    fn whole_floats_keep_decimal_point() {
        assert_eq!(Value::Float(1.0).render(), "1.0");
        assert_eq!(Value::Float(0.25).render(), "0.25");
        assert_eq!(Value::from(vec![1, 2, 3]).render(), "1,2,3");
    }

    #[test]
    fn extreme_floats_render_in_exponent_form() {
        assert_eq!(Value::Float(1e-5).render(), "1e-05");
        assert_eq!(Value::Float(1e16).render(), "1e+16");
        assert_eq!(Value::Float(-2.5e-7).render(), "-2.5e-07");
        assert_eq!(Value::Float(0.0001).render(), "0.0001");
        assert_eq!(Value::Float(1e15).render(), "1000000000000000.0");
        assert_eq!(Value::Float(0.0).render(), "0.0");
    }

    #[test]
    fn only_false_is_not_truthy() {
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::from("").is_truthy());
    }
}

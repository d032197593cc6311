//! printf-style placeholder formatting for `argstr` templates.
//!
//! Supported conversions: `%s %d %i %f %.Nf %g %e %.Ne` and the `%%` escape.

use std::sync::LazyLock;

use regex::Regex;

use crate::value::{Value, pad_exponent};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%(%|(?:\.(\d+))?([sdifge]))").unwrap());

/// Number of value-consuming placeholders in `template` (`%%` excluded).
pub fn count_placeholders(template: &str) -> usize {
    PLACEHOLDER_RE
        .captures_iter(template)
        .filter(|caps| caps.get(3).is_some())
        .count()
}

/// Format a whitespace-separated template into argv tokens.
///
/// Placeholders consume `values` left to right across tokens; every value must
/// be consumed exactly once.
pub fn format_template(template: &str, values: &[&Value]) -> Result<Vec<String>, String> {
    let mut remaining = values.iter().copied();
    let mut tokens = Vec::new();
    for token in template.split_whitespace() {
        tokens.push(format_token(token, &mut remaining)?);
    }
    let leftover = remaining.count();
    if leftover > 0 {
        return Err(format!(
            "template '{template}' has {} placeholder(s) but {} value(s) were given",
            values.len() - leftover,
            values.len()
        ));
    }
    Ok(tokens)
}

/// Format a single token, pulling one value per placeholder from `values`.
pub fn format_token<'a>(
    token: &str,
    values: &mut impl Iterator<Item = &'a Value>,
) -> Result<String, String> {
    let mut out = String::with_capacity(token.len());
    let mut last = 0;
    for caps in PLACEHOLDER_RE.captures_iter(token) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        out.push_str(&token[last..whole.start]);
        last = whole.end;
        let Some(conversion) = caps.get(3) else {
            out.push('%');
            continue;
        };
        let precision = caps
            .get(2)
            .map(|m| m.as_str().parse::<usize>())
            .transpose()
            .map_err(|err| format!("bad precision in '{token}': {err}"))?;
        let value = values
            .next()
            .ok_or_else(|| format!("not enough values for placeholder in '{token}'"))?;
        out.push_str(&convert(conversion.as_str(), precision, value)?);
    }
    out.push_str(&token[last..]);
    Ok(out)
}

/// Split a token around its first placeholder into `(prefix, placeholder, suffix)`.
pub fn split_at_placeholder(token: &str) -> Option<(&str, &str, &str)> {
    PLACEHOLDER_RE
        .captures_iter(token)
        .find(|caps| caps.get(3).is_some())
        .and_then(|caps| caps.get(0))
        .map(|m| (&token[..m.start()], m.as_str(), &token[m.end()..]))
}

fn convert(conversion: &str, precision: Option<usize>, value: &Value) -> Result<String, String> {
    match conversion {
        "s" => Ok(value.render()),
        "d" | "i" => match value {
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok((f.trunc() as i64).to_string()),
            Value::Bool(b) => Ok(i64::from(*b).to_string()),
            other => Err(format!("%{conversion} needs a number, got {}", other.type_name())),
        },
        "f" => {
            let number = numeric(value, conversion)?;
            Ok(format!("{number:.prec$}", prec = precision.unwrap_or(6)))
        }
        "e" => {
            let number = numeric(value, conversion)?;
            Ok(exponent(number, precision.unwrap_or(6)))
        }
        "g" => {
            let number = numeric(value, conversion)?;
            Ok(general(number, precision.unwrap_or(6)))
        }
        other => Err(format!("unsupported conversion %{other}")),
    }
}

fn numeric(value: &Value, conversion: &str) -> Result<f64, String> {
    match value {
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        _ => value
            .as_f64()
            .ok_or_else(|| format!("%{conversion} needs a number, got {}", value.type_name())),
    }
}

/// Scientific notation with a signed, at least two-digit exponent (`1.50e-05`).
fn exponent(number: f64, precision: usize) -> String {
    pad_exponent(&format!("{number:.precision$e}"))
}

/// printf `%g`: `precision` significant digits, fixed notation when the
/// decimal exponent is in `[-4, precision)`, trailing zeros stripped.
fn general(number: f64, precision: usize) -> String {
    let precision = precision.max(1);
    if number == 0.0 || !number.is_finite() {
        return format!("{number}");
    }
    let rounded = format!("{number:.prec$e}", prec = precision - 1);
    let exp = rounded
        .split_once('e')
        .and_then(|(_, exp)| exp.parse::<i32>().ok())
        .unwrap_or(0);
    let digits = i32::try_from(precision).unwrap_or(i32::MAX);
    if (-4..digits).contains(&exp) {
        let decimals = usize::try_from(digits - 1 - exp).unwrap_or(0);
        strip_fraction_zeros(&format!("{number:.decimals$}")).to_string()
    } else {
        match rounded.split_once('e') {
            Some((mantissa, exp)) => pad_exponent(&format!("{}e{exp}", strip_fraction_zeros(mantissa))),
            None => rounded,
        }
    }
}

fn strip_fraction_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

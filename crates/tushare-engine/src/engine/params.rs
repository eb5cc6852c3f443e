//! Step parameter resolution.
//!
//! Each declared step parameter becomes a [`ParamDirective`]:
//!
//! - `{"type": "fixed", "value": v}` or any plain literal: a fixed value
//! - `{"type": "variable", "source": "step.field"}`: first-row value of an
//!   earlier step
//! - `{"type": "loop", "source": "step.field"}`: every distinct value of
//!   that column, one call per value
//! - `"${step.field}"`: loop in fan-out mode, variable otherwise
//!
//! Objects with an unrecognised `type` are kept whole as a fixed value.
//! Literal strings that are date expressions are resolved here.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use super::date_expr;

/// How one parameter obtains its value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamDirective {
    Fixed(Value),
    Variable { source: String },
    Loop { source: String },
}

impl ParamDirective {
    pub fn kind(&self) -> &'static str {
        match self {
            ParamDirective::Fixed(_) => "fixed",
            ParamDirective::Variable { .. } => "variable",
            ParamDirective::Loop { .. } => "loop",
        }
    }

    pub fn source(&self) -> Option<&str> {
        match self {
            ParamDirective::Fixed(_) => None,
            ParamDirective::Variable { source } | ParamDirective::Loop { source } => Some(source),
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, ParamDirective::Loop { .. })
    }
}

/// Directives in declared parameter order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedParams {
    entries: Vec<(String, ParamDirective)>,
}

impl ResolvedParams {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamDirective)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, name: &str) -> Option<&ParamDirective> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn has_loop(&self) -> bool {
        self.entries.iter().any(|(_, d)| d.is_loop())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Strip `${...}` from a reference shorthand.
pub fn shorthand_source(value: &str) -> Option<&str> {
    value.strip_prefix("${")?.strip_suffix('}').map(str::trim)
}

/// Classify every parameter of a step.
///
/// Never fails: unknown shapes fall back to fixed values.
pub fn resolve_step_params(params: &Map<String, Value>, fan_out: bool, today: NaiveDate) -> ResolvedParams {
    let entries = params
        .iter()
        .map(|(name, value)| (name.clone(), classify(value, fan_out, today)))
        .collect();
    ResolvedParams { entries }
}

fn classify(value: &Value, fan_out: bool, today: NaiveDate) -> ParamDirective {
    match value {
        Value::Object(obj) if obj.contains_key("type") => {
            let source = || {
                obj.get("source")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .trim()
                    .to_string()
            };
            match obj.get("type").and_then(Value::as_str) {
                Some("loop") => ParamDirective::Loop { source: source() },
                Some("variable") => ParamDirective::Variable { source: source() },
                Some("fixed") => ParamDirective::Fixed(date_expr::resolve_value(
                    obj.get("value").cloned().unwrap_or(Value::Null),
                    today,
                )),
                _ => ParamDirective::Fixed(value.clone()),
            }
        }
        Value::String(s) => match shorthand_source(s) {
            Some(source) if fan_out => ParamDirective::Loop {
                source: source.to_string(),
            },
            Some(source) => ParamDirective::Variable {
                source: source.to_string(),
            },
            None => ParamDirective::Fixed(date_expr::resolve_value(value.clone(), today)),
        },
        other => ParamDirective::Fixed(other.clone()),
    }
}

/// Resolve date expressions in every literal of a parameter map.
pub fn resolve_literals(params: Map<String, Value>, today: NaiveDate) -> Map<String, Value> {
    params
        .into_iter()
        .map(|(k, v)| (k, date_expr::resolve_value(v, today)))
        .collect()
}

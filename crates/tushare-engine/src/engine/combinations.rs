//! Expansion of resolved parameters into concrete call parameters.

use chrono::NaiveDate;
use itertools::Itertools;
use serde_json::{Map, Value};

use super::date_expr;
use super::params::{ParamDirective, ResolvedParams};
use super::previous::{distinct, PreviousResults};

/// Values available to one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSet {
    pub name: String,
    pub directive: ParamDirective,
    pub values: Vec<Value>,
}

/// Every concrete parameter set for one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombinationPlan {
    pub value_sets: Vec<ValueSet>,
    pub combinations: Vec<Map<String, Value>>,
}

impl CombinationPlan {
    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    /// Value sets of loop parameters.
    pub fn loop_sets(&self) -> impl Iterator<Item = &ValueSet> {
        self.value_sets.iter().filter(|s| s.directive.is_loop())
    }
}

/// Collect each parameter's value set.
///
/// Lookup gaps are logged and leave the set empty.
pub fn value_sets(resolved: &ResolvedParams, previous: &PreviousResults, today: NaiveDate) -> Vec<ValueSet> {
    resolved
        .iter()
        .map(|(name, directive)| {
            let values = match directive {
                ParamDirective::Fixed(value) => vec![date_expr::resolve_value(value.clone(), today)],
                ParamDirective::Loop { source } => match previous.column_values(source) {
                    Ok(values) => distinct(
                        values
                            .into_iter()
                            .map(|v| date_expr::resolve_value(v, today))
                            .collect(),
                    ),
                    Err(gap) => {
                        tracing::warn!(param = %name, kind = "loop", source = %source, "{}", gap);
                        Vec::new()
                    }
                },
                ParamDirective::Variable { source } => match previous.first_value(source) {
                    Ok(value) => vec![date_expr::resolve_value(value, today)],
                    Err(gap) => {
                        tracing::warn!(param = %name, kind = "variable", source = %source, "{}", gap);
                        Vec::new()
                    }
                },
            };
            if directive.is_loop() {
                tracing::debug!(param = %name, values = values.len(), "Loop parameter values collected");
            }
            ValueSet {
                name: name.to_string(),
                directive: directive.clone(),
                values,
            }
        })
        .collect()
}

/// Build the Cartesian product of all value sets in declared order.
///
/// Fails closed: if any parameter has no value the step gets no
/// combinations at all. Without loop parameters every set is a singleton,
/// so exactly one combination is produced. A step without parameters gets
/// one empty combination, or none when `fan_out` is set.
pub fn generate(
    resolved: &ResolvedParams,
    fan_out: bool,
    previous: &PreviousResults,
    today: NaiveDate,
) -> CombinationPlan {
    let value_sets = value_sets(resolved, previous, today);
    if fan_out && value_sets.is_empty() {
        tracing::warn!("Fan-out step has no parameters, no combinations generated");
        return CombinationPlan {
            value_sets,
            combinations: Vec::new(),
        };
    }

    let empty: Vec<String> = value_sets
        .iter()
        .filter(|s| s.values.is_empty())
        .map(|s| {
            format!(
                "{} ({}, source: {})",
                s.name,
                s.directive.kind(),
                s.directive.source().unwrap_or("N/A")
            )
        })
        .collect();
    if !empty.is_empty() {
        tracing::warn!(
            params = %empty.join(", "),
            available = ?previous.step_names(),
            "Parameters without values, no combinations generated"
        );
        return CombinationPlan {
            value_sets,
            combinations: Vec::new(),
        };
    }

    let combinations = if value_sets.is_empty() {
        vec![Map::new()]
    } else {
        value_sets
            .iter()
            .map(|s| s.values.iter().cloned())
            .multi_cartesian_product()
            .map(|tuple| {
                value_sets
                    .iter()
                    .map(|s| s.name.clone())
                    .zip(tuple)
                    .collect::<Map<String, Value>>()
            })
            .collect()
    };

    CombinationPlan {
        value_sets,
        combinations,
    }
}

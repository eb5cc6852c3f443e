//! Results of already executed workflow steps.
//!
//! Two views over the same data: every step's full result set keyed by
//! step name, and the first row of each step flattened into
//! `"step.field"` scalars. The scalar view is rebuilt whenever a step is
//! registered.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde_json::Value;

use super::result_set::ResultSet;

/// Placeholder for the most recently registered step.
pub const PREVIOUS_STEP: &str = "previous_step";

/// Why a source reference produced no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupGap {
    UnknownStep { step: String, available: Vec<String> },
    EmptyStep { step: String },
    MissingField { step: String, field: String, available: Vec<String> },
    /// A bare step reference to a result with more than one column.
    AmbiguousStep { step: String, columns: Vec<String> },
}

impl fmt::Display for LookupGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupGap::UnknownStep { step, available } => {
                write!(f, "no result for step '{}', available steps: {:?}", step, available)
            }
            LookupGap::EmptyStep { step } => write!(f, "step '{}' returned no rows", step),
            LookupGap::MissingField { step, field, available } => write!(
                f,
                "step '{}' has no value for field '{}', available fields: {:?}",
                step, field, available
            ),
            LookupGap::AmbiguousStep { step, columns } => write!(
                f,
                "step '{}' has {} columns, reference one as '{}.<field>': {:?}",
                step,
                columns.len(),
                step,
                columns
            ),
        }
    }
}

/// Results carried from one workflow step to the next.
#[derive(Debug, Clone, Default)]
pub struct PreviousResults {
    order: Vec<String>,
    steps: HashMap<String, ResultSet>,
    scalars: HashMap<String, Value>,
    last_step: Option<String>,
}

impl PreviousResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a step's result and make it the previous step.
    pub fn register(&mut self, step: &str, results: ResultSet) {
        if !self.steps.contains_key(step) {
            self.order.push(step.to_string());
        }
        self.steps.insert(step.to_string(), results);
        self.last_step = Some(step.to_string());
        self.rebuild_scalars();
    }

    fn rebuild_scalars(&mut self) {
        self.scalars.clear();
        for name in &self.order {
            let Some(first) = self.steps.get(name).and_then(ResultSet::first) else {
                continue;
            };
            for (field, value) in first {
                self.scalars.insert(format!("{}.{}", name, field), value.clone());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn previous_step(&self) -> Option<&str> {
        self.last_step.as_deref()
    }

    pub fn step(&self, name: &str) -> Option<&ResultSet> {
        self.steps.get(name)
    }

    /// First-row value addressed as `"step.field"`.
    pub fn scalar(&self, key: &str) -> Option<&Value> {
        self.scalars.get(key)
    }

    /// Registered step names in registration order.
    pub fn step_names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Rewrite `previous_step` and `previous_step.field` to the name of
    /// the last registered step. Other sources, or any source before a
    /// step has been registered, are returned unchanged.
    pub fn expand_source(&self, source: &str) -> String {
        let source = source.trim();
        let Some(last) = self.last_step.as_deref() else {
            return source.to_string();
        };
        if source == PREVIOUS_STEP {
            return last.to_string();
        }
        match source.strip_prefix(PREVIOUS_STEP).and_then(|r| r.strip_prefix('.')) {
            Some(field) => format!("{}.{}", last, field),
            None => source.to_string(),
        }
    }

    /// Single value for `source` taken from the first row.
    ///
    /// `step.field` reads the scalar view; a bare `step` is accepted when
    /// the step's result has exactly one column. Null counts as no value.
    pub fn first_value(&self, source: &str) -> Result<Value, LookupGap> {
        let source = self.expand_source(source);
        match source.split_once('.') {
            Some((step, field)) => {
                if let Some(value) = self.scalars.get(&source).filter(|v| !v.is_null()) {
                    return Ok(value.clone());
                }
                let set = self.lookup_step(step)?;
                let first = set.first().ok_or_else(|| LookupGap::EmptyStep {
                    step: step.to_string(),
                })?;
                Err(LookupGap::MissingField {
                    step: step.to_string(),
                    field: field.to_string(),
                    available: first.keys().cloned().collect(),
                })
            }
            None => {
                let set = self.lookup_step(&source)?;
                let column = single_column(&source, set)?;
                set.first()
                    .and_then(|row| row.get(column))
                    .filter(|v| !v.is_null())
                    .cloned()
                    .ok_or_else(|| LookupGap::EmptyStep { step: source.clone() })
            }
        }
    }

    /// Every non-null value of the referenced column across all rows, in
    /// row order. Duplicates are kept.
    pub fn column_values(&self, source: &str) -> Result<Vec<Value>, LookupGap> {
        let source = self.expand_source(source);
        let (step, field) = match source.split_once('.') {
            Some((step, field)) => (step.to_string(), field.to_string()),
            None => {
                let set = self.lookup_step(&source)?;
                let column = single_column(&source, set)?.to_string();
                (source.clone(), column)
            }
        };

        let set = self.lookup_step(&step)?;
        if set.is_empty() {
            return Err(LookupGap::EmptyStep { step });
        }
        let values: Vec<Value> = set
            .rows()
            .iter()
            .filter_map(|row| row.get(&field))
            .filter(|v| !v.is_null())
            .cloned()
            .collect();
        if values.is_empty() {
            return Err(LookupGap::MissingField {
                step,
                field,
                available: set.columns().to_vec(),
            });
        }
        Ok(values)
    }

    fn lookup_step(&self, step: &str) -> Result<&ResultSet, LookupGap> {
        self.steps.get(step).ok_or_else(|| LookupGap::UnknownStep {
            step: step.to_string(),
            available: self.order.clone(),
        })
    }
}

fn single_column<'a>(step: &str, set: &'a ResultSet) -> Result<&'a str, LookupGap> {
    match set.columns() {
        [only] => Ok(only.as_str()),
        columns => Err(LookupGap::AmbiguousStep {
            step: step.to_string(),
            columns: columns.to_vec(),
        }),
    }
}

/// Order-preserving de-duplication of JSON values.
pub fn distinct(values: Vec<Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.to_string()))
        .collect()
}

//! Step execution conditions.
//!
//! A condition is a JSON object `{"field": "step.field", "operator":
//! "eq" | "ne", "value": ...}` checked against earlier results before a
//! step runs. Values compare as JSON, so `1` and `"1"` differ. A field
//! whose first-row value is null compares as null. A condition that cannot
//! be checked (missing field or value, unknown operator, field not present
//! in earlier results) lets the step run.

use serde::Deserialize;
use serde_json::Value;

use super::previous::PreviousResults;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
}

/// A parsed step condition.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Condition {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Outcome of checking a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Satisfied,
    NotSatisfied { actual: Value },
    /// The condition could not be checked; the step runs.
    Unchecked(&'static str),
}

impl Condition {
    /// Parse a stored condition. Blank input means no condition.
    ///
    /// Malformed JSON is logged and treated as no condition.
    pub fn parse(raw: Option<&str>) -> Option<Condition> {
        let raw = raw.map(str::trim).filter(|r| !r.is_empty())?;
        match serde_json::from_str::<Condition>(raw) {
            Ok(condition) => Some(condition),
            Err(e) => {
                tracing::warn!(error = %e, condition = %raw, "Ignoring unparsable step condition");
                None
            }
        }
    }

    pub fn operator(&self) -> Option<Operator> {
        match self.operator.as_deref().map(str::trim) {
            Some("eq") => Some(Operator::Eq),
            Some("ne") => Some(Operator::Ne),
            _ => None,
        }
    }

    /// Check the condition against earlier results.
    pub fn evaluate(&self, previous: &PreviousResults) -> Evaluation {
        let (Some(field), Some(expected)) = (self.field.as_deref(), self.value.as_ref()) else {
            return Evaluation::Unchecked("condition has no field or value");
        };
        let actual = match previous.first_value(field) {
            Ok(value) => value,
            Err(_) => match previous.scalar(&previous.expand_source(field)) {
                Some(Value::Null) => Value::Null,
                _ => return Evaluation::Unchecked("field not present in earlier results"),
            },
        };
        let Some(operator) = self.operator() else {
            return Evaluation::Unchecked("unknown operator");
        };

        let equal = values_equal(&actual, expected);
        let satisfied = match operator {
            Operator::Eq => equal,
            Operator::Ne => !equal,
        };
        if satisfied {
            Evaluation::Satisfied
        } else {
            Evaluation::NotSatisfied { actual }
        }
    }
}

/// JSON equality, except that numbers compare by value so `1` matches `1.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::result_set::ResultSet;
    use serde_json::json;

    fn previous(status: Value) -> PreviousResults {
        let mut prev = PreviousResults::new();
        let row = json!({"status": status}).as_object().unwrap().clone();
        prev.register("A", ResultSet::from_rows(vec![row]));
        prev
    }

    fn condition(raw: &str) -> Condition {
        Condition::parse(Some(raw)).unwrap()
    }

    #[test]
    fn test_eq_not_satisfied_skips() {
        let c = condition(r#"{"field": "A.status", "operator": "eq", "value": "0"}"#);
        let result = c.evaluate(&previous(json!("1")));
        assert_eq!(result, Evaluation::NotSatisfied { actual: json!("1") });
    }

    #[test]
    fn test_eq_and_ne() {
        let eq = condition(r#"{"field": "A.status", "operator": "eq", "value": "1"}"#);
        assert_eq!(eq.evaluate(&previous(json!("1"))), Evaluation::Satisfied);
        let ne = condition(r#"{"field": "A.status", "operator": "ne", "value": "1"}"#);
        assert_eq!(
            ne.evaluate(&previous(json!("1"))),
            Evaluation::NotSatisfied { actual: json!("1") }
        );
        assert_eq!(ne.evaluate(&previous(json!("2"))), Evaluation::Satisfied);
    }

    #[test]
    fn test_numbers_do_not_match_their_text() {
        let eq = condition(r#"{"field": "A.status", "operator": "eq", "value": "1"}"#);
        assert_eq!(
            eq.evaluate(&previous(json!(1))),
            Evaluation::NotSatisfied { actual: json!(1) }
        );
        let numeric = condition(r#"{"field": "A.status", "operator": "eq", "value": 1.0}"#);
        assert_eq!(numeric.evaluate(&previous(json!(1))), Evaluation::Satisfied);
    }

    #[test]
    fn test_null_first_row_value() {
        let eq = condition(r#"{"field": "A.status", "operator": "eq", "value": "1"}"#);
        assert_eq!(
            eq.evaluate(&previous(Value::Null)),
            Evaluation::NotSatisfied { actual: Value::Null }
        );
        let ne = condition(r#"{"field": "previous_step.status", "operator": "ne", "value": "1"}"#);
        assert_eq!(ne.evaluate(&previous(Value::Null)), Evaluation::Satisfied);
    }

    #[test]
    fn test_unchecked_conditions_run() {
        let prev = previous(json!("1"));
        for raw in [
            r#"{"field": "B.status", "operator": "eq", "value": "0"}"#,
            r#"{"field": "A.status", "operator": "gt", "value": "0"}"#,
            r#"{"field": "A.status", "operator": "eq"}"#,
            r#"{"operator": "eq", "value": "0"}"#,
        ] {
            let result = condition(raw).evaluate(&prev);
            assert!(matches!(result, Evaluation::Unchecked(_)), "{}: {:?}", raw, result);
        }
    }

    #[test]
    fn test_parse_blank_and_invalid() {
        assert_eq!(Condition::parse(None), None);
        assert_eq!(Condition::parse(Some("  ")), None);
        assert_eq!(Condition::parse(Some("{oops")), None);
    }
}

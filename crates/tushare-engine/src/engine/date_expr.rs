//! Relative date expressions.
//!
//! `today`, `today+N` and `today-N` (case-insensitive, surrounding
//! whitespace allowed, N a non-negative integer) resolve to a `YYYYMMDD`
//! date relative to a base day. Anything else is not a date expression.

use chrono::{Days, Local, NaiveDate};
use serde_json::Value;

/// Output format of resolved dates.
pub const DATE_FORMAT: &str = "%Y%m%d";

/// Resolve `expr` against `base`.
///
/// Returns `None` when `expr` is not a date expression, including when the
/// offset overflows the calendar.
pub fn evaluate(expr: &str, base: NaiveDate) -> Option<String> {
    let expr = expr.trim().to_ascii_lowercase();
    let rest = expr.strip_prefix("today")?;

    let target = if rest.is_empty() {
        base
    } else {
        let mut chars = rest.chars();
        let sign = chars.next()?;
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let days = Days::new(digits.parse::<u64>().ok()?);
        match sign {
            '+' => base.checked_add_days(days)?,
            '-' => base.checked_sub_days(days)?,
            _ => return None,
        }
    };

    Some(target.format(DATE_FORMAT).to_string())
}

/// Resolve `expr` against the local calendar day.
pub fn evaluate_today(expr: &str) -> Option<String> {
    evaluate(expr, Local::now().date_naive())
}

/// Resolve a parameter value: strings that are date expressions become
/// dates, everything else passes through unchanged.
pub fn resolve_value(value: Value, base: NaiveDate) -> Value {
    match value {
        Value::String(s) => match evaluate(&s, base) {
            Some(date) => Value::String(date),
            None => Value::String(s),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_today() {
        assert_eq!(evaluate("today", day(2024, 3, 15)), Some("20240315".to_string()));
        assert_eq!(evaluate("  TODAY ", day(2024, 3, 15)), Some("20240315".to_string()));
    }

    #[test]
    fn test_offsets_roll_over() {
        assert_eq!(evaluate("today+1", day(2024, 2, 28)), Some("20240229".to_string()));
        assert_eq!(evaluate("today+1", day(2023, 12, 31)), Some("20240101".to_string()));
        assert_eq!(evaluate("Today-1", day(2024, 3, 1)), Some("20240229".to_string()));
        assert_eq!(evaluate("today-30", day(2024, 1, 10)), Some("20231211".to_string()));
        assert_eq!(evaluate("today+0", day(2024, 1, 10)), Some("20240110".to_string()));
    }

    #[test]
    fn test_not_a_date_expression() {
        let base = day(2024, 1, 10);
        for input in [
            "", "yesterday", "today+", "today+x", "today 1", "today++1", "today+1d",
            "20240101", "xtoday", "today-+1", "today\u{20ac}",
        ] {
            assert_eq!(evaluate(input, base), None, "input {:?}", input);
        }
    }

    #[test]
    fn test_overflow_is_not_a_date() {
        assert_eq!(evaluate("today+99999999999", day(2024, 1, 10)), None);
    }

    #[test]
    fn test_resolve_value() {
        let base = day(2024, 1, 10);
        assert_eq!(resolve_value(json!("today-1"), base), json!("20240109"));
        assert_eq!(resolve_value(json!("600000.SH"), base), json!("600000.SH"));
        assert_eq!(resolve_value(json!(5), base), json!(5));
    }
}

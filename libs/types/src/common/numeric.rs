//! Lenient numeric coercion for JSON metadata values
//!
//! Upstream feeds are inconsistent about whether numbers arrive as JSON
//! numbers or strings. These helpers accept both and reject anything that
//! does not produce a finite `f64`.

use serde_json::Value;

/// Coerce a JSON value into a finite `f64`.
///
/// Numbers and numeric strings are accepted, booleans map to `1.0`/`0.0`.
/// Everything else, including NaN and infinities, yields `None`.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let numeric = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        Value::Bool(flag) => {
            if *flag {
                1.0
            } else {
                0.0
            }
        }
        _ => return None,
    };
    numeric.is_finite().then_some(numeric)
}

/// Truthiness of a JSON value: null, false, zero, empty strings and empty
/// containers are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_accepts_numbers_and_strings() {
        assert_eq!(coerce_f64(&json!(1.5)), Some(1.5));
        assert_eq!(coerce_f64(&json!(" 2.25 ")), Some(2.25));
        assert_eq!(coerce_f64(&json!(true)), Some(1.0));
    }

    #[test]
    fn test_coerce_rejects_garbage_and_non_finite() {
        assert_eq!(coerce_f64(&json!("abc")), None);
        assert_eq!(coerce_f64(&json!("NaN")), None);
        assert_eq!(coerce_f64(&json!("inf")), None);
        assert_eq!(coerce_f64(&Value::Null), None);
        assert_eq!(coerce_f64(&json!([1.0])), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!({})));
        assert!(is_truthy(&json!(0.5)));
        assert!(is_truthy(&json!({"a": 1})));
    }
}

//! Type coercion for loosely-typed agent input.
//!
//! Agents routinely send `"25"` for a page size, `"true"` for a flag, or a
//! bare string where a list was expected. Every accepted shape is
//! enumerated here once; call sites never re-implement these rules.
//!
//! Absence is always `None`, never a zero value: a field that cannot be
//! coerced is treated as "not supplied".

use serde_json::{Number, Value};

use crate::error::{BridgeError, BridgeResult};

/// Coerce an integer field.
///
/// Accepts integers, floats without a fractional part, and numeric strings
/// (surrounding whitespace allowed). Everything else yields `None`.
pub fn coerce_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => number_to_int(n),
        Value::String(s) => parse_int_str(s),
        _ => None,
    }
}

fn number_to_int(n: &Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    if let Some(u) = n.as_u64() {
        return i64::try_from(u).ok();
    }
    n.as_f64().and_then(integral_f64)
}

fn parse_int_str(s: &str) -> Option<i64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(i);
    }
    trimmed.parse::<f64>().ok().and_then(integral_f64)
}

fn integral_f64(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, hence the strict upper bound
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Coerce a "single value or list" field into a list of trimmed strings.
///
/// A lone string becomes a one-element list. Sequence elements are
/// stringified and trimmed; `null` and blank entries are dropped. An empty
/// result, or any other input shape, yields `None`. Order is preserved.
pub fn coerce_string_list(value: Option<&Value>) -> Option<Vec<String>> {
    match value? {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(vec![trimmed.to_string()])
            }
        }
        Value::Array(items) => {
            let list: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Null => None,
                    Value::String(s) => Some(s.trim().to_string()),
                    other => Some(other.to_string().trim().to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect();
            if list.is_empty() { None } else { Some(list) }
        }
        _ => None,
    }
}

/// Coerce a boolean field through an explicit mapping.
///
/// Native booleans, the integers 0/1 and the strings
/// `true/false/1/0/yes/no/on/off` (case-insensitive) are accepted. Missing,
/// `null` or blank input is `Ok(None)`. Anything else is a `TypeMismatch`
/// naming `field`, so an invalid flag is reported instead of being guessed.
pub fn coerce_bool(field: &str, value: Option<&Value>) -> BridgeResult<Option<bool>> {
    let Some(value) = value else {
        return Ok(None);
    };

    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(BridgeError::type_mismatch(
                field,
                format!("expected a boolean, received number {}", n),
            )),
        },
        Value::String(s) => {
            let normalized = s.trim().to_ascii_lowercase();
            match normalized.as_str() {
                "" => Ok(None),
                "true" | "1" | "yes" | "on" => Ok(Some(true)),
                "false" | "0" | "no" | "off" => Ok(Some(false)),
                _ => Err(BridgeError::type_mismatch(
                    field,
                    format!("expected a boolean, received string {:?}", s),
                )),
            }
        }
        other => Err(BridgeError::type_mismatch(
            field,
            format!("expected a boolean, received {}", value_kind(other)),
        )),
    }
}

/// Coerce a plain string field. Numbers and booleans keep their display
/// form; mappings, sequences and `null` yield `None`.
pub fn coerce_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Human-readable name of a JSON value's type, for error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn int_from_numeric_string() {
        assert_eq!(coerce_int(Some(&json!("25"))), Some(25));
        assert_eq!(coerce_int(Some(&json!("  42 "))), Some(42));
        assert_eq!(coerce_int(Some(&json!("-7"))), Some(-7));
        assert_eq!(coerce_int(Some(&json!("10.0"))), Some(10));
    }

    #[test]
    fn int_from_numbers() {
        assert_eq!(coerce_int(Some(&json!(25))), Some(25));
        assert_eq!(coerce_int(Some(&json!(25.0))), Some(25));
        assert_eq!(coerce_int(Some(&json!(25.5))), None);
    }

    #[test]
    fn int_absent_for_unparsable_input() {
        assert_eq!(coerce_int(Some(&json!(""))), None);
        assert_eq!(coerce_int(Some(&json!("   "))), None);
        assert_eq!(coerce_int(Some(&Value::Null)), None);
        assert_eq!(coerce_int(None), None);
        assert_eq!(coerce_int(Some(&json!("abc"))), None);
        assert_eq!(coerce_int(Some(&json!(true))), None);
        assert_eq!(coerce_int(Some(&json!([1]))), None);
    }

    #[test]
    fn string_list_wraps_single_string() {
        assert_eq!(
            coerce_string_list(Some(&json!("x"))),
            Some(vec!["x".to_string()])
        );
        assert_eq!(
            coerce_string_list(Some(&json!("  MyTests.Test  "))),
            Some(vec!["MyTests.Test".to_string()])
        );
        assert_eq!(coerce_string_list(Some(&json!("   "))), None);
    }

    #[test]
    fn string_list_drops_blank_entries() {
        assert_eq!(
            coerce_string_list(Some(&json!(["a", " ", "b"]))),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            coerce_string_list(Some(&json!([" c ", null, 3]))),
            Some(vec!["c".to_string(), "3".to_string()])
        );
    }

    #[test]
    fn string_list_absent_when_empty_or_wrong_shape() {
        assert_eq!(coerce_string_list(Some(&json!([]))), None);
        assert_eq!(coerce_string_list(Some(&json!(["", "  "]))), None);
        assert_eq!(coerce_string_list(Some(&json!({"a": 1}))), None);
        assert_eq!(coerce_string_list(Some(&json!(5))), None);
        assert_eq!(coerce_string_list(None), None);
    }

    #[test]
    fn bool_explicit_mapping() {
        assert_eq!(coerce_bool("f", Some(&json!("true"))).unwrap(), Some(true));
        assert_eq!(coerce_bool("f", Some(&json!("FALSE"))).unwrap(), Some(false));
        assert_eq!(coerce_bool("f", Some(&json!("1"))).unwrap(), Some(true));
        assert_eq!(coerce_bool("f", Some(&json!("0"))).unwrap(), Some(false));
        assert_eq!(coerce_bool("f", Some(&json!(false))).unwrap(), Some(false));
        assert_eq!(coerce_bool("f", Some(&json!(1))).unwrap(), Some(true));
        assert_eq!(coerce_bool("f", Some(&json!(""))).unwrap(), None);
        assert_eq!(coerce_bool("f", None).unwrap(), None);
    }

    #[test]
    fn bool_rejects_unknown_values() {
        let err = coerce_bool("find_all", Some(&json!("maybe"))).unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { ref field, .. } if field == "find_all"));
        assert!(err.to_string().contains("maybe"));

        assert!(coerce_bool("f", Some(&json!(2))).is_err());
        assert!(coerce_bool("f", Some(&json!({"x": true}))).is_err());
    }

    #[test]
    fn string_keeps_display_form() {
        assert_eq!(coerce_string(Some(&json!("Player"))), Some("Player".into()));
        assert_eq!(coerce_string(Some(&json!(8))), Some("8".into()));
        assert_eq!(coerce_string(Some(&json!(null))), None);
        assert_eq!(coerce_string(Some(&json!(["a"]))), None);
    }
}

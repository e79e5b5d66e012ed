//! Per-kind coercion table used when `cast` is on. Coercions never cross a
//! composite boundary: an object is never cast to a scalar or vice versa,
//! with the single exception of dense index maps read as arrays.
use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::value::Value;

pub fn to_string(input: &Value) -> Option<String> {
    match input {
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric strings (surrounding whitespace ignored) and booleans as 1/0.
pub fn to_number(input: &Value) -> Option<Value> {
    match input {
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                return None;
            }
            let f = t.parse::<f64>().ok().filter(|f| f.is_finite())?;
            Value::number_from_f64(f)
        }
        Value::Bool(b) => Some(Value::from(if *b { 1 } else { 0 })),
        _ => None,
    }
}

pub fn to_boolean(input: &Value) -> Option<bool> {
    match input {
        Value::String(s) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Some(true),
            Some(f) if f == 0.0 => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// `{"0": a, "1": b}` → `[a, b]`. Keys must be exactly `0..n` in any order.
pub fn dense_array(map: &IndexMap<String, Value>) -> Option<Vec<Value>> {
    let mut slots: Vec<Option<&Value>> = vec![None; map.len()];
    for (key, v) in map {
        if !key.bytes().all(|b| b.is_ascii_digit()) || (key.len() > 1 && key.starts_with('0')) {
            return None;
        }
        let ix = key.parse::<usize>().ok()?;
        let slot = slots.get_mut(ix)?;
        *slot = Some(v);
    }
    slots.into_iter().map(|s| s.cloned()).collect()
}

/// Loose equality between a literal and a cast input: compare rendered forms.
pub fn literal_matches(literal: &Json, input: &Value) -> bool {
    let rendered = match input {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => return false,
    };
    match literal {
        Json::String(s) => *s == rendered,
        Json::Number(n) => match (n.as_f64(), rendered.trim().parse::<f64>()) {
            (Some(a), Ok(b)) => a == b,
            _ => false,
        },
        other => other.to_string() == rendered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_strings() {
        assert_eq!(to_number(&Value::from(" 30 ")), Some(Value::from(30)));
        assert_eq!(to_number(&Value::from("2.5")).and_then(|v| v.as_f64()), Some(2.5));
        assert_eq!(to_number(&Value::from("")), None);
        assert_eq!(to_number(&Value::from("NaN")), None);
        assert_eq!(to_number(&Value::from("x")), None);
    }

    #[test]
    fn booleans() {
        assert_eq!(to_boolean(&Value::from("1")), Some(true));
        assert_eq!(to_boolean(&Value::from(0)), Some(false));
        assert_eq!(to_boolean(&Value::from(2)), None);
    }

    #[test]
    fn dense_maps() {
        let m = Value::from(&json!({"1": "b", "0": "a"}));
        assert_eq!(dense_array(m.as_object().unwrap()), Some(vec![Value::from("a"), Value::from("b")]));
        let gap = Value::from(&json!({"0": "a", "2": "c"}));
        assert_eq!(dense_array(gap.as_object().unwrap()), None);
        let padded = Value::from(&json!({"00": "a"}));
        assert_eq!(dense_array(padded.as_object().unwrap()), None);
    }

    #[test]
    fn literals() {
        assert!(literal_matches(&json!(42), &Value::from("42")));
        assert!(literal_matches(&json!(true), &Value::from("true")));
        assert!(literal_matches(&json!("7"), &Value::from(7)));
        assert!(!literal_matches(&json!("a"), &Value::from("b")));
    }
}

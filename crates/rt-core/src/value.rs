//! Helpers over dynamically typed field values.
//!
//! Dispatch rows carry loosely typed values (numbers, strings, nulls,
//! sometimes JSON documents). Indicators follow a small set of rules on
//! top of [`serde_json::Value`]: truthiness, numeric coercion and
//! numeric-aware equality.

use serde_json::{Map, Number, Value};

/// Truthiness of a field value: null, false, zero, "" and empty containers are false
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Numeric view of a value. Numeric strings are parsed; anything else counts as 0.
pub fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Integer view of a value, if it has one
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

/// Equality where numbers compare by value (`1 == 1.0`)
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

/// JSON number from a float; non-finite results become null
pub fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn is_integral(value: &Value) -> bool {
    matches!(value, Value::Number(n) if n.is_i64() || n.is_u64()) || value.is_null()
}

/// Sum that stays integral when every operand is an integer
pub fn sum<'a>(values: impl IntoIterator<Item = &'a Value>) -> Value {
    let values: Vec<&Value> = values.into_iter().collect();
    if values.iter().all(|v| is_integral(v)) {
        Value::from(values.iter().filter_map(|v| as_i64(v)).sum::<i64>())
    } else {
        float(values.iter().map(|v| as_f64(v)).sum())
    }
}

/// `first - rest...`, integral when every operand is an integer
pub fn difference<'a>(first: &Value, rest: impl IntoIterator<Item = &'a Value>) -> Value {
    let rest: Vec<&Value> = rest.into_iter().collect();
    if is_integral(first) && rest.iter().all(|v| is_integral(v)) {
        let total = rest.iter().filter_map(|v| as_i64(v)).sum::<i64>();
        Value::from(as_i64(first).unwrap_or(0) - total)
    } else {
        float(as_f64(first) - rest.iter().map(|v| as_f64(v)).sum::<f64>())
    }
}

/// Decimal rendering of a float the way the reporting UI expects it (`12.0`, `12.5`)
pub fn float_string(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// Stable string key for values used as identifiers (session ids, task ids, logins)
pub fn value_key(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `{"value": v}`
pub fn wrapped(value: Value) -> Value {
    let mut map = Map::new();
    map.insert("value".to_string(), value);
    Value::Object(map)
}

/// Unwrap `{"value": v}` when the value has that shape
pub fn unwrap_value(value: &Value) -> Option<&Value> {
    value.as_object().and_then(|o| o.get("value"))
}

/// Merge a notification payload into a buffer. Objects are merged key by
/// key (last write wins); anything else is stored under `name`.
pub fn merge_payload(buffer: &mut Map<String, Value>, name: &str, payload: &Value) {
    match payload {
        Value::Object(map) => {
            for (k, v) in map {
                buffer.insert(k.clone(), v.clone());
            }
        }
        other => {
            buffer.insert(name.to_string(), other.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        for v in [json!(null), json!(0), json!(0.0), json!(""), json!([]), json!({}), json!(false)] {
            assert!(!truthy(&v), "{} should be falsy", v);
        }
        for v in [json!(1), json!("0"), json!([0]), json!({"a": 1}), json!(true)] {
            assert!(truthy(&v), "{} should be truthy", v);
        }
    }

    #[test]
    fn test_numeric_equality() {
        assert!(loose_eq(&json!(1), &json!(1.0)));
        assert!(!loose_eq(&json!(1), &json!("1")));
        assert!(loose_eq(&json!("a"), &json!("a")));
    }

    #[test]
    fn test_sum_keeps_integers() {
        assert_eq!(sum([&json!(2), &json!(3)]), json!(5));
        assert_eq!(sum([&json!(2), &json!(0.5)]), json!(2.5));
        assert_eq!(difference(&json!(10), [&json!(3), &json!(2)]), json!(5));
    }

    #[test]
    fn test_float_string() {
        assert_eq!(float_string(12.0), "12.0");
        assert_eq!(float_string(12.5), "12.5");
        assert_eq!(float_string(0.0), "0.0");
    }

    #[test]
    fn test_merge_payload() {
        let mut buffer = Map::new();
        merge_payload(&mut buffer, "a", &json!({"x": {"value": 1}}));
        merge_payload(&mut buffer, "raw", &json!(7));
        merge_payload(&mut buffer, "a", &json!({"x": {"value": 2}}));
        assert_eq!(Value::Object(buffer), json!({"x": {"value": 2}, "raw": 7}));
    }

    #[test]
    fn test_value_key() {
        assert_eq!(value_key(&json!("abc")), "abc");
        assert_eq!(value_key(&json!(42)), "42");
        assert_eq!(value_key(&json!(null)), "");
    }
}

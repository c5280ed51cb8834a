//! Predicate evaluation over workload status documents.
//!
//! Success and failure conditions are dotted-path expressions such as
//! `status.succeeded > 0` or `status.conditions.type == "Complete"`,
//! evaluated against the workload's status document. A bare path is true
//! when the value exists and is truthy.

use serde_json::Value;

/// Evaluate an expression against a document. Malformed expressions and
/// missing paths evaluate to false.
pub fn evaluate(doc: &Value, expression: &str) -> bool {
    let expression = expression.trim();
    if expression.is_empty() {
        return false;
    }

    for op in ["==", "!=", ">=", "<=", ">", "<"] {
        if let Some((path, literal)) = expression.split_once(op) {
            let Some(value) = lookup(doc, path.trim()) else {
                return false;
            };
            return compare(value, op, literal.trim());
        }
    }

    // Bare path: present and truthy.
    lookup(doc, expression).map(is_truthy).unwrap_or(false)
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn compare(value: &Value, op: &str, literal: &str) -> bool {
    // Numeric comparison when both sides are numbers.
    if let (Some(lhs), Ok(rhs)) = (value.as_f64(), literal.parse::<f64>()) {
        return match op {
            "==" => lhs == rhs,
            "!=" => lhs != rhs,
            ">" => lhs > rhs,
            ">=" => lhs >= rhs,
            "<" => lhs < rhs,
            "<=" => lhs <= rhs,
            _ => false,
        };
    }

    let rhs = literal.trim_matches('"').trim_matches('\'');
    let lhs = match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    match op {
        "==" => lhs == rhs,
        "!=" => lhs != rhs,
        _ => false,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

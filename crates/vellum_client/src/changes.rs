//! Structural change detection for JSON documents.
//!
//! Dirty detection compares a freshly serialized body against the frozen
//! baseline. Comparison is structural: object member order is irrelevant,
//! array element order is significant.

use serde_json::{Map, Value};

/// Compares two JSON values structurally.
///
/// Objects are equal when their key sets match and every value compares
/// equal; arrays compare element-wise and order-sensitively; scalars
/// compare by value.
#[must_use]
pub fn structural_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => structural_map_eq(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| structural_eq(x, y))
        }
        _ => a == b,
    }
}

/// Compares two JSON objects structurally.
#[must_use]
pub fn structural_map_eq(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(key, value)| b.get(key).is_some_and(|other| structural_eq(value, other)))
}

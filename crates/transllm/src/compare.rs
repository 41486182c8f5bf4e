//! Structural document comparison.
//!
//! Round-trip checks cannot use plain `==`: dialects do not guarantee block
//! ordering inside a message, so lists compare as multisets; objects compare
//! modulo key order (which `serde_json`'s sorted maps give us already);
//! scalars compare exactly.
//!
//! [`diff`] walks both documents and reports path-tagged mismatches for
//! [`crate::error::TransLLMError::Idempotency`].

use itertools::Itertools;
use serde_json::Value;

/// Structural equality: objects modulo key order, arrays modulo multiset,
/// scalars exact.
pub fn structural_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(left), Value::Object(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .all(|(key, value)| right.get(key).is_some_and(|other| structural_eq(value, other)))
        }
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len() && multiset(left) == multiset(right)
        }
        (left, right) => left == right,
    }
}

/// Path-tagged differences between two documents; empty when structurally
/// equal. Paths use `$.key[index]` notation.
pub fn diff(a: &Value, b: &Value) -> Vec<String> {
    let mut differences = Vec::new();
    diff_at(a, b, "$", &mut differences);
    differences
}

fn diff_at(a: &Value, b: &Value, path: &str, out: &mut Vec<String>) {
    match (a, b) {
        (Value::Object(left), Value::Object(right)) => {
            for (key, value) in left {
                match right.get(key) {
                    Some(other) => diff_at(value, other, &format!("{path}.{key}"), out),
                    None => out.push(format!("{path}.{key}: missing after round-trip")),
                }
            }
            for key in right.keys() {
                if !left.contains_key(key) {
                    out.push(format!("{path}.{key}: introduced by round-trip"));
                }
            }
        }
        (Value::Array(left), Value::Array(right)) => {
            if left.len() != right.len() {
                out.push(format!(
                    "{path}: length changed from {} to {}",
                    left.len(),
                    right.len()
                ));
                return;
            }
            if multiset(left) != multiset(right) {
                // Same length, different members: report positionally for a
                // readable diff even though equality itself is unordered.
                for (index, (value, other)) in left.iter().zip(right).enumerate() {
                    diff_at(value, other, &format!("{path}[{index}]"), out);
                }
            }
        }
        (left, right) => {
            if left != right {
                out.push(format!("{path}: {left} != {right}"));
            }
        }
    }
}

/// Order-independent fingerprint of an array: each element rendered with
/// nested arrays sorted, then the whole list sorted.
fn multiset(values: &[Value]) -> Vec<String> {
    values.iter().map(canonical_string).sorted().collect()
}

fn canonical_string(value: &Value) -> String {
    serde_json::to_string(&canonicalize(value)).unwrap_or_default()
}

/// Recursively sorts arrays by their canonical rendering. Object keys are
/// already sorted by `serde_json`'s map representation.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), canonicalize(value)))
                .collect(),
        ),
        Value::Array(values) => {
            let mut canonical: Vec<Value> = values.iter().map(canonicalize).collect();
            canonical.sort_by_key(|v| serde_json::to_string(v).unwrap_or_default());
            Value::Array(canonical)
        }
        other => other.clone(),
    }
}

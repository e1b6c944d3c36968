//! Value comparison and pattern matching used by in-memory evaluation.

use std::cmp::Ordering;

use quarry_proto::Value;

/// SQL-style equality; `NULL` equals nothing.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
            a.as_i64() == b.as_i64()
        }
        (
            Value::Float32(_) | Value::Float64(_) | Value::Int32(_) | Value::Int64(_),
            Value::Float32(_) | Value::Float64(_) | Value::Int32(_) | Value::Int64(_),
        ) => number(a) == number(b),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bytes(a), Value::Bytes(b)) => a == b,
        (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
        (Value::Uuid(a), Value::Uuid(b)) => a == b,
        _ => match (a.to_list(), b.to_list()) {
            (Some(left), Some(right)) => {
                left.len() == right.len() && left.iter().zip(&right).all(|(l, r)| values_equal(l, r))
            }
            _ => false,
        },
    }
}

/// Ordering between two values; `None` when either is null or the types differ.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
            Some(a.as_i64()?.cmp(&b.as_i64()?))
        }
        (
            Value::Float32(_) | Value::Float64(_) | Value::Int32(_) | Value::Int64(_),
            Value::Float32(_) | Value::Float64(_) | Value::Int32(_) | Value::Int64(_),
        ) => number(a)?.partial_cmp(&number(b)?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_i64().map(|i| i as f64))
}

/// Sort order with nulls last, as PostgreSQL does for ascending order.
pub(crate) fn sort_order(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

/// SQL LIKE matching: `%` matches any run, `_` one character, `\` escapes.
pub fn like_match(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_from(&value, &pattern)
}

fn like_from(value: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some(('%', rest)) => (0..=value.len()).any(|skip| like_from(&value[skip..], rest)),
        Some(('_', rest)) => !value.is_empty() && like_from(&value[1..], rest),
        Some(('\\', rest)) => match (rest.split_first(), value.split_first()) {
            (Some((p, rest)), Some((c, tail))) if p == c => like_from(tail, rest),
            _ => false,
        },
        Some((p, rest)) => match value.split_first() {
            Some((c, tail)) if c == p => like_from(tail, rest),
            _ => false,
        },
    }
}

/// Whether every element of `needle` appears in `haystack` (arrays).
pub(crate) fn array_contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack.to_list(), needle.to_list()) {
        (Some(hay), Some(needles)) => needles
            .iter()
            .all(|n| hay.iter().any(|h| values_equal(h, n))),
        _ => false,
    }
}

/// Whether two arrays share an element.
pub(crate) fn array_overlaps(a: &Value, b: &Value) -> bool {
    match (a.to_list(), b.to_list()) {
        (Some(left), Some(right)) => left
            .iter()
            .any(|l| right.iter().any(|r| values_equal(l, r))),
        _ => false,
    }
}

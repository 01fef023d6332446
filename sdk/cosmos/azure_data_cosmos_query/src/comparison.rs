// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Ordering of JSON values across types, as Cosmos DB sorts them.
//!
//! Values of different types order by type: undefined, null, booleans, numbers, strings, arrays, objects.
//! `None` stands for "undefined" (a missing property).

use std::cmp::Ordering;

use serde_json::Value;

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

/// Compares two possibly-undefined values.
pub(crate) fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let rank = type_rank(left).cmp(&type_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }

    match (left, right) {
        (Some(Value::Bool(l)), Some(Value::Bool(r))) => l.cmp(r),
        (Some(Value::Number(l)), Some(Value::Number(r))) => compare_numbers(l, r),
        (Some(Value::String(l)), Some(Value::String(r))) => l.cmp(r),
        (Some(Value::Array(l)), Some(Value::Array(r))) => {
            for (l, r) in l.iter().zip(r.iter()) {
                let ord = compare_values(Some(l), Some(r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            l.len().cmp(&r.len())
        }
        // Objects have no natural order; use their serialized form so that the order is at least total.
        (Some(l @ Value::Object(_)), Some(r @ Value::Object(_))) => l.to_string().cmp(&r.to_string()),
        _ => Ordering::Equal,
    }
}

fn compare_numbers(left: &serde_json::Number, right: &serde_json::Number) -> Ordering {
    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        return l.cmp(&r);
    }
    if let (Some(l), Some(r)) = (left.as_u64(), right.as_u64()) {
        return l.cmp(&r);
    }
    let l = left.as_f64().unwrap_or(f64::NAN);
    let r = right.as_f64().unwrap_or(f64::NAN);
    l.total_cmp(&r)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn types_order_by_rank() {
        let ordered = [
            None,
            Some(json!(null)),
            Some(json!(false)),
            Some(json!(true)),
            Some(json!(-1)),
            Some(json!(2.5)),
            Some(json!("a")),
            Some(json!("b")),
            Some(json!([1])),
            Some(json!({ "a": 1 })),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(
                compare_values(pair[0].as_ref(), pair[1].as_ref()),
                Ordering::Less,
                "{:?} should sort before {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn mixed_integer_and_float() {
        assert_eq!(
            compare_values(Some(&json!(2)), Some(&json!(2.5))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&json!(3.0)), Some(&json!(3))),
            Ordering::Equal
        );
        assert_eq!(
            compare_values(Some(&json!(u64::MAX)), Some(&json!(1))),
            Ordering::Greater
        );
    }

    #[test]
    fn arrays_compare_elementwise_then_by_length() {
        assert_eq!(
            compare_values(Some(&json!([1, 2])), Some(&json!([1, 3]))),
            Ordering::Less
        );
        assert_eq!(
            compare_values(Some(&json!([1, 2])), Some(&json!([1]))),
            Ordering::Greater
        );
    }

    #[test]
    fn undefined_equals_undefined() {
        assert_eq!(compare_values(None, None), Ordering::Equal);
    }
}

//! Structured value helpers
//!
//! Document data is a `serde_json::Value` whose root is always a mapping.

use serde_json::{Map, Number, Value};

/// Fresh, empty document data
pub fn empty_document() -> Value {
    Value::Object(Map::new())
}

/// Deep structural equality used to suppress redundant writes.
///
/// Differs from `Value`'s own `PartialEq` only for numbers: `1` and `1.0`
/// are the same value here, since the stores we mirror do not keep the
/// integer/float distinction stable across a round trip.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => false,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    match (x.is_f64(), y.is_f64()) {
        (false, false) => match (x.as_i64(), y.as_i64()) {
            (Some(l), Some(r)) => l == r,
            _ => x.as_u64().is_some() && x.as_u64() == y.as_u64(),
        },
        (true, true) => x.as_f64() == y.as_f64(),
        (false, true) => integer_equals_float(x, y.as_f64()),
        (true, false) => integer_equals_float(y, x.as_f64()),
    }
}

/// Exact comparison; no rounding of the integer through `f64`
fn integer_equals_float(int: &Number, float: Option<f64>) -> bool {
    // 2^63 and 2^64 are exactly representable
    const I64_END: f64 = 9_223_372_036_854_775_808.0;
    const U64_END: f64 = 18_446_744_073_709_551_616.0;

    let Some(f) = float else {
        return false;
    };
    if !f.is_finite() || f.fract() != 0.0 {
        return false;
    }
    if let Some(i) = int.as_i64() {
        return (-I64_END..I64_END).contains(&f) && f as i64 == i;
    }
    match int.as_u64() {
        Some(u) => (0.0..U64_END).contains(&f) && f as u64 == u,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn integer_and_float_forms_are_equal() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!(1.5)));
        assert!(!values_equal(&json!(1), &json!("1")));
    }

    #[test]
    fn large_integers_are_compared_exactly() {
        assert!(!values_equal(&json!(9007199254740993_i64), &json!(9007199254740992.0)));
        assert!(values_equal(&json!(9007199254740992_i64), &json!(9007199254740992.0)));
        assert!(!values_equal(&json!(u64::MAX), &json!(18446744073709551616.0)));
        assert!(values_equal(&json!(-3), &json!(-3.0)));
        assert!(!values_equal(&json!(u64::MAX), &json!(-1)));
        assert!(values_equal(&json!(u64::MAX), &json!(u64::MAX)));
    }

    #[test]
    fn mapping_order_is_irrelevant() {
        let a = json!({"x": 1, "y": [1, {"z": null}]});
        let b = json!({"y": [1.0, {"z": null}], "x": 1});
        assert!(values_equal(&a, &b));
    }

    #[test]
    fn structural_differences_are_detected() {
        assert!(!values_equal(&json!([1, 2]), &json!([2, 1])));
        assert!(!values_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(!values_equal(&json!({"a": null}), &json!({})));
        assert!(!values_equal(&json!(null), &json!(false)));
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-z]{0,6}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn equality_is_reflexive(v in arb_value()) {
            prop_assert!(values_equal(&v, &v.clone()));
        }

        #[test]
        fn agrees_with_partial_eq_without_floats(a in arb_value(), b in arb_value()) {
            prop_assert_eq!(values_equal(&a, &b), a == b);
        }
    }
}

use crate::collation::Collation;
use crate::types::{LogicalType, MismatchKind};
use crate::value::{PhysicalType, Value};
use std::cmp::Ordering;

/// The result of [`compare`]. Unlike `std::cmp::Ordering`, a fourth case
/// exists: two values that cannot be ordered at all (chiefly, anything
/// involving `NULL` outside of `IS`/`IS NOT`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareResult {
    Less,
    Equal,
    Greater,
    Incomparable,
}

impl CompareResult {
    pub fn from_ordering(o: Ordering) -> Self {
        match o {
            Ordering::Less => CompareResult::Less,
            Ordering::Equal => CompareResult::Equal,
            Ordering::Greater => CompareResult::Greater,
        }
    }

    pub fn is_comparable(self) -> bool {
        !matches!(self, CompareResult::Incomparable)
    }
}

/// Where `NULL` sorts relative to non-null values in an explicit ordering
/// (`ORDER BY`, index scans). `compare` itself never consults this --
/// see its own doc comment -- it is only for callers building a total
/// order over rows that may contain NULLs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullOrdering {
    First,
    Last,
}

/// Compares two values under an optional text `collation` (ignored unless
/// both sides are `Text`). `NULL` compares `Incomparable` to everything,
/// including another `NULL` -- per §4.1, ordering code that needs NULLs
/// placed relative to other values uses [`order_key`] instead, which takes
/// an explicit [`NullOrdering`].
///
/// Numeric comparisons promote `Integer`/`BigInt`/`Real` onto a common
/// type before comparing. A `Text` compared against a number is first
/// tried as a strict numeric parse of the text; if that fails, the
/// comparison falls back to lexical (collated) text comparison, treating
/// the number as its `Display` text. `Json` values compare `Equal` only
/// under canonical structural equality and `Incomparable` otherwise
/// (JSON has no total order). `Temporal` values compare as points on the
/// timeline via their ISO-8601 text, which is lexically ordered for
/// well-formed literals of the same kind.
pub fn compare(a: &Value, b: &Value, collation: Option<&Collation>) -> CompareResult {
    use Value::*;
    match (a, b) {
        (Null, _) | (_, Null) => CompareResult::Incomparable,
        (Boolean(x), Boolean(y)) => CompareResult::from_ordering(x.cmp(y)),
        (Json(x), Json(y)) => {
            if json_structural_eq(x, y) {
                CompareResult::Equal
            } else {
                CompareResult::Incomparable
            }
        }
        (Json(_), _) | (_, Json(_)) => CompareResult::Incomparable,
        (Temporal(x), Temporal(y)) if x.kind == y.kind => CompareResult::from_ordering(x.as_str().cmp(y.as_str())),
        (Temporal(_), Temporal(_)) => CompareResult::Incomparable,
        (Blob(x), Blob(y)) => CompareResult::from_ordering(x.cmp(y)),
        (Text(x), Text(y)) => {
            let col = collation.cloned().unwrap_or_default();
            CompareResult::from_ordering(col.compare(x, y))
        }
        (Text(t), other) | (other, Text(t)) if other.as_f64().is_some() => {
            if let Ok(parsed) = t.trim().parse::<f64>() {
                let n = other.as_f64().unwrap();
                let (lhs, rhs) = if matches!(a, Text(_)) { (parsed, n) } else { (n, parsed) };
                return CompareResult::from_ordering(lhs.partial_cmp(&rhs).unwrap_or(Ordering::Equal));
            }
            let col = collation.cloned().unwrap_or_default();
            let other_text = other.to_string();
            let (lhs, rhs) = if matches!(a, Text(_)) {
                (t.as_str(), other_text.as_str())
            } else {
                (other_text.as_str(), t.as_str())
            };
            CompareResult::from_ordering(col.compare(lhs, rhs))
        }
        _ => {
            let (x, y) = match coerce_for_arithmetic(a, b) {
                Ok(pair) => pair,
                Err(_) => return CompareResult::Incomparable,
            };
            match (x, y) {
                (Integer(x), Integer(y)) => CompareResult::from_ordering(x.cmp(&y)),
                (BigInt(x), BigInt(y)) => CompareResult::from_ordering(x.cmp(&y)),
                (Real(x), Real(y)) => CompareResult::from_ordering(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
                _ => CompareResult::Incomparable,
            }
        }
    }
}

fn json_structural_eq(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    use serde_json::Value as J;
    match (a, b) {
        (J::Object(x), J::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|v2| json_structural_eq(v, v2)))
        }
        (J::Array(x), J::Array(y)) => x.len() == y.len() && x.iter().zip(y).all(|(v, v2)| json_structural_eq(v, v2)),
        _ => a == b,
    }
}

/// A total order suitable for `ORDER BY`/index key construction: `NULL`
/// sorts according to `nulls`, and non-null values fall back to
/// [`compare`] (treated as `Equal` for any residual `Incomparable`, which
/// cannot arise once both sides are non-null and of compatible type).
pub fn order_key(a: &Value, b: &Value, collation: Option<&Collation>, nulls: NullOrdering) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => match nulls {
            NullOrdering::First => Ordering::Less,
            NullOrdering::Last => Ordering::Greater,
        },
        (false, true) => match nulls {
            NullOrdering::First => Ordering::Greater,
            NullOrdering::Last => Ordering::Less,
        },
        (false, false) => match compare(a, b, collation) {
            CompareResult::Less => Ordering::Less,
            CompareResult::Greater => Ordering::Greater,
            CompareResult::Equal | CompareResult::Incomparable => Ordering::Equal,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot coerce {0} and {1} for arithmetic")]
pub struct CoercionError(PhysicalType, PhysicalType);

/// Promotes two numeric values onto a common representation: if either is
/// `Real`, both become `Real`; otherwise if either is `BigInt`, both
/// become `BigInt`; otherwise both stay `Integer`. Non-numeric inputs are
/// rejected.
pub fn coerce_for_arithmetic(a: &Value, b: &Value) -> Result<(Value, Value), CoercionError> {
    use Value::*;
    let err = || {
        CoercionError(
            a.type_of().unwrap_or(PhysicalType::Boolean),
            b.type_of().unwrap_or(PhysicalType::Boolean),
        )
    };
    let is_numeric = |v: &Value| matches!(v, Integer(_) | BigInt(_) | Real(_));
    if !is_numeric(a) || !is_numeric(b) {
        return Err(err());
    }
    if matches!(a, Real(_)) || matches!(b, Real(_)) {
        return Ok((Real(to_f64(a)), Real(to_f64(b))));
    }
    if matches!(a, BigInt(_)) || matches!(b, BigInt(_)) {
        return Ok((BigInt(to_i128(a)), BigInt(to_i128(b))));
    }
    Ok((a.clone(), b.clone()))
}

/// Like [`coerce_for_arithmetic`], but also allows a `Text`/numeric pair
/// through unmodified -- [`compare`] handles the parse-then-lexical
/// fallback for that case itself, so coercion here is a no-op for text.
pub fn coerce_for_comparison(a: &Value, b: &Value) -> Result<(Value, Value), CoercionError> {
    if matches!(a, Value::Text(_)) || matches!(b, Value::Text(_)) {
        return Ok((a.clone(), b.clone()));
    }
    coerce_for_arithmetic(a, b)
}

fn to_f64(v: &Value) -> f64 {
    match v {
        Value::Integer(i) => *i as f64,
        Value::BigInt(i) => *i as f64,
        Value::Real(r) => *r,
        _ => unreachable!("checked numeric above"),
    }
}

fn to_i128(v: &Value) -> i128 {
    match v {
        Value::Integer(i) => *i as i128,
        Value::BigInt(i) => *i,
        _ => unreachable!("checked numeric above"),
    }
}

/// Validates that `value`'s physical type matches `ty.physical` (`NULL` is
/// always allowed through a type check; it is `ty.nullable` that governs
/// whether a `NULL` is actually acceptable at the point of use, e.g. an
/// INSERT into a `NOT NULL` column).
pub fn validate_against(value: &Value, ty: &LogicalType) -> Result<(), MismatchKind> {
    match value.type_of() {
        None if !ty.nullable => Err(MismatchKind::UnexpectedNull),
        None => Ok(()),
        Some(found) if found == ty.physical => Ok(()),
        Some(found) => Err(MismatchKind::WrongPhysicalType {
            expected: ty.physical,
            found,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{TemporalKind, TemporalValue};

    #[test]
    fn null_is_incomparable_to_anything() {
        assert_eq!(compare(&Value::Null, &Value::Integer(1), None), CompareResult::Incomparable);
        assert_eq!(compare(&Value::Null, &Value::Null, None), CompareResult::Incomparable);
    }

    #[test]
    fn integer_real_promotion() {
        assert_eq!(compare(&Value::Integer(1), &Value::Real(1.0), None), CompareResult::Equal);
        assert_eq!(compare(&Value::Integer(2), &Value::Real(1.5), None), CompareResult::Greater);
    }

    #[test]
    fn text_number_parses_before_lexical_fallback() {
        assert_eq!(compare(&Value::Text("10".into()), &Value::Integer(9), None), CompareResult::Greater);
        // "abc" does not parse as a number, falls back to lexical vs the number's display text "9".
        assert_eq!(
            compare(&Value::Text("abc".into()), &Value::Integer(9), None).is_comparable(),
            true
        );
    }

    #[test]
    fn json_structural_equality_ignores_key_order() {
        let a = Value::Json(serde_json::json!({"x": 1, "y": [1, 2]}));
        let b = Value::Json(serde_json::json!({"y": [1, 2], "x": 1}));
        assert_eq!(compare(&a, &b, None), CompareResult::Equal);
    }

    #[test]
    fn temporal_orders_as_timeline_points() {
        let a = Value::Temporal(TemporalValue::parse(TemporalKind::Date, "2024-01-01").unwrap());
        let b = Value::Temporal(TemporalValue::parse(TemporalKind::Date, "2024-06-01").unwrap());
        assert_eq!(compare(&a, &b, None), CompareResult::Less);
    }

    #[test]
    fn order_key_places_nulls_per_caller_request() {
        assert_eq!(order_key(&Value::Null, &Value::Integer(1), None, NullOrdering::Last), Ordering::Greater);
        assert_eq!(order_key(&Value::Null, &Value::Integer(1), None, NullOrdering::First), Ordering::Less);
    }

    #[test]
    fn validate_against_rejects_null_for_not_null_column() {
        let ty = LogicalType::not_null(PhysicalType::Integer);
        assert!(validate_against(&Value::Null, &ty).is_err());
        assert!(validate_against(&Value::Integer(1), &ty).is_ok());
    }
}

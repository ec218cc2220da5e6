//! Key comparison for the primary and secondary trees (`spec.md` §3, §4.7
//! invariant 5: "a committed table's primary tree is strictly ordered by
//! the declared key comparator -- lexicographic over column collations").

use lucidb_sats::{order_key, Collation, NullOrdering, Value};
use std::cmp::Ordering;

/// A key extracted from a row: the values of its key columns, in the
/// key's declared order. Used both for primary keys and secondary index
/// keys -- the two differ only in which columns they project and which
/// [`KeyComparator`] orders them.
#[derive(Clone, Debug, PartialEq)]
pub struct RowKey(pub Vec<Value>);

impl RowKey {
    pub fn from_row(row: &[Value], cols: &[usize]) -> Self {
        Self(cols.iter().map(|&i| row[i].clone()).collect())
    }
}

/// Orders [`RowKey`]s lexicographically, one [`Collation`] per key
/// column. NULLs sort first within a column, matching SQL's common
/// index-ordering convention; this is a storage-ordering choice, not the
/// three-valued comparison semantics of `compare()` in `lucidb-sats`
/// (which remains `Incomparable` for NULL at the expression level).
#[derive(Clone, Debug)]
pub struct KeyComparator {
    pub collations: Vec<Collation>,
}

impl KeyComparator {
    pub fn new(collations: Vec<Collation>) -> Self {
        Self { collations }
    }

    pub fn binary(arity: usize) -> Self {
        Self::new(vec![Collation::Binary; arity])
    }

    pub fn compare(&self, a: &RowKey, b: &RowKey) -> Ordering {
        for (i, (x, y)) in a.0.iter().zip(b.0.iter()).enumerate() {
            let col = self.collations.get(i);
            let ord = order_key(x, y, col, NullOrdering::First);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.0.len().cmp(&b.0.len())
    }
}

/// One side of a range-scan bound (§6 `FilterInfo`'s lower/upper
/// constraints), with an explicit inclusive/exclusive flag.
#[derive(Clone, Debug, PartialEq)]
pub enum Bound {
    Unbounded,
    Included(Vec<Value>),
    Excluded(Vec<Value>),
}

/// The bounds a scan is restricted to, plus the direction to walk the
/// tree in. Descending scans reverse both the comparator and which bound
/// is checked first, per §4.7's "descending scans reverse the comparator
/// and the bound semantics".
#[derive(Clone, Debug, PartialEq)]
pub struct ScanBounds {
    pub lower: Bound,
    pub upper: Bound,
    pub descending: bool,
}

impl Default for ScanBounds {
    fn default() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            descending: false,
        }
    }
}

impl ScanBounds {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn equality(key: Vec<Value>) -> Self {
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
            descending: false,
        }
    }

    /// Whether `key` falls within the bounds, ignoring `descending`
    /// (admission does not depend on scan direction, only the order in
    /// which admitted keys are yielded does).
    pub fn admits(&self, key: &RowKey, cmp: &KeyComparator) -> bool {
        let lower_ok = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(v) => cmp.compare(key, &RowKey(v.clone())) != Ordering::Less,
            Bound::Excluded(v) => cmp.compare(key, &RowKey(v.clone())) == Ordering::Greater,
        };
        let upper_ok = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(v) => cmp.compare(key, &RowKey(v.clone())) != Ordering::Greater,
            Bound::Excluded(v) => cmp.compare(key, &RowKey(v.clone())) == Ordering::Less,
        };
        lower_ok && upper_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_comparator_orders_integers_numerically() {
        let cmp = KeyComparator::binary(1);
        let a = RowKey(vec![Value::Integer(1)]);
        let b = RowKey(vec![Value::Integer(2)]);
        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn nocase_collation_orders_case_insensitively() {
        let cmp = KeyComparator::new(vec![Collation::NoCase]);
        let a = RowKey(vec![Value::Text("Abc".into())]);
        let b = RowKey(vec![Value::Text("abc".into())]);
        assert_eq!(cmp.compare(&a, &b), Ordering::Equal);
    }

    #[test]
    fn bounds_admit_inclusive_and_exclusive_correctly() {
        let cmp = KeyComparator::binary(1);
        let bounds = ScanBounds {
            lower: Bound::Included(vec![Value::Integer(1)]),
            upper: Bound::Excluded(vec![Value::Integer(5)]),
            descending: false,
        };
        assert!(bounds.admits(&RowKey(vec![Value::Integer(1)]), &cmp));
        assert!(bounds.admits(&RowKey(vec![Value::Integer(4)]), &cmp));
        assert!(!bounds.admits(&RowKey(vec![Value::Integer(5)]), &cmp));
        assert!(!bounds.admits(&RowKey(vec![Value::Integer(0)]), &cmp));
    }
}

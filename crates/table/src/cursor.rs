//! The read-path merge cursor (`spec.md` §4.7 "Read path (merge cursor)"):
//! merges one layer's modifications against a parent view (itself
//! possibly the result of merging further down the chain), applying the
//! six numbered rules verbatim. Generic over the key/value pair so the
//! same algorithm drives both the primary tree (`RowKey -> PrimaryEntry`)
//! and every secondary tree (`(RowKey, RowId) -> ()`).

use std::cmp::Ordering;

/// Merges `mods` (sorted ascending by key) over `parent` (also sorted
/// ascending), applying:
///
/// 1. both exhausted -> end
/// 2. only parent -> yield parent entry
/// 3. only mod -> yield unless a deletion marker (`None`)
/// 4. keys equal -> mod shadows parent
/// 5. mod key first -> yield mod (unless deletion)
/// 6. parent key first -> yield parent
///
/// `excluded(key, value)` additionally drops a candidate whose `RowId` is
/// in this layer's explicit-deletion set, regardless of which side it
/// came from. The result is sorted ascending; reversing for a descending
/// scan is the caller's job (`key::ScanBounds::descending`).
pub fn merge<K, V>(
    mods: &[(K, Option<V>)],
    parent: &[(K, V)],
    cmp: impl Fn(&K, &K) -> Ordering,
    excluded: impl Fn(&K, &V) -> bool,
) -> Vec<(K, V)>
where
    K: Clone,
    V: Clone,
{
    let mut out = Vec::with_capacity(mods.len().max(parent.len()));
    let mut mi = 0;
    let mut pi = 0;
    let push = |out: &mut Vec<(K, V)>, k: K, v: V| {
        if !excluded(&k, &v) {
            out.push((k, v));
        }
    };
    loop {
        match (mods.get(mi), parent.get(pi)) {
            (None, None) => break, // rule 1
            (None, Some((pk, pv))) => {
                push(&mut out, pk.clone(), pv.clone()); // rule 2
                pi += 1;
            }
            (Some((mk, mv)), None) => {
                if let Some(v) = mv {
                    push(&mut out, mk.clone(), v.clone()); // rule 3
                }
                mi += 1;
            }
            (Some((mk, mv)), Some((pk, pv))) => match cmp(mk, pk) {
                Ordering::Equal => {
                    if let Some(v) = mv {
                        push(&mut out, mk.clone(), v.clone()); // rule 4
                    }
                    mi += 1;
                    pi += 1;
                }
                Ordering::Less => {
                    if let Some(v) = mv {
                        push(&mut out, mk.clone(), v.clone()); // rule 5
                    }
                    mi += 1;
                }
                Ordering::Greater => {
                    push(&mut out, pk.clone(), pv.clone()); // rule 6
                    pi += 1;
                }
            },
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::RowKey;
    use crate::layer::PrimaryEntry;
    use lucidb_primitives::RowId;
    use lucidb_sats::{Row, Value};
    use std::collections::HashSet;

    fn entry(id: u64, v: i64) -> PrimaryEntry {
        PrimaryEntry {
            row_id: RowId::new(id),
            row: Row::new(vec![Value::Integer(v)]),
        }
    }

    fn key(v: i64) -> RowKey {
        RowKey(vec![Value::Integer(v)])
    }

    fn no_exclusions(_: &RowKey, _: &PrimaryEntry) -> bool {
        false
    }

    #[test]
    fn mod_shadows_equal_parent_key() {
        let parent = vec![(key(1), entry(1, 100))];
        let mods = vec![(key(1), Some(entry(1, 999)))];
        let merged = merge(&mods, &parent, |a, b| a.0.cmp(&b.0), no_exclusions);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].1.row.0[0], Value::Integer(999));
    }

    #[test]
    fn deletion_marker_removes_parent_row() {
        let parent = vec![(key(1), entry(1, 100))];
        let mods = vec![(key(1), None)];
        let merged = merge(&mods, &parent, |a, b| a.0.cmp(&b.0), no_exclusions);
        assert!(merged.is_empty());
    }

    #[test]
    fn disjoint_keys_interleave_in_order() {
        let parent = vec![(key(1), entry(1, 1)), (key(3), entry(3, 3))];
        let mods = vec![(key(2), Some(entry(2, 2)))];
        let merged = merge(&mods, &parent, |a, b| a.0.cmp(&b.0), no_exclusions);
        let values: Vec<_> = merged.iter().map(|(_, e)| e.row.0[0].clone()).collect();
        assert_eq!(values, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
    }

    #[test]
    fn explicit_rowid_deletion_drops_row_even_without_key_level_marker() {
        let parent = vec![(key(1), entry(1, 1))];
        let mut deleted = HashSet::new();
        deleted.insert(RowId::new(1));
        let merged = merge(&[], &parent, |a, b| a.0.cmp(&b.0), |_, e: &PrimaryEntry| {
            deleted.contains(&e.row_id)
        });
        assert!(merged.is_empty());
    }
}

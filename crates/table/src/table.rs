//! [`Table`]: the layer chain plus the write path and the
//! savepoint/commit/rollback operations of `spec.md` §4.7.

use crate::cursor;
use crate::error::{TableError, TableResult};
use crate::events::RowChange;
use crate::key::{KeyComparator, RowKey, ScanBounds};
use crate::layer::{BaseLayer, IndexMod, PrimaryEntry, TransactionLayer};
use lucidb_primitives::{IndexId, RowId};
use lucidb_sats::{Collation, Row, Value};
use lucidb_schema::{IndexDef, IndexKind, TableSchema};
use std::collections::HashMap;

struct IndexInfo {
    id: IndexId,
    cols: Vec<usize>,
    cmp: KeyComparator,
    unique: bool,
}

/// A single table's full layer chain: a [`BaseLayer`] of committed data
/// topped by a stack of [`TransactionLayer`]s, one per open
/// `BEGIN`/`SAVEPOINT`. All reads merge the chain (`scan`/`index_scan`);
/// all writes land on `tx_stack.last_mut()`.
pub struct Table {
    pub schema: TableSchema,
    pk_cols: Vec<usize>,
    pk_cmp: KeyComparator,
    indexes: Vec<IndexInfo>,
    base: BaseLayer,
    tx_stack: Vec<TransactionLayer>,
    next_row_id: u64,
    freelist: Vec<RowId>,
}

impl Table {
    /// `key_collation` resolves the [`Collation`] for a given column
    /// (defaulting callers pass `Collation::Binary`); the table does not
    /// reach into a schema catalog itself to look this up (§4.1/§4.2 are
    /// a separate crate this one does not depend on).
    pub fn new(schema: TableSchema, column_collation: impl Fn(lucidb_primitives::ColId) -> Collation) -> Self {
        let pk = schema.effective_primary_key();
        let pk_cols: Vec<usize> = pk
            .iter()
            .map(|c| schema.columns.iter().position(|col| col.col_id == c).expect("pk column exists"))
            .collect();
        let pk_cmp = KeyComparator::new(pk.iter().map(&column_collation).collect());

        let indexes = schema
            .indexes
            .iter()
            .map(|idx: &IndexDef| {
                let cols: Vec<usize> = idx
                    .columns
                    .iter()
                    .map(|c| schema.columns.iter().position(|col| col.col_id == c).expect("index column exists"))
                    .collect();
                IndexInfo {
                    id: idx.index_id,
                    cmp: KeyComparator::new(idx.columns.iter().map(&column_collation).collect()),
                    unique: matches!(idx.kind, IndexKind::Unique),
                    cols,
                }
            })
            .collect::<Vec<_>>();
        let index_ids: Vec<IndexId> = indexes.iter().map(|i| i.id).collect();

        Self {
            schema,
            pk_cols,
            pk_cmp,
            indexes,
            base: BaseLayer::new(&index_ids),
            tx_stack: Vec::new(),
            next_row_id: 0,
            freelist: Vec::new(),
        }
    }

    pub fn in_transaction(&self) -> bool {
        !self.tx_stack.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.effective_primary_view().len()
    }

    // -- transaction lifecycle --------------------------------------------

    pub fn begin(&mut self) {
        let index_ids: Vec<IndexId> = self.indexes.iter().map(|i| i.id).collect();
        self.tx_stack.push(TransactionLayer::new(None, &index_ids));
    }

    pub fn savepoint(&mut self, name: impl Into<String>) {
        let index_ids: Vec<IndexId> = self.indexes.iter().map(|i| i.id).collect();
        self.tx_stack.push(TransactionLayer::new(Some(name.into()), &index_ids));
    }

    /// Folds the named savepoint's modifications into its parent
    /// (`self.tx_stack[pos - 1]`, or, if it is the bottommost layer, into
    /// itself with its name cleared -- there is no transaction layer
    /// below it to fold into, only the base, which release must not
    /// touch). Layers above the target are left exactly where they are.
    pub fn release_savepoint(&mut self, name: &str) -> TableResult<()> {
        let pos = self.savepoint_position(name)?;
        let child = self.tx_stack.remove(pos);
        if pos == 0 {
            self.tx_stack.insert(0, TransactionLayer { name: None, ..child });
        } else {
            let index_ids: Vec<IndexId> = self.indexes.iter().map(|i| i.id).collect();
            let cmp = self.pk_cmp.clone();
            let index_cmps: Vec<KeyComparator> = self.indexes.iter().map(|i| i.cmp.clone()).collect();
            fold_tx_into_tx(&mut self.tx_stack[pos - 1], child, &cmp, &index_ids, &index_cmps);
        }
        Ok(())
    }

    pub fn rollback_to_savepoint(&mut self, name: &str) -> TableResult<()> {
        let pos = self.savepoint_position(name)?;
        for layer in self.tx_stack.drain(pos..) {
            self.freelist.extend(layer.allocated_row_ids);
        }
        Ok(())
    }

    fn savepoint_position(&self, name: &str) -> TableResult<usize> {
        self.tx_stack
            .iter()
            .position(|l| l.name.as_deref() == Some(name))
            .ok_or_else(|| TableError::UnknownSavepoint(name.to_string()))
    }

    /// Folds every open transaction layer into the base atomically and
    /// returns the change events accumulated across all of them, in
    /// commit order. The caller (the transaction coordinator) is
    /// responsible for having already drained deferred constraints
    /// before calling this -- `Table` has no notion of constraint
    /// expressions, only of layers.
    pub fn commit(&mut self) -> TableResult<Vec<RowChange>> {
        if self.tx_stack.is_empty() {
            return Err(TableError::NoActiveTransaction);
        }
        let layers = std::mem::take(&mut self.tx_stack);
        let mut events = Vec::new();
        for layer in layers {
            events.extend(layer.events.iter().cloned());
            self.fold_into_base(layer);
        }
        Ok(events)
    }

    pub fn rollback(&mut self) -> TableResult<()> {
        if self.tx_stack.is_empty() {
            return Err(TableError::NoActiveTransaction);
        }
        for layer in self.tx_stack.drain(..) {
            self.freelist.extend(layer.allocated_row_ids);
        }
        Ok(())
    }

    fn fold_into_base(&mut self, layer: TransactionLayer) {
        for (key, modval) in layer.primary_mods.iter() {
            match modval {
                Some(entry) => {
                    self.base.primary.insert(key.clone(), entry.clone(), &|a, b| self.pk_cmp.compare(a, b));
                }
                None => {
                    self.base.primary.remove(key, &|a, b| self.pk_cmp.compare(a, b));
                }
            }
        }
        // explicit rowid deletions: drop any base primary entry whose rowid
        // was deleted in this layer, even if no key-level marker exists
        // (e.g. the key was already overwritten by a later insert first).
        if !layer.deleted_row_ids.is_empty() {
            let stale: Vec<RowKey> = self
                .base
                .primary
                .iter()
                .filter(|(_, e)| layer.deleted_row_ids.contains(&e.row_id))
                .map(|(k, _)| k.clone())
                .collect();
            for key in stale {
                self.base.primary.remove(&key, &|a, b| self.pk_cmp.compare(a, b));
            }
        }
        for info in &self.indexes {
            let cmp = info.cmp.clone();
            let entries: Vec<_> = layer.secondary_ref(info.id).iter().map(|(k, v)| (k.clone(), *v)).collect();
            for ((ikey, row_id), m) in entries {
                let tree = self.base.secondary_mut(info.id);
                match m {
                    IndexMod::Add => {
                        tree.insert((ikey, row_id), (), &|a, b| index_key_cmp(&cmp, a, b));
                    }
                    IndexMod::Drop => {
                        tree.remove(&(ikey, row_id), &|a, b| index_key_cmp(&cmp, a, b));
                    }
                }
            }
        }
    }

    // -- reads --------------------------------------------------------------

    fn effective_primary_view(&self) -> Vec<(RowKey, PrimaryEntry)> {
        let mut view: Vec<(RowKey, PrimaryEntry)> = self.base.primary.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for layer in &self.tx_stack {
            let mods: Vec<(RowKey, Option<PrimaryEntry>)> = layer.primary_mods.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            view = cursor::merge(&mods, &view, |a, b| self.pk_cmp.compare(a, b), |_, e: &PrimaryEntry| {
                layer.deleted_row_ids.contains(&e.row_id)
            });
        }
        view
    }

    fn effective_secondary_view(&self, info: &IndexInfo) -> Vec<((RowKey, RowId), ())> {
        let mut view: Vec<((RowKey, RowId), ())> = self.base.secondary_ref(info.id).iter().map(|(k, v)| (k.clone(), *v)).collect();
        for layer in &self.tx_stack {
            let mods: Vec<((RowKey, RowId), Option<()>)> = layer
                .secondary_ref(info.id)
                .iter()
                .map(|(k, m)| (k.clone(), matches!(m, IndexMod::Add).then_some(())))
                .collect();
            let deleted = &layer.deleted_row_ids;
            view = cursor::merge(
                &mods,
                &view,
                |a, b| index_key_cmp(&info.cmp, a, b),
                |k, _| deleted.contains(&k.1),
            );
        }
        view
    }

    pub fn scan(&self, bounds: &ScanBounds) -> Vec<(RowId, Row)> {
        let view = self.effective_primary_view();
        let mut filtered: Vec<_> = view.into_iter().filter(|(k, _)| bounds.admits(k, &self.pk_cmp)).collect();
        if bounds.descending {
            filtered.reverse();
        }
        filtered.into_iter().map(|(_, e)| (e.row_id, e.row)).collect()
    }

    pub fn get_by_key(&self, key: &[Value]) -> Option<(RowId, Row)> {
        let view = self.effective_primary_view();
        let target = RowKey(key.to_vec());
        view.into_iter()
            .find(|(k, _)| self.pk_cmp.compare(k, &target) == std::cmp::Ordering::Equal)
            .map(|(_, e)| (e.row_id, e.row))
    }

    pub fn index_scan(&self, index_id: IndexId, bounds: &ScanBounds) -> Vec<(RowId, Row)> {
        let Some(info) = self.indexes.iter().find(|i| i.id == index_id) else {
            return Vec::new();
        };
        let primary_by_id: HashMap<RowId, Row> = self
            .effective_primary_view()
            .into_iter()
            .map(|(_, e)| (e.row_id, e.row))
            .collect();
        let view = self.effective_secondary_view(info);
        let admits = |ikey: &RowKey| bounds.admits(ikey, &info.cmp);
        let mut filtered: Vec<_> = view.into_iter().filter(|((ikey, _), _)| admits(ikey)).collect();
        if bounds.descending {
            filtered.reverse();
        }
        filtered
            .into_iter()
            .filter_map(|((_, row_id), _)| primary_by_id.get(&row_id).map(|row| (row_id, row.clone())))
            .collect()
    }

    // -- writes ---------------------------------------------------------------

    fn alloc_row_id(&mut self) -> RowId {
        let id = self.freelist.pop().unwrap_or_else(|| {
            let id = RowId::new(self.next_row_id);
            self.next_row_id += 1;
            id
        });
        if let Some(layer) = self.tx_stack.last_mut() {
            layer.allocated_row_ids.push(id);
        }
        id
    }

    fn key_of(&self, row: &Row) -> RowKey {
        RowKey::from_row(&row.0, &self.pk_cols)
    }

    fn index_key_of(&self, info: &IndexInfo, row: &Row) -> RowKey {
        RowKey::from_row(&row.0, &info.cols)
    }

    pub fn insert(&mut self, row: Row) -> TableResult<RowId> {
        if self.tx_stack.is_empty() {
            return Err(TableError::NoActiveTransaction);
        }
        let key = self.key_of(&row);
        if self.get_by_key(&key.0).is_some() {
            return Err(TableError::DuplicatePrimaryKey);
        }
        for info in &self.indexes {
            if info.unique {
                let ikey = self.index_key_of(info, &row);
                let existing = self.index_scan(
                    info.id,
                    &ScanBounds::equality(ikey.0.clone()),
                );
                if !existing.is_empty() {
                    return Err(TableError::DuplicateUniqueIndex(self.schema.indexes.iter().find(|i| i.index_id == info.id).unwrap().name.clone()));
                }
            }
        }
        let row_id = self.alloc_row_id();
        let entry = PrimaryEntry { row_id, row: row.clone() };
        let layer = self.tx_stack.last_mut().unwrap();
        layer.primary_mods.insert(key, Some(entry), &|a, b| self.pk_cmp.compare(a, b));
        for info in &self.indexes {
            let ikey = RowKey::from_row(&row.0, &info.cols);
            layer.secondary_mut(info.id).insert((ikey, row_id), IndexMod::Add, &|a, b| index_key_cmp(&info.cmp, a, b));
        }
        layer.events.push(RowChange::Insert { row_id, new_row: row });
        Ok(row_id)
    }

    pub fn delete_by_key(&mut self, key: &[Value]) -> TableResult<Row> {
        if self.tx_stack.is_empty() {
            return Err(TableError::NoActiveTransaction);
        }
        let (row_id, old_row) = self.get_by_key(key).ok_or(TableError::RowNotFound)?;
        let row_key = RowKey(key.to_vec());
        let layer_index = self.tx_stack.len() - 1;
        {
            let layer = &mut self.tx_stack[layer_index];
            layer.primary_mods.insert(row_key, None, &|a, b| self.pk_cmp.compare(a, b));
            layer.deleted_row_ids.insert(row_id);
        }
        for info in &self.indexes {
            let ikey = RowKey::from_row(&old_row.0, &info.cols);
            self.tx_stack[layer_index]
                .secondary_mut(info.id)
                .insert((ikey, row_id), IndexMod::Drop, &|a, b| index_key_cmp(&info.cmp, a, b));
        }
        self.tx_stack[layer_index].events.push(RowChange::Delete {
            row_id,
            old_row: old_row.clone(),
        });
        Ok(old_row)
    }

    /// UPDATE (§4.7 write path): a delete+insert if the primary key
    /// changes, else a primary overwrite plus a per-index diff.
    pub fn update(&mut self, key: &[Value], new_row: Row) -> TableResult<Row> {
        if self.tx_stack.is_empty() {
            return Err(TableError::NoActiveTransaction);
        }
        let (row_id, old_row) = self.get_by_key(key).ok_or(TableError::RowNotFound)?;
        let new_key = self.key_of(&new_row);
        let old_key = RowKey(key.to_vec());
        if self.pk_cmp.compare(&old_key, &new_key) != std::cmp::Ordering::Equal {
            self.delete_by_key(key)?;
            self.insert(new_row.clone())?;
            return Ok(old_row);
        }
        let layer_index = self.tx_stack.len() - 1;
        let entry = PrimaryEntry {
            row_id,
            row: new_row.clone(),
        };
        self.tx_stack[layer_index]
            .primary_mods
            .insert(new_key, Some(entry), &|a, b| self.pk_cmp.compare(a, b));
        for info in &self.indexes {
            let old_ikey = RowKey::from_row(&old_row.0, &info.cols);
            let new_ikey = RowKey::from_row(&new_row.0, &info.cols);
            if self.pk_cmp.compare(&old_ikey, &new_ikey) == std::cmp::Ordering::Equal {
                continue;
            }
            let layer = &mut self.tx_stack[layer_index];
            layer
                .secondary_mut(info.id)
                .insert((old_ikey, row_id), IndexMod::Drop, &|a, b| index_key_cmp(&info.cmp, a, b));
            layer
                .secondary_mut(info.id)
                .insert((new_ikey, row_id), IndexMod::Add, &|a, b| index_key_cmp(&info.cmp, a, b));
        }
        self.tx_stack[layer_index].events.push(RowChange::Update {
            row_id,
            old_row: old_row.clone(),
            new_row,
        });
        Ok(old_row)
    }
}

fn index_key_cmp(cmp: &KeyComparator, a: &(RowKey, RowId), b: &(RowKey, RowId)) -> std::cmp::Ordering {
    cmp.compare(&a.0, &b.0).then_with(|| a.1.value().cmp(&b.1.value()))
}

fn fold_tx_into_tx(parent: &mut TransactionLayer, child: TransactionLayer, pk_cmp: &KeyComparator, index_ids: &[IndexId], index_cmps: &[KeyComparator]) {
    for (key, val) in child.primary_mods.iter() {
        parent.primary_mods.insert(key.clone(), val.clone(), &|a, b| pk_cmp.compare(a, b));
    }
    parent.deleted_row_ids.extend(child.deleted_row_ids.iter().copied());
    parent.allocated_row_ids.extend(child.allocated_row_ids.iter().copied());
    parent.events.extend(child.events.iter().cloned());
    for (id, cmp) in index_ids.iter().zip(index_cmps.iter()) {
        let entries: Vec<_> = child.secondary_ref(*id).iter().map(|(k, v)| (k.clone(), *v)).collect();
        let tree = parent.secondary_mut(*id);
        for (k, v) in entries {
            tree.insert(k, v, &|a, b| index_key_cmp(cmp, a, b));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucidb_primitives::{ColId, TableId};
    use lucidb_sats::{LogicalType, PhysicalType};
    use lucidb_schema::ColumnDef;

    fn users_schema() -> TableSchema {
        TableSchema {
            table_id: TableId::new(0),
            schema_name: "main".into(),
            table_name: "users".into(),
            columns: vec![
                ColumnDef::new(ColId::new(0), "id", LogicalType::not_null(PhysicalType::Integer)),
                ColumnDef::new(ColId::new(1), "name", LogicalType::nullable(PhysicalType::Text)),
            ],
            primary_key: [ColId::new(0)].into(),
            indexes: vec![],
            checks: vec![],
            module_name: "memory".into(),
            module_args: String::new(),
        }
    }

    fn new_table() -> Table {
        Table::new(users_schema(), |_| Collation::Binary)
    }

    fn row(id: i64, name: &str) -> Row {
        Row::new(vec![Value::Integer(id), Value::Text(name.to_string())])
    }

    #[test]
    fn s1_basic_crud_round_trip() {
        let mut t = new_table();
        t.begin();
        t.insert(row(1, "Alice")).unwrap();
        t.insert(row(2, "Bob")).unwrap();
        t.commit().unwrap();
        let rows: Vec<_> = t.scan(&ScanBounds::full()).into_iter().map(|(_, r)| r).collect();
        assert_eq!(rows, vec![row(1, "Alice"), row(2, "Bob")]);
    }

    #[test]
    fn s4_savepoint_rollback_restores_prior_value() {
        let mut t = new_table();
        t.begin();
        t.insert(row(3, "Carol")).unwrap();
        t.savepoint("s1");
        t.update(&[Value::Integer(3)], row(3, "Z")).unwrap();
        t.rollback_to_savepoint("s1").unwrap();
        t.commit().unwrap();
        let (_, r) = t.get_by_key(&[Value::Integer(3)]).unwrap();
        assert_eq!(r, row(3, "Carol"));
    }

    #[test]
    fn duplicate_primary_key_is_rejected() {
        let mut t = new_table();
        t.begin();
        t.insert(row(1, "Alice")).unwrap();
        let err = t.insert(row(1, "Other")).unwrap_err();
        assert_eq!(err, TableError::DuplicatePrimaryKey);
    }

    #[test]
    fn rollback_discards_uncommitted_inserts() {
        let mut t = new_table();
        t.begin();
        t.insert(row(1, "Alice")).unwrap();
        t.rollback().unwrap();
        assert_eq!(t.row_count(), 0);
    }

    #[test]
    fn release_savepoint_keeps_modifications_but_not_as_a_separate_rollback_point() {
        let mut t = new_table();
        t.begin();
        t.insert(row(1, "Alice")).unwrap();
        t.savepoint("s1");
        t.update(&[Value::Integer(1)], row(1, "Bob")).unwrap();
        t.release_savepoint("s1").unwrap();
        assert!(t.rollback_to_savepoint("s1").is_err());
        t.commit().unwrap();
        let (_, r) = t.get_by_key(&[Value::Integer(1)]).unwrap();
        assert_eq!(r, row(1, "Bob"));
    }

    #[test]
    fn update_with_changed_key_moves_the_row() {
        let mut t = new_table();
        t.begin();
        t.insert(row(1, "Alice")).unwrap();
        t.update(&[Value::Integer(1)], row(2, "Alice")).unwrap();
        t.commit().unwrap();
        assert!(t.get_by_key(&[Value::Integer(1)]).is_none());
        assert_eq!(t.get_by_key(&[Value::Integer(2)]).unwrap().1, row(2, "Alice"));
    }

    #[test]
    fn events_are_not_produced_for_rolled_back_work() {
        let mut t = new_table();
        t.begin();
        t.insert(row(1, "Alice")).unwrap();
        t.rollback().unwrap();
        t.begin();
        t.insert(row(2, "Bob")).unwrap();
        let events = t.commit().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], RowChange::Insert { row_id, .. } if row_id.value() == 0));
    }
}

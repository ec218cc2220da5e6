//! Layer chain entities (`spec.md` §3 "Memory table entities", §4.7).

use crate::events::RowChange;
use crate::key::RowKey;
use crate::sorted_map::SortedMap;
use lucidb_primitives::{IndexId, RowId};
use lucidb_sats::Row;
use std::collections::HashSet;

/// One entry of the primary tree: a row plus the stable [`RowId`] it was
/// assigned on insert.
#[derive(Clone, Debug, PartialEq)]
pub struct PrimaryEntry {
    pub row_id: RowId,
    pub row: Row,
}

/// An add/drop marker in a secondary index's per-layer modification set,
/// keyed by `(IndexKey, RowId)` per §3/§4.7.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexMod {
    Add,
    Drop,
}

/// The committed state for one table: an ordered primary map and, per
/// secondary index, an ordered set of `(IndexKey, RowId)`. Exists for the
/// table's entire life; mutated only by [`crate::table::Table::commit`]'s
/// atomic fold.
#[derive(Default)]
pub struct BaseLayer {
    pub primary: SortedMap<RowKey, PrimaryEntry>,
    pub secondary: Vec<(IndexId, SortedMap<(RowKey, RowId), ()>)>,
}

impl BaseLayer {
    pub fn new(index_ids: &[IndexId]) -> Self {
        Self {
            primary: SortedMap::new(),
            secondary: index_ids.iter().map(|&id| (id, SortedMap::new())).collect(),
        }
    }

    pub fn secondary_mut(&mut self, index_id: IndexId) -> &mut SortedMap<(RowKey, RowId), ()> {
        &mut self.secondary.iter_mut().find(|(id, _)| *id == index_id).unwrap().1
    }

    pub fn secondary_ref(&self, index_id: IndexId) -> &SortedMap<(RowKey, RowId), ()> {
        &self.secondary.iter().find(|(id, _)| *id == index_id).unwrap().1
    }
}

/// One mutation atop a parent layer: the result of `BEGIN` or
/// `SAVEPOINT`. Per §3: a primary-modification map (`PrimaryKey -> Row |
/// DeletionMarker`), per-secondary Add/Drop sets, a set of explicitly
/// deleted `RowId`s, and a name if this layer is a savepoint.
#[derive(Default)]
pub struct TransactionLayer {
    pub name: Option<String>,
    /// `None` means "deleted here" (a `DeletionMarker`); `Some` is an
    /// insert or an overwrite of the parent's value.
    pub primary_mods: SortedMap<RowKey, Option<PrimaryEntry>>,
    pub secondary_mods: Vec<(IndexId, SortedMap<(RowKey, RowId), IndexMod>)>,
    pub deleted_row_ids: HashSet<RowId>,
    /// RowIds allocated in this layer; returned to the table's freelist
    /// if the layer is discarded (rollback), per the RowId-recycling
    /// supplement in `SPEC_FULL.md` §2.
    pub allocated_row_ids: Vec<RowId>,
    /// Change records produced by writes in this layer, emitted to
    /// subscribers only once the layer has folded all the way into the
    /// base layer via commit (§3 invariant 7).
    pub events: Vec<RowChange>,
}

impl TransactionLayer {
    pub fn new(name: Option<String>, index_ids: &[IndexId]) -> Self {
        Self {
            name,
            primary_mods: SortedMap::new(),
            secondary_mods: index_ids.iter().map(|&id| (id, SortedMap::new())).collect(),
            deleted_row_ids: HashSet::new(),
            allocated_row_ids: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn secondary_mut(&mut self, index_id: IndexId) -> &mut SortedMap<(RowKey, RowId), IndexMod> {
        &mut self.secondary_mods.iter_mut().find(|(id, _)| *id == index_id).unwrap().1
    }

    pub fn secondary_ref(&self, index_id: IndexId) -> &SortedMap<(RowKey, RowId), IndexMod> {
        &self.secondary_mods.iter().find(|(id, _)| *id == index_id).unwrap().1
    }
}

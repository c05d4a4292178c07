use std::{collections::HashMap, sync::Arc};

use sift_core::SymbolId;
use smallvec::SmallVec;

use crate::{state::same_state, stree::Stree, State};

// IDS
// ================================================================================================

/// Identifies one registered checker (one state family) within the engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub u16);

/// An interned variable name, valid until the end of the current function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameId(pub u32);

/// A per-function sm_state handle. All cross-references between sm_states
/// (`left`, `right`, `possible`) are ids into the same [`SmStore`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SmId(pub u32);

/// A captured state-tree snapshot. Pool ids increase with capture time, so
/// comparing ids tells which snapshot is older.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub u32);

// NAME INTERNER
// ================================================================================================

/// Per-function string interner. Dropped wholesale when the function ends,
/// like every other per-function allocation.
#[derive(Default)]
pub struct Interner {
    names: Vec<Arc<str>>,
    map: HashMap<Arc<str>, NameId>,
}

impl Interner {
    pub fn intern(&mut self, name: &str) -> NameId {
        if let Some(&id) = self.map.get(name) {
            return id;
        }
        let id = NameId(self.names.len() as u32);
        let owned: Arc<str> = Arc::from(name);
        self.names.push(owned.clone());
        self.map.insert(owned, id);
        id
    }

    pub fn resolve(&self, id: NameId) -> &str {
        &self.names[id.0 as usize]
    }

    /// Non-allocating lookup; `None` means the name was never tracked this
    /// function, so no state can exist for it either.
    pub fn lookup(&self, name: &str) -> Option<NameId> {
        self.map.get(name).copied()
    }

    pub fn clear(&mut self) {
        self.names.clear();
        self.map.clear();
    }
}

// SM STATES
// ================================================================================================

/// Identity key of a tracked variable within one checker's state family.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TrackerKey {
    pub owner: OwnerId,
    pub name: NameId,
    pub sym: Option<SymbolId>,
}

/// The engine's central record: one tracked variable's current abstract
/// value plus the provenance needed to re-derive it per branch later.
#[derive(Clone, Debug)]
pub struct SmState {
    pub owner: OwnerId,
    pub name: NameId,
    pub sym: Option<SymbolId>,
    pub state: Arc<State>,
    /// Line of the last update, for reports that point at the cause.
    pub line: u32,
    pub merged: bool,
    /// Produced by implied-value filtering rather than straight-line code.
    pub implied: bool,
    /// Size of the merge DAG below this record, counting this one.
    pub nr_children: u32,
    pub left: Option<SmId>,
    pub right: Option<SmId>,
    /// The snapshot this record was first captured into at a path join.
    /// Records created since the last join have no pool yet.
    pub pool: Option<PoolId>,
    /// Leaf records reachable through the merge DAG, deduplicated by state:
    /// "what could this variable have been on some path".
    pub possible: SmallVec<[SmId; 4]>,
}

impl SmState {
    pub fn key(&self) -> TrackerKey {
        TrackerKey { owner: self.owner, name: self.name, sym: self.sym }
    }
}

/// Per-function arena of sm_states. Nothing is ever freed individually; the
/// whole store resets when the function ends.
#[derive(Default)]
pub struct SmStore {
    items: Vec<SmState>,
}

impl SmStore {
    pub fn alloc(
        &mut self,
        owner: OwnerId,
        name: NameId,
        sym: Option<SymbolId>,
        state: Arc<State>,
        line: u32,
    ) -> SmId {
        let id = SmId(self.items.len() as u32);
        self.items.push(SmState {
            owner,
            name,
            sym,
            state,
            line,
            merged: false,
            implied: false,
            nr_children: 1,
            left: None,
            right: None,
            pool: None,
            possible: SmallVec::new(),
        });
        self.items[id.0 as usize].possible.push(id);
        id
    }

    pub fn alloc_raw(&mut self, sm: SmState) -> SmId {
        let id = SmId(self.items.len() as u32);
        self.items.push(sm);
        id
    }

    pub fn get(&self, id: SmId) -> &SmState {
        &self.items[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SmId) -> &mut SmState {
        &mut self.items[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Merges `extra` into `possible`, keeping it sorted by key and state
    /// so that possible-set equality is structural.
    pub fn add_possible(&mut self, target: SmId, extra: &[SmId]) {
        let mut poss: SmallVec<[SmId; 4]> = self.items[target.0 as usize].possible.clone();
        for &cand in extra {
            let cand_state = self.items[cand.0 as usize].state.clone();
            if poss.iter().any(|&p| same_state(&self.items[p.0 as usize].state, &cand_state)) {
                continue;
            }
            poss.push(cand);
        }
        poss.sort();
        self.items[target.0 as usize].possible = poss;
    }

    /// Whether any reachable possibility carries the given state.
    pub fn possible_has(&self, id: SmId, state: &Arc<State>) -> bool {
        self.get(id).possible.iter().any(|&p| same_state(&self.get(p).state, state))
    }
}

// POOLS
// ================================================================================================

/// Table of frozen state-tree snapshots. A pool is immutable once captured;
/// identity is the id.
#[derive(Default)]
pub struct PoolStore {
    pools: Vec<Stree>,
}

impl PoolStore {
    pub fn capture(&mut self, stree: Stree) -> PoolId {
        let id = PoolId(self.pools.len() as u32);
        self.pools.push(stree);
        id
    }

    pub fn get(&self, id: PoolId) -> &Stree {
        &self.pools[id.0 as usize]
    }

    pub fn clear(&mut self) {
        self.pools.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::undefined_state;

    #[test]
    fn fresh_sm_is_its_own_possibility() {
        let mut store = SmStore::default();
        let id = store.alloc(OwnerId(1), NameId(0), None, undefined_state(), 3);
        let sm = store.get(id);
        assert_eq!(sm.possible.as_slice(), &[id]);
        assert_eq!(sm.nr_children, 1);
        assert!(!sm.merged);
    }

    #[test]
    fn possible_dedups_by_state() {
        let mut store = SmStore::default();
        let a = store.alloc(OwnerId(1), NameId(0), None, undefined_state(), 1);
        let b = store.alloc(OwnerId(1), NameId(0), None, undefined_state(), 2);
        let c = store.alloc(OwnerId(1), NameId(0), None, State::named("freed"), 3);
        store.add_possible(a, &[b, c]);
        // b's state duplicates a's own, so only c joins.
        assert_eq!(store.get(a).possible.len(), 2);
        assert!(store.possible_has(a, &State::named("freed")));
    }
}

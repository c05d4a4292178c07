use std::rc::Rc;

use crate::{
    hooks::CheckOps,
    state::{merged_state, same_state},
    store::{PoolStore, SmId, SmStore, TrackerKey},
};

// STATE TREES
// ================================================================================================

/// An ordered map from tracker identity to the current sm_state, stored as a
/// sorted vector of ids. Cloning is cheap and structural: the sm_states
/// themselves are shared through the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stree {
    entries: Vec<SmId>,
}

pub type OwnerTable = Vec<Rc<dyn CheckOps>>;

fn owner_ops(owners: &OwnerTable, key: TrackerKey) -> Option<&Rc<dyn CheckOps>> {
    owners.get(key.owner.0 as usize)
}

impl Stree {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = SmId> + '_ {
        self.entries.iter().copied()
    }

    fn position(&self, store: &SmStore, key: TrackerKey) -> Result<usize, usize> {
        self.entries.binary_search_by(|&id| store.get(id).key().cmp(&key))
    }

    /// Point query by identity.
    pub fn get(&self, store: &SmStore, key: TrackerKey) -> Option<SmId> {
        self.position(store, key).ok().map(|i| self.entries[i])
    }

    /// Inserts or replaces the entry with `sm`'s identity.
    pub fn overwrite(&mut self, store: &SmStore, sm: SmId) {
        let key = store.get(sm).key();
        match self.position(store, key) {
            Ok(i) => self.entries[i] = sm,
            Err(i) => self.entries.insert(i, sm),
        }
    }

    pub fn delete(&mut self, store: &SmStore, key: TrackerKey) -> bool {
        match self.position(store, key) {
            Ok(i) => {
                self.entries.remove(i);
                true
            },
            Err(_) => false,
        }
    }

    /// Applies every entry of `from` over this tree.
    pub fn overwrite_all(&mut self, store: &SmStore, from: &Stree) {
        for sm in from.iter() {
            self.overwrite(store, sm);
        }
    }

    /// Structural equality of logical content: same identities in the same
    /// order carrying equal states. Used for loop fixpoint detection, where
    /// id equality is too strict (re-merging rebuilds records).
    pub fn logically_equal(&self, store: &SmStore, other: &Stree) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.iter().zip(other.iter()).all(|(a, b)| {
            let (sa, sb) = (store.get(a), store.get(b));
            sa.key() == sb.key() && same_state(&sa.state, &sb.state)
        })
    }
}

// MERGING
// ================================================================================================

/// Merges two sm_states of the same identity into a fresh record that
/// remembers both antecedents. Merging a record with itself is the identity.
pub fn merge_sm_states(
    store: &mut SmStore,
    owners: &OwnerTable,
    left: SmId,
    right: SmId,
    line: u32,
) -> SmId {
    if left == right {
        return left;
    }
    let (lsm, rsm) = (store.get(left).clone(), store.get(right).clone());
    debug_assert_eq!(lsm.key(), rsm.key(), "merging different identities");

    let state = if same_state(&lsm.state, &rsm.state) {
        lsm.state.clone()
    } else if let Some(merged) =
        owner_ops(owners, lsm.key()).and_then(|ops| ops.merge_states(&lsm.state, &rsm.state))
    {
        merged
    } else {
        merged_state()
    };

    tracing::trace!(
        owner = lsm.owner.0,
        left = %lsm.state.name,
        right = %rsm.state.name,
        result = %state.name,
        "merge"
    );

    let mut sm = lsm.clone();
    sm.state = state;
    sm.line = if lsm.line == rsm.line { lsm.line } else { line };
    sm.merged = true;
    sm.implied = false;
    sm.nr_children = lsm.nr_children.saturating_add(rsm.nr_children);
    sm.left = Some(left);
    sm.right = Some(right);
    sm.pool = None;
    sm.possible.clear();
    let id = store.alloc_raw(sm);
    let poss: Vec<SmId> = lsm.possible.iter().chain(rsm.possible.iter()).copied().collect();
    store.add_possible(id, &poss);
    id
}

/// Gives both trees the same identity set by materializing each side's
/// missing entries through the owner's unmatched-state callback.
fn match_states(store: &mut SmStore, owners: &OwnerTable, one: &mut Stree, two: &mut Stree, line: u32) {
    let mut add_to_one: Vec<SmId> = Vec::new();
    let mut add_to_two: Vec<SmId> = Vec::new();

    let (mut i, mut j) = (0, 0);
    let (a, b) = (one.entries.clone(), two.entries.clone());
    while i < a.len() || j < b.len() {
        let ka = a.get(i).map(|&id| store.get(id).key());
        let kb = b.get(j).map(|&id| store.get(id).key());
        match (ka, kb) {
            (Some(ka), Some(kb)) if ka == kb => {
                i += 1;
                j += 1;
            },
            (Some(ka), kb) if kb.is_none() || ka < kb.unwrap() => {
                let missing = a[i];
                let state = owner_ops(owners, ka)
                    .map(|ops| ops.unmatched_state(store.get(missing)))
                    .unwrap_or_else(crate::state::undefined_state);
                add_to_two.push(store.alloc(ka.owner, ka.name, ka.sym, state, line));
                i += 1;
            },
            (_, Some(kb)) => {
                let missing = b[j];
                let state = owner_ops(owners, kb)
                    .map(|ops| ops.unmatched_state(store.get(missing)))
                    .unwrap_or_else(crate::state::undefined_state);
                add_to_one.push(store.alloc(kb.owner, kb.name, kb.sym, state, line));
                j += 1;
            },
            (None, None) => break,
            (Some(_), None) => unreachable!("covered by previous arm's guard"),
        }
    }

    for sm in add_to_one {
        one.overwrite(store, sm);
    }
    for sm in add_to_two {
        two.overwrite(store, sm);
    }
}

/// Merges two state trees at a path join.
///
/// Both sides are first completed to the same identity set, then captured as
/// pools. A record that reaches its first join is stamped with its side's
/// pool; that stamp is what lets the implied-value machinery later decide
/// which side of history a value came from.
pub fn merge_strees(
    store: &mut SmStore,
    pools: &mut PoolStore,
    owners: &OwnerTable,
    line: u32,
    one: &Stree,
    two: &Stree,
) -> Stree {
    let mut a = one.clone();
    let mut b = two.clone();
    match_states(store, owners, &mut a, &mut b, line);

    let pool_a = pools.capture(a.clone());
    let pool_b = pools.capture(b.clone());

    let mut out = Stree::default();
    for (la, lb) in itertools::zip_eq(a.iter(), b.iter()).collect::<Vec<_>>() {
        if la == lb {
            out.overwrite(store, la);
            continue;
        }
        if store.get(la).pool.is_none() {
            store.get_mut(la).pool = Some(pool_a);
        }
        if store.get(lb).pool.is_none() {
            store.get_mut(lb).pool = Some(pool_b);
        }
        let merged = merge_sm_states(store, owners, la, lb, line);
        out.overwrite(store, merged);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        state::{undefined_state, State},
        store::{Interner, NameId, OwnerId, PoolStore},
    };

    struct Plain;
    impl CheckOps for Plain {
        fn check_name(&self) -> &'static str {
            "plain"
        }
    }

    fn setup() -> (SmStore, PoolStore, OwnerTable, Interner) {
        let owners: OwnerTable = vec![Rc::new(Plain)];
        (SmStore::default(), PoolStore::default(), owners, Interner::default())
    }

    fn put(
        store: &mut SmStore,
        stree: &mut Stree,
        name: NameId,
        state: Arc<State>,
        line: u32,
    ) -> SmId {
        let id = store.alloc(OwnerId(0), name, None, state, line);
        stree.overwrite(store, id);
        id
    }

    #[test]
    fn overwrite_replaces_same_identity() {
        let (mut store, _, _, mut names) = setup();
        let n = names.intern("x");
        let mut tree = Stree::default();
        put(&mut store, &mut tree, n, State::named("a"), 1);
        let b = put(&mut store, &mut tree, n, State::named("b"), 2);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(&store, store.get(b).key()), Some(b));
    }

    #[test]
    fn merge_equal_trees_is_identity() {
        let (mut store, mut pools, owners, mut names) = setup();
        let n = names.intern("x");
        let mut tree = Stree::default();
        put(&mut store, &mut tree, n, State::named("a"), 1);
        let merged = merge_strees(&mut store, &mut pools, &owners, 5, &tree, &tree);
        assert_eq!(merged, tree);
    }

    #[test]
    fn merge_differing_states_records_provenance() {
        let (mut store, mut pools, owners, mut names) = setup();
        let n = names.intern("x");
        let mut one = Stree::default();
        let mut two = Stree::default();
        let a = put(&mut store, &mut one, n, State::named("locked"), 1);
        let b = put(&mut store, &mut two, n, State::named("unlocked"), 2);

        let merged = merge_strees(&mut store, &mut pools, &owners, 9, &one, &two);
        let id = merged.iter().next().unwrap();
        let sm = store.get(id);
        assert!(sm.merged);
        assert_eq!(sm.state.name, "merged");
        assert_eq!(sm.left, Some(a));
        assert_eq!(sm.right, Some(b));
        assert_eq!(sm.nr_children, 2);
        // Both antecedents got stamped with their side's pool.
        assert!(store.get(a).pool.is_some());
        assert!(store.get(b).pool.is_some());
        assert_ne!(store.get(a).pool, store.get(b).pool);
        // Possible set saw both leaves.
        assert!(store.possible_has(id, &State::named("locked")));
        assert!(store.possible_has(id, &State::named("unlocked")));
    }

    #[test]
    fn unmatched_sides_are_materialized() {
        let (mut store, mut pools, owners, mut names) = setup();
        let nx = names.intern("x");
        let ny = names.intern("y");
        let mut one = Stree::default();
        let mut two = Stree::default();
        put(&mut store, &mut one, nx, State::named("a"), 1);
        put(&mut store, &mut two, ny, State::named("b"), 1);

        let merged = merge_strees(&mut store, &mut pools, &owners, 3, &one, &two);
        assert_eq!(merged.len(), 2);
        for id in merged.iter() {
            // Each entry merged a real state with a materialized undefined.
            assert!(store.possible_has(id, &undefined_state()));
        }
    }

    #[test]
    fn merged_possible_is_order_independent() {
        let (mut store, mut pools, owners, mut names) = setup();
        let n = names.intern("x");
        let mut one = Stree::default();
        let mut two = Stree::default();
        put(&mut store, &mut one, n, State::named("a"), 1);
        put(&mut store, &mut two, n, State::named("b"), 1);
        let m1 = merge_strees(&mut store, &mut pools, &owners, 2, &one, &two);
        let m2 = merge_strees(&mut store, &mut pools, &owners, 2, &two, &one);
        let (a, b) = (m1.iter().next().unwrap(), m2.iter().next().unwrap());
        assert_eq!(store.get(a).possible.len(), store.get(b).possible.len());
    }
}

//! The implied-value machinery.
//!
//! When a condition tests a merged variable, the merge DAG under its
//! sm_state remembers every place the value came from. Walking the DAG
//! splits the historical snapshots (pools) into those consistent with the
//! condition being true and those consistent with it being false; every
//! *other* tracked variable is then rebuilt per branch by dropping the
//! contributions that came from the wrong side of history.

use std::{
    collections::{BTreeSet, HashSet},
    time::Instant,
};

use sift_core::{CmpOp, Expr, ExprId, RangeList, Sval};

use crate::{
    engine::{Engine, EXTRA_OWNER},
    store::{PoolId, PoolStore, SmId, SmStore},
    stree::{merge_sm_states, OwnerTable, Stree},
};

#[derive(Copy, Clone, PartialEq, Eq)]
pub(crate) enum Side {
    /// The tracked variable is the left operand of the comparison.
    Left,
    /// The tracked variable is the right operand.
    Right,
}

// CONDITION HOOK
// ================================================================================================

/// Runs after every checker's condition hooks (so they observe the
/// pre-condition states) and before the value tracker's own refinement.
pub(crate) fn implied_states_hook(eng: &mut Engine, expr: ExprId) {
    let (true_sms, false_sms) = get_tf_states(eng, expr);
    for sm in true_sms {
        eng.set_true_false_sm(Some(sm), None);
    }
    for sm in false_sms {
        eng.set_true_false_sm(None, Some(sm));
    }
}

fn get_tf_states(eng: &mut Engine, expr: ExprId) -> (Vec<SmId>, Vec<SmId>) {
    let decl = eng.decl();
    let expr = decl.body.strip(expr);
    match decl.body.expr(expr).kind.clone() {
        Expr::Compare { op, left, right } => handle_comparison(eng, op, left, right),
        _ => handle_zero_comparison(eng, expr),
    }
}

/// Assignments in conditions gate on what ends up in the left side.
fn left_most(eng: &Engine, mut expr: ExprId) -> ExprId {
    let decl = eng.decl();
    loop {
        expr = decl.body.strip(expr);
        match &decl.body.expr(expr).kind {
            Expr::Assignment { left, .. } => expr = *left,
            _ => return expr,
        }
    }
}

fn is_merged_expr(eng: &Engine, expr: ExprId) -> Option<SmId> {
    if eng.decl().body.const_value(expr).is_some() {
        return None;
    }
    let sm = eng.get_sm_expr(EXTRA_OWNER, expr)?;
    if eng.sm(sm).merged { Some(sm) } else { None }
}

fn handle_comparison(
    eng: &mut Engine,
    op: CmpOp,
    left: ExprId,
    right: ExprId,
) -> (Vec<SmId>, Vec<SmId>) {
    let left = left_most(eng, left);
    let right = left_most(eng, right);

    let (gate, vals, side) = if let Some(sm) = is_merged_expr(eng, left) {
        let Some(vals) = eng.get_implied_rl(right) else {
            return (Vec::new(), Vec::new());
        };
        (sm, vals, Side::Left)
    } else if let Some(sm) = is_merged_expr(eng, right) {
        let Some(vals) = eng.get_implied_rl(left) else {
            return (Vec::new(), Vec::new());
        };
        (sm, vals, Side::Right)
    } else {
        return (Vec::new(), Vec::new());
    };

    let (t, f) = eng.separate_and_filter(gate, op, &vals, side);
    (drop_gate_entries(eng, gate, t), drop_gate_entries(eng, gate, f))
}

fn handle_zero_comparison(eng: &mut Engine, expr: ExprId) -> (Vec<SmId>, Vec<SmId>) {
    let decl = eng.decl();
    let expr = match &decl.body.expr(expr).kind {
        Expr::Postop { inner, .. } => decl.body.strip(*inner),
        Expr::Assignment { left, .. } => left_most(eng, *left),
        _ => expr,
    };
    let Some(sm) = eng.get_sm_expr(EXTRA_OWNER, expr) else {
        return (Vec::new(), Vec::new());
    };
    let ty = decl.body.expr_ty(expr);
    let zero = RangeList::singleton(Sval::new(ty, 0));
    let (t, f) = eng.separate_and_filter(sm, CmpOp::Ne, &zero, Side::Left);
    (drop_gate_entries(eng, sm, t), drop_gate_entries(eng, sm, f))
}

/// The gate variable itself (and anything related to it) is refined by the
/// value tracker's own condition handling; implied results for it would
/// fight that, so they are dropped.
fn drop_gate_entries(eng: &Engine, gate: SmId, sms: Vec<SmId>) -> Vec<SmId> {
    let gate_sm = eng.sm(gate);
    let gate_name = gate_sm.name;
    let gate_sym = gate_sm.sym;
    let related: Vec<String> = gate_sm
        .state
        .dinfo()
        .map(|d| d.related.iter().map(|(n, _)| n.clone()).collect())
        .unwrap_or_default();
    sms.into_iter()
        .filter(|&id| {
            let sm = eng.sm(id);
            if sm.owner == EXTRA_OWNER && sm.name == gate_name && sm.sym == gate_sym {
                return false;
            }
            if sm.owner == EXTRA_OWNER {
                let name = eng.resolve_name(sm.name);
                if related.iter().any(|r| r == name) {
                    return false;
                }
            }
            true
        })
        .collect()
}

// POOL SEPARATION
// ================================================================================================

impl Engine {
    /// Splits the gate's historical pools by the comparison, then rebuilds
    /// refined states for everything else in the current tree per branch.
    pub(crate) fn separate_and_filter(
        &mut self,
        gate: SmId,
        op: CmpOp,
        vals: &RangeList,
        side: Side,
    ) -> (Vec<SmId>, Vec<SmId>) {
        let Some(pre) = self.ctx.cur.clone() else {
            return (Vec::new(), Vec::new());
        };
        self.separate_and_filter_in(gate, op, vals, side, &pre)
    }

    /// As [`Engine::separate_and_filter`] but filtering the given tree
    /// instead of the current one (switch cases refine the switch-entry
    /// states, not whatever the previous case left behind).
    pub(crate) fn separate_and_filter_in(
        &mut self,
        gate: SmId,
        op: CmpOp,
        vals: &RangeList,
        side: Side,
        pre: &Stree,
    ) -> (Vec<SmId>, Vec<SmId>) {
        if !self.store.get(gate).merged {
            tracing::trace!(line = self.line, "gate is not merged; no implications");
            return (Vec::new(), Vec::new());
        }

        let started = Instant::now();
        let cap = self.opts.implied_children_cap;
        let mut true_pools = BTreeSet::new();
        let mut false_pools = BTreeSet::new();
        let mut checked = HashSet::new();
        separate_pools(
            &self.store,
            &self.pools,
            cap,
            gate,
            op,
            vals,
            side,
            &mut true_pools,
            &mut false_pools,
            &mut checked,
        );

        tracing::trace!(
            true_pools = true_pools.len(),
            false_pools = false_pools.len(),
            "separated pools"
        );

        // Values impossible on the false side imply the true branch, so the
        // true branch filters *against* the false pools, and vice versa.
        let true_states = self.filter_stree(gate, &false_pools, pre);
        let false_states = self.filter_stree(gate, &true_pools, pre);

        if started.elapsed() > self.opts.condition_budget {
            tracing::debug!(line = self.line, "implication budget exceeded; bailing on function");
            self.bail = true;
        }
        (true_states, false_states)
    }

    fn filter_stree(&mut self, gate: SmId, pools: &BTreeSet<PoolId>, pre: &Stree) -> Vec<SmId> {
        if pools.is_empty() {
            return Vec::new();
        }
        let gate_height = highest_pool(&self.store, gate);
        let cap = self.opts.implied_children_cap;
        let mut out = Vec::new();
        for id in pre.iter() {
            if highest_pool(&self.store, id) < gate_height {
                // Set before the gate's history even started; the condition
                // cannot say anything about it.
                continue;
            }
            let mut modified = false;
            let filtered = remove_pools(
                &mut self.store,
                &self.owners,
                cap,
                self.line,
                Some(id),
                pools,
                &mut modified,
            );
            if let Some(f) = filtered {
                if modified {
                    self.store.get_mut(f).implied = true;
                    out.push(f);
                }
            }
        }
        out
    }
}

/// Recursively visits the gate's merge DAG, voting each reached snapshot
/// into the true set, the false set, or both.
#[allow(clippy::too_many_arguments)]
fn separate_pools(
    store: &SmStore,
    pools: &PoolStore,
    cap: u32,
    sm_id: SmId,
    op: CmpOp,
    vals: &RangeList,
    side: Side,
    true_pools: &mut BTreeSet<PoolId>,
    false_pools: &mut BTreeSet<PoolId>,
    checked: &mut HashSet<SmId>,
) {
    let sm = store.get(sm_id);
    // Implications can get too big to deal with; giving up here can cause
    // more false positives but never hides a real bug.
    if sm.nr_children > cap {
        tracing::debug!(
            nr_children = sm.nr_children,
            cap,
            "separate_pools: too many reachable children; refusing to refine"
        );
        return;
    }
    if !checked.insert(sm_id) {
        return;
    }

    do_compare(store, pools, sm_id, op, vals, side, true_pools, false_pools);

    if let Some(left) = sm.left {
        separate_pools(store, pools, cap, left, op, vals, side, true_pools, false_pools, checked);
    }
    if let Some(right) = sm.right {
        separate_pools(store, pools, cap, right, op, vals, side, true_pools, false_pools, checked);
    }
}

#[allow(clippy::too_many_arguments)]
fn do_compare(
    store: &SmStore,
    pools: &PoolStore,
    sm_id: SmId,
    op: CmpOp,
    vals: &RangeList,
    side: Side,
    true_pools: &mut BTreeSet<PoolId>,
    false_pools: &mut BTreeSet<PoolId>,
) {
    let sm = store.get(sm_id);
    let Some(pool) = sm.pool else {
        return;
    };

    // An implied record's own state was already filtered once; vote with the
    // original that the snapshot actually holds.
    let subject = if sm.implied {
        match pools.get(pool).get(store, sm.key()) {
            Some(orig) => store.get(orig),
            None => {
                tracing::debug!("borrowed implications; skipping");
                return;
            },
        }
    } else {
        sm
    };

    let Some(ranges) = subject.state.ranges() else {
        return;
    };

    let (is_true, is_false) = match side {
        Side::Left => {
            (!ranges.possibly_false(op, vals), !ranges.possibly_true(op, vals))
        },
        Side::Right => {
            (!vals.possibly_false(op, ranges), !vals.possibly_true(op, ranges))
        },
    };

    if is_true {
        true_pools.insert(pool);
    }
    if is_false {
        false_pools.insert(pool);
    }
}

/// The newest snapshot this record's immediate history reaches. Used to
/// skip variables whose value predates the gate entirely.
fn highest_pool(store: &SmStore, sm_id: SmId) -> u32 {
    let sm = store.get(sm_id);
    let of = |id: Option<SmId>| -> u32 {
        id.and_then(|i| store.get(i).pool).map(|p| p.0 + 1).unwrap_or(0)
    };
    of(sm.left).max(of(sm.right))
}

/// Rebuilds a record with every contribution from the given pools removed.
/// Returns `None` when nothing survives; leaves `modified` untouched when
/// the record was kept whole.
fn remove_pools(
    store: &mut SmStore,
    owners: &OwnerTable,
    cap: u32,
    line: u32,
    sm_id: Option<SmId>,
    pools: &BTreeSet<PoolId>,
    modified: &mut bool,
) -> Option<SmId> {
    let sm_id = sm_id?;
    let sm = store.get(sm_id).clone();

    if sm.nr_children > cap {
        tracing::debug!(
            nr_children = sm.nr_children,
            cap,
            "remove_pools: too many reachable children; refusing to refine"
        );
        return None;
    }

    if let Some(pool) = sm.pool {
        if pools.contains(&pool) {
            *modified = true;
            return None;
        }
    }
    if !sm.merged {
        return Some(sm_id);
    }

    let mut removed = false;
    let left = remove_pools(store, owners, cap, line, sm.left, pools, &mut removed);
    let right = remove_pools(store, owners, cap, line, sm.right, pools, &mut removed);
    if !removed {
        return Some(sm_id);
    }
    *modified = true;

    let rebuilt = match (left, right) {
        (None, None) => return None,
        (Some(l), None) => {
            let mut clone = store.get(l).clone();
            clone.merged = true;
            clone.left = Some(l);
            clone.right = None;
            clone.pool = sm.pool;
            Some(store.alloc_raw(clone))
        },
        (None, Some(r)) => {
            let mut clone = store.get(r).clone();
            clone.merged = true;
            clone.left = None;
            clone.right = Some(r);
            clone.pool = sm.pool;
            Some(store.alloc_raw(clone))
        },
        (Some(l), Some(r)) => {
            let m = merge_sm_states(store, owners, l, r, line);
            store.get_mut(m).pool = sm.pool;
            Some(m)
        },
    };
    if let Some(id) = rebuilt {
        store.get_mut(id).implied = true;
    }
    rebuilt
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use sift_core::{CmpOp, Expr, Ty};
    use sift_test_utils::FnBuilder;

    use super::*;
    use crate::{Engine, Options};

    /// Builds `foo = 1; if (bar) foo = 99; if (foo == 99) ;` and captures
    /// the pool separation at the second condition.
    fn run_with_probe(check: impl Fn(&mut Engine, SmId) + 'static) {
        let mut b = FnBuilder::new("f");
        let bar = b.param("bar", Ty::I32);
        let foo = b.local("foo", Ty::I32);
        let one = b.int(1);
        let d = b.decl_stmt(foo, Some(one));
        b.push(d);
        let fe = b.sym(foo);
        let v99 = b.int(99);
        let asn = b.assign(fe, v99);
        let then = b.expr_stmt(asn);
        let be = b.sym(bar);
        let iff = b.if_stmt(be, then, None);
        b.push(iff);
        let fe2 = b.sym(foo);
        let v99b = b.int(99);
        let cond = b.compare(CmpOp::Eq, fe2, v99b);
        let empty = b.block(vec![]);
        let iff2 = b.if_stmt(cond, empty, None);
        b.push(iff2);

        let check = Rc::new(check);
        let mut eng = Engine::new(Options::default());
        let hook_check = check.clone();
        eng.hooks_mut().condition.push(Rc::new(move |eng: &mut Engine, expr| {
            let decl = eng.decl();
            let Expr::Compare { left, .. } = &decl.body.expr(expr).kind else {
                return;
            };
            let Some(gate) = eng.get_sm_expr(EXTRA_OWNER, *left) else {
                return;
            };
            if eng.sm(gate).merged {
                hook_check(eng, gate);
            }
        }));
        eng.analyze(b.finish());
    }

    fn reachable_pools(eng: &Engine, sm: SmId, out: &mut BTreeSet<PoolId>) {
        let sm = eng.sm(sm);
        if let Some(p) = sm.pool {
            out.insert(p);
        }
        if let Some(l) = sm.left {
            reachable_pools(eng, l, out);
        }
        if let Some(r) = sm.right {
            reachable_pools(eng, r, out);
        }
    }

    /// Condition split completeness: every pool reachable from the gate ends
    /// up voted possibly-true or possibly-false, with no pool voted
    /// impossible on both sides.
    #[test]
    fn pool_separation_is_complete() {
        let hits = Rc::new(RefCell::new(0));
        let hits2 = hits.clone();
        run_with_probe(move |eng, gate| {
            *hits2.borrow_mut() += 1;
            let vals = RangeList::singleton(sift_core::Sval::new(Ty::I32, 99));
            let mut def_true = BTreeSet::new();
            let mut def_false = BTreeSet::new();
            let mut checked = HashSet::new();
            separate_pools(
                &eng.store,
                &eng.pools,
                eng.opts.implied_children_cap,
                gate,
                CmpOp::Eq,
                &vals,
                Side::Left,
                &mut def_true,
                &mut def_false,
                &mut checked,
            );
            let mut all = BTreeSet::new();
            reachable_pools(eng, gate, &mut all);
            assert!(!all.is_empty());
            // Possibly-true = all minus definitely-false, and dually; their
            // union must cover every reachable pool.
            let possibly_true: BTreeSet<_> = all.difference(&def_false).copied().collect();
            let possibly_false: BTreeSet<_> = all.difference(&def_true).copied().collect();
            let union: BTreeSet<_> = possibly_true.union(&possibly_false).copied().collect();
            assert_eq!(union, all);
            assert!(def_true.intersection(&def_false).next().is_none());
        });
        assert_eq!(*hits.borrow(), 1);
    }

    /// Pool soundness: a merged record's own pool is captured no earlier
    /// than every pool reachable below it.
    #[test]
    fn pools_dominate_their_descendants() {
        fn assert_ordered(eng: &Engine, sm: SmId, bound: Option<PoolId>) {
            let rec = eng.sm(sm);
            if let (Some(own), Some(bound)) = (rec.pool, bound) {
                assert!(own <= bound, "descendant pool newer than ancestor");
            }
            let next = rec.pool.or(bound);
            if let Some(l) = rec.left {
                assert_ordered(eng, l, next);
            }
            if let Some(r) = rec.right {
                assert_ordered(eng, r, next);
            }
        }
        run_with_probe(|eng, gate| {
            let cur: Vec<SmId> = eng.ctx.cur.as_ref().map(|c| c.iter().collect()).unwrap_or_default();
            for sm in cur {
                assert_ordered(eng, sm, None);
            }
            let _ = gate;
        });
    }
}

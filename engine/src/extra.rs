//! The value tracker: owner 0, always registered. Tracks a range list for
//! every scalar and pointer variable, merges by union, and refines on
//! conditions. The implied-value machinery keys off these states, so this
//! module is part of the engine rather than a checker.

use std::{rc::Rc, sync::Arc};

use sift_core::{BinOp, CmpOp, Expr, ExprId, RangeList, StmtId, Sval, SymbolId, Ty, UnOp};

use crate::{
    engine::{Engine, EXTRA_OWNER},
    hooks::{Assignment, CheckOps},
    state::{DataInfo, State, StateData},
    store::SmState,
    stree::Stree,
};

// ESTATES
// ================================================================================================

/// Builds a value-tracker state from a range list. The printable name is the
/// canonical rendering, which makes structurally-equal estates compare equal
/// no matter where they were built.
pub fn alloc_estate(ranges: RangeList) -> Arc<State> {
    Arc::new(State {
        name: ranges.to_string(),
        data: StateData::Ranges(DataInfo::from_ranges(ranges)),
    })
}

pub fn alloc_estate_sval(val: Sval) -> Arc<State> {
    alloc_estate(RangeList::singleton(val))
}

/// The nothing-known state for a variable of the given type.
pub fn whole_estate(ty: Ty) -> Arc<State> {
    alloc_estate(RangeList::whole(ty))
}

/// The ranges of a value-tracker state, when the state carries any.
pub fn estate_rl(state: &State) -> Option<&RangeList> {
    state.ranges()
}

// OWNER OPS
// ================================================================================================

pub struct ExtraOps;

impl CheckOps for ExtraOps {
    fn check_name(&self) -> &'static str {
        "extra"
    }

    fn merge_states(&self, s1: &Arc<State>, s2: &Arc<State>) -> Option<Arc<State>> {
        let (r1, r2) = (s1.ranges()?, s2.ranges()?);
        // A side materialized as unmatched carries the default type; bring
        // it over so the union stays single-typed.
        let r2 = match (r1.ty(), r2.ty()) {
            (Some(t1), Some(t2)) if t1 != t2 => r2.cast(t1),
            _ => r2.clone(),
        };
        Some(alloc_estate(r1.union(&r2)))
    }

    fn unmatched_state(&self, sm: &SmState) -> Arc<State> {
        let _ = sm;
        whole_estate(Ty::I64)
    }
}

// REGISTRATION
// ================================================================================================

pub(crate) fn register(eng: &mut Engine) {
    eng.hooks_mut().func_def.push(Rc::new(|eng: &mut Engine| {
        let decl = eng.decl();
        for &param in &decl.params {
            let sym = decl.body.symbol(param);
            let state = whole_estate(sym.ty);
            let name = sym.name.clone();
            eng.set_state(EXTRA_OWNER, &name, Some(param), state);
        }
    }));

    eng.hooks_mut().declaration.push(Rc::new(|eng: &mut Engine, sym: SymbolId, _init| {
        let decl = eng.decl();
        let s = decl.body.symbol(sym);
        let state = whole_estate(s.ty);
        let name = s.name.clone();
        eng.set_state(EXTRA_OWNER, &name, Some(sym), state);
        eng.scoped_state(EXTRA_OWNER, &name, Some(sym));
    }));

    eng.hooks_mut().assignment.push(Rc::new(|eng: &mut Engine, assign: &Assignment| {
        match_assign(eng, assign);
    }));

    eng.hooks_mut().op.push(Rc::new(|eng: &mut Engine, expr: ExprId| {
        unop_expr(eng, expr);
    }));

    // The condition handler is not registered here: the explorer invokes it
    // directly after every checker hook, so checkers always observe the
    // states from before the condition refined them.
}

// ASSIGNMENTS
// ================================================================================================

fn match_assign(eng: &mut Engine, assign: &Assignment) {
    let Some((name, sym)) = eng.target_var(&assign.target) else {
        return;
    };
    let ty = eng.target_ty(&assign.target);

    match assign.op.binop() {
        None => {
            // Plain `=`: adopt the right side's implied ranges at the
            // target's type, or drop to nothing-known.
            let state = match eng.get_implied_rl(assign.right) {
                Some(rl) => alloc_estate(rl.cast(ty)),
                None => whole_estate(ty),
            };
            eng.set_state(EXTRA_OWNER, &name, Some(sym), state);
        },
        Some(op) => {
            let prev = eng
                .get_state(EXTRA_OWNER, &name, Some(sym))
                .and_then(|s| s.ranges().cloned())
                .unwrap_or_else(|| RangeList::whole(ty));
            let state = match (op, eng.get_implied_rl(assign.right)) {
                (BinOp::Add | BinOp::Sub, Some(rhs)) => {
                    alloc_estate(prev.binop(op, &rhs).cast(ty))
                },
                _ => whole_estate(ty),
            };
            eng.set_state(EXTRA_OWNER, &name, Some(sym), state);
        },
    }
}

/// `++`/`--` shift the tracked range by one.
fn unop_expr(eng: &mut Engine, expr: ExprId) {
    let decl = eng.decl();
    let (inner, delta) = match &decl.body.expr(expr).kind {
        Expr::Preop { op: UnOp::Inc, inner } | Expr::Postop { op: sift_core::PostOp::Inc, inner } => {
            (*inner, BinOp::Add)
        },
        Expr::Preop { op: UnOp::Dec, inner } | Expr::Postop { op: sift_core::PostOp::Dec, inner } => {
            (*inner, BinOp::Sub)
        },
        _ => return,
    };
    let Some((name, sym)) = eng.expr_var(inner) else {
        return;
    };
    let ty = decl.body.expr_ty(inner);
    let state = match eng.get_state(EXTRA_OWNER, &name, Some(sym)).and_then(|s| s.ranges().cloned())
    {
        Some(rl) => {
            let one = RangeList::singleton(Sval::new(ty, 1));
            alloc_estate(rl.binop(delta, &one).cast(ty))
        },
        None => whole_estate(ty),
    };
    eng.set_state(EXTRA_OWNER, &name, Some(sym), state);
}

// CONDITIONS
// ================================================================================================

pub(crate) fn match_condition(eng: &mut Engine, expr: ExprId) {
    let decl = eng.decl();
    let expr = decl.body.strip(expr);
    match decl.body.expr(expr).kind.clone() {
        Expr::Call { .. } => {
            eng.apply_return_implies(expr);
        },
        Expr::Compare { op, left, right } => {
            match_comparison(eng, op, left, right);
        },
        Expr::Assignment { left, .. } => {
            match_condition(eng, left);
        },
        Expr::Postop { inner, .. } => {
            match_condition(eng, inner);
        },
        Expr::Sym { .. } | Expr::Deref { .. } | Expr::Preop { .. } => {
            match_nonzero(eng, expr);
        },
        _ => {},
    }
}

/// `if (x)`: the true side drops zero, the false side pins it.
fn match_nonzero(eng: &mut Engine, expr: ExprId) {
    let Some((name, sym)) = eng.expr_var(expr) else {
        return;
    };
    let ty = eng.decl().body.expr_ty(expr);
    let pre = eng
        .get_state(EXTRA_OWNER, &name, Some(sym))
        .and_then(|s| s.ranges().cloned())
        .unwrap_or_else(|| RangeList::whole(ty));

    let zero = Sval::new(ty, 0);
    let true_rl = pre.remove(zero, zero);
    if true_rl.is_empty() {
        eng.mark_impossible(true);
    }
    let false_side = if pre.contains(zero) {
        Some(alloc_estate_sval(zero))
    } else {
        eng.mark_impossible(false);
        None
    };
    eng.set_true_false_states(EXTRA_OWNER, &name, Some(sym), Some(alloc_estate(true_rl)), false_side);
}

fn match_comparison(eng: &mut Engine, op: CmpOp, left: ExprId, right: ExprId) {
    let decl = eng.decl();

    // Variable against variable: on a true equality the two ranges pinch to
    // their intersection on both sides.
    let lvar = eng.expr_var(left);
    let rvar = eng.expr_var(right);
    if let (Some(_), Some(_), CmpOp::Eq) = (&lvar, &rvar, op) {
        equiv_true_states(eng, left, right);
        return;
    }

    // Variable against a known value: filter. A non-variable side may also
    // contribute through its implied value.
    let right_fixed = decl
        .body
        .const_value(right)
        .or_else(|| if rvar.is_none() { eng.get_implied_value(right) } else { None });
    let left_fixed = decl
        .body
        .const_value(left)
        .or_else(|| if lvar.is_none() { eng.get_implied_value(left) } else { None });
    let (varies, fixed, op) = if let Some(v) = right_fixed {
        (left, v, op)
    } else if let Some(v) = left_fixed {
        (right, v, op.flip())
    } else {
        return;
    };

    let varies = decl.body.strip(varies);
    if matches!(&decl.body.expr(varies).kind, Expr::Call { .. }) {
        eng.apply_return_implies(varies);
        return;
    }
    let Some((name, sym)) = eng.expr_var(varies) else {
        return;
    };

    let ty = decl.body.expr_ty(varies);
    let fixed = fixed.cast(ty);
    let orig = eng
        .get_state(EXTRA_OWNER, &name, Some(sym))
        .and_then(|s| s.ranges().cloned())
        .unwrap_or_else(|| RangeList::whole(ty));

    let (lo, hi) = (ty.ty_min(), ty.ty_max());
    let one = Sval::new(ty, 1);
    let above = fixed.binop(BinOp::Add, one).cast(ty);
    let below = fixed.binop(BinOp::Sub, one).cast(ty);

    // `var op fixed`; filter_range removes the impossible span.
    let (true_rl, false_rl) = match op {
        CmpOp::Lt | CmpOp::UnsignedLt => (orig.remove(fixed, hi), orig.remove(lo, below)),
        CmpOp::Lte | CmpOp::UnsignedLte => (orig.remove(above, hi), orig.remove(lo, fixed)),
        CmpOp::Eq => (orig.intersection(&RangeList::singleton(fixed)), orig.remove(fixed, fixed)),
        CmpOp::Gte | CmpOp::UnsignedGte => (orig.remove(lo, below), orig.remove(fixed, hi)),
        CmpOp::Gt | CmpOp::UnsignedGt => (orig.remove(lo, fixed), orig.remove(above, hi)),
        CmpOp::Ne => (orig.remove(fixed, fixed), orig.intersection(&RangeList::singleton(fixed))),
    };

    if true_rl.is_empty() {
        eng.mark_impossible(true);
    }
    if false_rl.is_empty() {
        eng.mark_impossible(false);
    }
    eng.set_true_false_states(
        EXTRA_OWNER,
        &name,
        Some(sym),
        Some(alloc_estate(true_rl)),
        Some(alloc_estate(false_rl)),
    );
}

/// `a == b` between two tracked variables: on the true side both collapse to
/// the intersection and are recorded as related.
fn equiv_true_states(eng: &mut Engine, left: ExprId, right: ExprId) {
    let Some((lname, lsym)) = eng.expr_var(left) else {
        return;
    };
    let Some((rname, rsym)) = eng.expr_var(right) else {
        return;
    };
    let decl = eng.decl();
    let ty = decl.body.expr_ty(left);
    let lrl = eng
        .get_state(EXTRA_OWNER, &lname, Some(lsym))
        .and_then(|s| s.ranges().cloned())
        .unwrap_or_else(|| RangeList::whole(ty));
    let rrl = eng
        .get_state(EXTRA_OWNER, &rname, Some(rsym))
        .and_then(|s| s.ranges().cloned())
        .unwrap_or_else(|| RangeList::whole(ty));

    let both = lrl.intersection(&rrl);
    if both.is_empty() {
        eng.mark_impossible(true);
    }
    let mut info = DataInfo::from_ranges(both);
    info.related.push((lname.clone(), lsym));
    info.related.push((rname.clone(), rsym));
    let state = Arc::new(State {
        name: info.ranges.to_string(),
        data: StateData::Ranges(info),
    });
    eng.set_true_false_states(EXTRA_OWNER, &lname, Some(lsym), Some(state.clone()), None);
    eng.set_true_false_states(EXTRA_OWNER, &rname, Some(rsym), Some(state), None);
}

// CANONICAL LOOPS
// ================================================================================================

/// Recognizes `for (i = start; i < end; i++)` and `while (i--)` shapes and
/// seeds the induction variable's body-range speculatively. The writes land
/// in a scratch tree the caller overlays once the loop body begins.
pub(crate) fn handle_canonical_loops(
    eng: &mut Engine,
    pre_condition: Option<ExprId>,
    post_statement: Option<StmtId>,
) -> Stree {
    eng.with_fake_stree(|eng| {
        match post_statement {
            None => canonical_while_count_down(eng, pre_condition),
            Some(post) => canonical_for_loop(eng, pre_condition, post),
        };
    })
}

fn canonical_while_count_down(eng: &mut Engine, pre_condition: Option<ExprId>) {
    let Some(cond) = pre_condition else {
        return;
    };
    let decl = eng.decl();
    let cond = decl.body.strip(cond);
    let iter_var = match &decl.body.expr(cond).kind {
        Expr::Preop { op: UnOp::Dec, inner } => (*inner, true),
        Expr::Postop { op: sift_core::PostOp::Dec, inner } => (*inner, false),
        _ => return,
    };
    let (inner, pre_dec) = iter_var;
    let Some(rl) = eng.get_state_expr(EXTRA_OWNER, inner).and_then(|s| s.ranges().cloned()) else {
        return;
    };
    let Some(min) = rl.min_sval() else { return };
    if min.is_negative() {
        return;
    }
    let Some(mut start) = rl.max_sval() else { return };
    if start.cmp_val(0) != std::cmp::Ordering::Greater {
        return;
    }
    if !start.is_max() {
        start = start.binop(BinOp::Sub, Sval::new(start.ty(), 1)).cast(start.ty());
    }
    let low = Sval::new(start.ty(), if pre_dec { 1 } else { 0 });
    eng.set_state_expr(EXTRA_OWNER, inner, alloc_estate(RangeList::new(low, start)));
}

fn canonical_for_loop(eng: &mut Engine, pre_condition: Option<ExprId>, post: StmtId) {
    let decl = eng.decl();
    let Some(cond) = pre_condition else {
        return;
    };
    let post_expr = match &decl.body.stmt(post).kind {
        sift_core::Stmt::Expression { expr } => *expr,
        _ => return,
    };
    let iter_var = match &decl.body.expr(decl.body.strip(post_expr)).kind {
        Expr::Preop { op: UnOp::Inc, inner } | Expr::Postop { op: sift_core::PostOp::Inc, inner } => {
            *inner
        },
        _ => return,
    };
    let (op, left, right) = match &decl.body.expr(decl.body.strip(cond)).kind {
        Expr::Compare { op, left, right } => (*op, *left, *right),
        _ => return,
    };
    let cond_var = decl.body.expr_to_var(left);
    if cond_var.is_none() || cond_var != decl.body.expr_to_var(iter_var) {
        return;
    }
    let Some(start) = eng
        .get_state_expr(EXTRA_OWNER, iter_var)
        .and_then(|s| s.ranges().and_then(|rl| rl.to_sval()))
    else {
        return;
    };
    let ty = decl.body.expr_ty(iter_var);
    let mut end = match eng.get_implied_value(right) {
        Some(v) => v.cast(ty),
        None => ty.ty_max(),
    };
    match op {
        CmpOp::Ne | CmpOp::Lt | CmpOp::UnsignedLt => {
            if !end.is_max() {
                end = end.binop(BinOp::Sub, Sval::new(ty, 1)).cast(ty);
            }
        },
        CmpOp::Lte | CmpOp::UnsignedLte => {},
        _ => return,
    }
    if end.cmp(start) == std::cmp::Ordering::Less {
        return;
    }
    eng.set_state_expr(EXTRA_OWNER, iter_var, alloc_estate(RangeList::new(start, end)));
}

// IMPLIED QUERIES
// ================================================================================================

impl Engine {
    /// The range list an expression is known to lie in: constants fold, and
    /// tracked variables answer from their estate; arithmetic combines
    /// recursively. `None` means nothing is known.
    pub fn get_implied_rl(&self, expr: ExprId) -> Option<RangeList> {
        let decl = self.decl.clone();
        self.implied_rl_inner(&decl, expr)
    }

    fn implied_rl_inner(&self, decl: &sift_core::FnDecl, expr: ExprId) -> Option<RangeList> {
        if let Some(v) = decl.body.const_value(expr) {
            return Some(RangeList::singleton(v));
        }
        let expr = decl.body.strip(expr);
        match &decl.body.expr(expr).kind {
            Expr::Sym { .. } | Expr::Deref { .. } => {
                let state = self.get_state_expr(EXTRA_OWNER, expr)?;
                state.ranges().cloned()
            },
            Expr::Preop { op: UnOp::Deref, .. } => {
                let state = self.get_state_expr(EXTRA_OWNER, expr)?;
                state.ranges().cloned()
            },
            Expr::Preop { op: UnOp::Neg, inner } => {
                let rl = self.implied_rl_inner(decl, *inner)?;
                let ty = decl.body.expr_ty(*inner);
                let zero = RangeList::singleton(Sval::new(ty, 0));
                Some(zero.binop(BinOp::Sub, &rl))
            },
            Expr::Binop { op, left, right } => {
                let l = self.implied_rl_inner(decl, *left)?;
                let r = self.implied_rl_inner(decl, *right)?;
                Some(l.binop(*op, &r))
            },
            Expr::Preop { op: UnOp::Inc | UnOp::Dec, inner } => self.implied_rl_inner(decl, *inner),
            Expr::Postop { inner, .. } => self.implied_rl_inner(decl, *inner),
            _ => None,
        }
    }

    pub fn get_implied_value(&self, expr: ExprId) -> Option<Sval> {
        self.get_implied_rl(expr)?.to_sval()
    }

    /// Known upper bound; `None` when the variable could be anything.
    pub fn get_implied_max(&self, expr: ExprId) -> Option<Sval> {
        let rl = self.get_implied_rl(expr)?;
        let max = rl.max_sval()?;
        if max.is_max() { None } else { Some(max) }
    }

    pub fn get_implied_min(&self, expr: ExprId) -> Option<Sval> {
        let rl = self.get_implied_rl(expr)?;
        let min = rl.min_sval()?;
        if min.is_min() { None } else { Some(min) }
    }

    /// A bound that also considers each possibility separately: the largest
    /// guaranteed minimum across the paths that reached here. Noisier checks
    /// use it when the hard maximum is unknown.
    pub fn get_fuzzy_max(&self, expr: ExprId) -> Option<Sval> {
        if let Some(max) = self.get_implied_max(expr) {
            return Some(max);
        }
        let sm = self.get_sm_expr(EXTRA_OWNER, expr)?;
        let mut best: Option<Sval> = None;
        for &p in &self.store.get(sm).possible {
            let Some(rl) = self.store.get(p).state.ranges() else {
                continue;
            };
            let Some(min) = rl.min_sval() else { continue };
            if min.is_min() {
                continue;
            }
            best = Some(match best {
                Some(b) if b.cmp(min) != std::cmp::Ordering::Less => b,
                _ => min,
            });
        }
        best
    }

    /// True when the tracked range proves `expr != val`.
    pub fn implied_not_equal(&self, expr: ExprId, val: i64) -> bool {
        let Some((name, sym)) = self.expr_var(expr) else {
            return false;
        };
        let Some(state) = self.get_state(EXTRA_OWNER, &name, Some(sym)) else {
            return false;
        };
        let Some(rl) = state.ranges() else {
            return false;
        };
        let ty = rl.ty().unwrap_or_default();
        !rl.possibly_false(CmpOp::Ne, &RangeList::singleton(Sval::new(ty, val)))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn estate_names_are_canonical() {
        let a = alloc_estate(RangeList::new(Sval::new(Ty::I32, 1), Sval::new(Ty::I32, 5)));
        assert_eq!(a.name, "1-5");
        let b = alloc_estate(RangeList::new(Sval::new(Ty::I32, 1), Sval::new(Ty::I32, 5)));
        assert!(crate::state::same_state(&a, &b));
    }

    #[test]
    fn merge_unions_ranges() {
        let ops = ExtraOps;
        let a = alloc_estate_sval(Sval::new(Ty::I32, 1));
        let b = alloc_estate_sval(Sval::new(Ty::I32, 99));
        let m = ops.merge_states(&a, &b).unwrap();
        assert_eq!(m.name, "1,99");
    }
}

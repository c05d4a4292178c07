//! Null-dereference checking. Deliberately narrow in scope: it only
//! complains about dereferencing variables that are uninitialized, were
//! assigned null, or were assigned from a function known to return null.
//! If a dereference happens while any of those is still possible, it fires.

use std::{cell::RefCell, collections::HashSet, rc::Rc, sync::Arc};

use sift_core::{Expr, ExprId, SymbolId, UnOp};
use sift_db::FactKind;
use sift_engine::{
    merged_state, Assignment, CheckOps, Engine, OwnerId, SmId, SmState, State,
};

fn null_state() -> Arc<State> {
    State::named("null")
}

fn ok_state() -> Arc<State> {
    State::named("ok")
}

fn uninitialized_state() -> Arc<State> {
    State::named("uninitialized")
}

struct DerefCheck {
    /// Variables already reported once; one report per cause is plenty.
    ignored: RefCell<HashSet<(String, Option<SymbolId>)>>,
}

impl CheckOps for DerefCheck {
    fn check_name(&self) -> &'static str {
        "deref"
    }

    fn unmatched_state(&self, _sm: &SmState) -> Arc<State> {
        ok_state()
    }

    fn on_modify(&self, eng: &mut Engine, sm: SmId, _assign: Option<&Assignment>) {
        // Any modification makes the old verdict stale.
        let (owner, name, sym) = {
            let sm = eng.sm(sm);
            (sm.owner, eng.resolve_name(sm.name).to_string(), sm.sym)
        };
        eng.set_state(owner, &name, sym, ok_state());
    }
}

pub fn register(eng: &mut Engine) -> OwnerId {
    let check = Rc::new(DerefCheck { ignored: RefCell::new(HashSet::new()) });
    let owner = eng.register_check(check.clone());

    eng.hooks_mut().declaration.push(Rc::new(move |eng: &mut Engine, sym, init| {
        let decl = eng.decl();
        let s = decl.body.symbol(sym);
        if s.array_len.is_some() {
            return;
        }
        if init.is_none() {
            let name = s.name.clone();
            eng.set_state(owner, &name, Some(sym), uninitialized_state());
            eng.scoped_state(owner, &name, Some(sym));
        }
    }));

    eng.hooks_mut().assignment.push(Rc::new(move |eng: &mut Engine, assign: &Assignment| {
        if eng.decl().body.is_zero(assign.right) {
            if let Some((name, sym)) = eng.target_var(&assign.target) {
                eng.set_state(owner, &name, Some(sym), null_state());
            }
        }
    }));

    eng.hooks_mut().condition.push(Rc::new(move |eng: &mut Engine, expr: ExprId| {
        match_condition(eng, owner, expr);
    }));

    {
        let check = check.clone();
        eng.hooks_mut().deref.push(Rc::new(move |eng: &mut Engine, expr: ExprId| {
            let decl = eng.decl();
            let target = match &decl.body.expr(expr).kind {
                Expr::Preop { op: UnOp::Deref, inner } => decl.body.strip(*inner),
                Expr::Deref { base, arrow: true, .. } => decl.body.strip(*base),
                _ => return,
            };
            check.check_dereference(eng, owner, target);
        }));
    }

    {
        let check = check.clone();
        eng.hooks_mut().op.push(Rc::new(move |eng: &mut Engine, expr: ExprId| {
            // Indexing dereferences the base pointer just the same.
            if let Some(base) = eng.decl().body.array_base(expr) {
                check.check_dereference(eng, owner, base);
            }
        }));
    }

    {
        let check = check.clone();
        eng.select_return_states_hook(
            FactKind::Dereference,
            Rc::new(move |eng: &mut Engine, call: ExprId, name: &str, sym, _value: &str| {
                let _ = call;
                check.check_named(eng, owner, name, Some(sym));
            }),
        );
    }

    owner
}

/// Feeds one entry of the `allocation_funcs` config table: assignments from
/// this function may leave the target null.
pub fn add_allocation_fn(eng: &mut Engine, owner: OwnerId, fn_name: &str) {
    let fn_name = fn_name.to_string();
    eng.add_function_assign_hook(
        &fn_name.clone(),
        Rc::new(move |eng: &mut Engine, assign: &Assignment, _call: ExprId| {
            if let Some((name, sym)) = eng.target_var(&assign.target) {
                eng.set_state(owner, &name, Some(sym), State::named(&fn_name));
            }
        }),
    );
}

fn match_condition(eng: &mut Engine, owner: OwnerId, expr: ExprId) {
    let decl = eng.decl();
    let expr = decl.body.strip(expr);
    if let Expr::Assignment { left, right, .. } = &decl.body.expr(expr).kind {
        let (left, right) = (*left, *right);
        match_condition(eng, owner, right);
        match_condition(eng, owner, left);
        return;
    }
    if eng.get_state_expr(owner, expr).is_none() {
        return;
    }
    // Tested pointers are fine on the true side.
    eng.set_true_false_states_expr(owner, expr, Some(ok_state()), None);
}

impl DerefCheck {
    fn check_dereference(&self, eng: &mut Engine, owner: OwnerId, target: ExprId) {
        let Some((name, sym)) = eng.expr_var(target) else {
            return;
        };
        if eng.implied_not_equal(target, 0) {
            return;
        }
        self.check_named(eng, owner, &name, Some(sym));
    }

    fn check_named(&self, eng: &mut Engine, owner: OwnerId, name: &str, sym: Option<SymbolId>) {
        if eng.get_sm(owner, name, sym).is_none() {
            return;
        }
        if self.ignored.borrow().contains(&(name.to_string(), sym)) {
            return;
        }
        // A possible-null verdict outranks the others when several paths
        // contribute different causes.
        let mut uninitialized = false;
        let mut returns_null: Option<String> = None;
        for state in eng.possible_states(owner, name, sym) {
            if sift_engine::same_state(&state, &merged_state())
                || sift_engine::same_state(&state, &ok_state())
                || sift_engine::same_state(&state, &sift_engine::undefined_state())
            {
                continue;
            }
            if sift_engine::same_state(&state, &null_state()) {
                self.ignored.borrow_mut().insert((name.to_string(), sym));
                eng.emit_error(format!("potential NULL dereference '{name}'"));
                return;
            }
            if sift_engine::same_state(&state, &uninitialized_state()) {
                uninitialized = true;
            } else {
                returns_null = Some(state.name.clone());
            }
        }
        if uninitialized {
            self.ignored.borrow_mut().insert((name.to_string(), sym));
            eng.emit_error(format!("potentially dereferencing uninitialized '{name}'"));
        } else if let Some(cause) = returns_null {
            self.ignored.borrow_mut().insert((name.to_string(), sym));
            eng.emit_error(format!(
                "potential null dereference '{name}'. ({cause} returns null)"
            ));
        }
    }
}

//! Order-of-operations checking: a pointer dereferenced first and
//! null-checked afterwards means either the check is pointless or the
//! dereference is a bug. Either way somebody should look.

use std::{rc::Rc, sync::Arc};

use sift_core::{Expr, ExprId, UnOp};
use sift_engine::{same_state, Assignment, CheckOps, Engine, OwnerId, SmId, SmState, State};

fn derefed_state() -> Arc<State> {
    State::named("derefed")
}

fn oktocheck_state() -> Arc<State> {
    State::named("oktocheck")
}

struct DerefCheckOrder;

impl CheckOps for DerefCheckOrder {
    fn check_name(&self) -> &'static str {
        "deref_check"
    }

    fn unmatched_state(&self, _sm: &SmState) -> Arc<State> {
        oktocheck_state()
    }

    fn on_modify(&self, eng: &mut Engine, sm: SmId, _assign: Option<&Assignment>) {
        let (owner, name, sym) = {
            let sm = eng.sm(sm);
            (sm.owner, eng.resolve_name(sm.name).to_string(), sm.sym)
        };
        eng.set_state(owner, &name, sym, oktocheck_state());
    }
}

pub fn register(eng: &mut Engine) -> OwnerId {
    let owner = eng.register_check(Rc::new(DerefCheckOrder));

    eng.hooks_mut().deref.push(Rc::new(move |eng: &mut Engine, expr: ExprId| {
        let decl = eng.decl();
        let target = match &decl.body.expr(expr).kind {
            Expr::Preop { op: UnOp::Deref, inner } => decl.body.strip(*inner),
            Expr::Deref { base, arrow: true, .. } => decl.body.strip(*base),
            _ => return,
        };
        if eng.implied_not_equal(target, 0) {
            return;
        }
        eng.set_state_expr(owner, target, derefed_state());
    }));

    eng.hooks_mut().condition.push(Rc::new(move |eng: &mut Engine, expr: ExprId| {
        let Some(state) = eng.get_state_expr(owner, expr) else {
            return;
        };
        if !same_state(&state, &derefed_state()) {
            return;
        }
        if let Some((name, _)) = eng.expr_var(expr) {
            if !eng.implied_not_equal(expr, 0) {
                eng.emit_warn(format!("variable dereferenced before check '{name}'"));
            }
        }
        eng.set_state_expr(owner, expr, oktocheck_state());
    }));

    owner
}

//! Use-after-free tracking. A project-specific table names the functions
//! that consume their argument; afterwards any dereference, re-free, pass,
//! or return of that pointer is reported. Callees that free a parameter
//! publish a summary row so their callers get the same treatment.

use std::{rc::Rc, sync::Arc};

use sift_core::{Expr, ExprId, UnOp};
use sift_db::FactKind;
use sift_engine::{same_state, Assignment, CheckOps, Engine, OwnerId, SmId, State};

fn freed_state() -> Arc<State> {
    State::named("freed")
}

fn maybe_freed_state() -> Arc<State> {
    State::named("maybe_freed")
}

fn ok_state() -> Arc<State> {
    State::named("ok")
}

/// `(function, index of the freed argument)`.
const DEFAULT_TABLE: &[(&str, usize)] = &[("free", 0)];

const KERNEL_TABLE: &[(&str, usize)] = &[
    ("free", 0),
    ("kfree", 0),
    ("kvfree", 0),
    ("kzfree", 0),
    ("kfree_skb", 0),
    ("consume_skb", 0),
    ("kmem_cache_free", 1),
    ("mempool_free", 0),
    ("free_netdev", 0),
    ("sock_release", 0),
    ("vfree", 0),
];

const ILLUMOS_TABLE: &[(&str, usize)] = &[("free", 0), ("kmem_free", 0)];

struct FreeCheck;

impl CheckOps for FreeCheck {
    fn check_name(&self) -> &'static str {
        "free"
    }

    fn on_modify(&self, eng: &mut Engine, sm: SmId, _assign: Option<&Assignment>) {
        let (owner, name, sym, state) = {
            let sm = eng.sm(sm);
            (sm.owner, eng.resolve_name(sm.name).to_string(), sm.sym, sm.state.clone())
        };
        if !same_state(&state, &ok_state()) {
            eng.set_state(owner, &name, sym, ok_state());
        }
    }

    fn pre_merge(&self, eng: &mut Engine, cur: SmId, _other: SmId) {
        if !eng.is_impossible_path() {
            return;
        }
        let (owner, name, sym) = {
            let sm = eng.sm(cur);
            (sm.owner, eng.resolve_name(sm.name).to_string(), sm.sym)
        };
        eng.set_state(owner, &name, sym, ok_state());
    }
}

fn table_for(eng: &Engine) -> &'static [(&'static str, usize)] {
    match eng.project() {
        sift_engine::Project::Kernel => KERNEL_TABLE,
        sift_engine::Project::IllumosKernel => ILLUMOS_TABLE,
        sift_engine::Project::None => DEFAULT_TABLE,
    }
}

fn is_freed(eng: &Engine, owner: OwnerId, name: &str, sym: Option<sift_core::SymbolId>) -> bool {
    eng.get_state(owner, name, sym)
        .map(|s| same_state(&s, &freed_state()) || same_state(&s, &maybe_freed_state()))
        .unwrap_or(false)
}

pub fn register(eng: &mut Engine) -> OwnerId {
    let owner = eng.register_check(Rc::new(FreeCheck));

    for &(fn_name, param) in table_for(eng) {
        eng.add_function_hook(
            fn_name,
            Rc::new(move |eng: &mut Engine, call: ExprId| {
                let decl = eng.decl();
                let Expr::Call { args, .. } = &decl.body.expr(call).kind else {
                    return;
                };
                let Some(&arg) = args.get(param) else {
                    return;
                };
                let Some((name, sym)) = eng.expr_var(decl.body.strip(arg)) else {
                    return;
                };
                if is_freed(eng, owner, &name, Some(sym)) {
                    eng.emit_error(format!("double free of '{name}'"));
                }
                eng.set_state(owner, &name, Some(sym), freed_state());
            }),
        );
    }

    eng.hooks_mut().deref.push(Rc::new(move |eng: &mut Engine, expr: ExprId| {
        let decl = eng.decl();
        let target = match &decl.body.expr(expr).kind {
            Expr::Preop { op: UnOp::Deref, inner } => decl.body.strip(*inner),
            Expr::Deref { base, .. } => decl.body.strip(*base),
            _ => return,
        };
        let Some((name, sym)) = eng.expr_var(target) else {
            return;
        };
        if !is_freed(eng, owner, &name, Some(sym)) {
            return;
        }
        if eng.is_impossible_path() {
            return;
        }
        eng.emit_error(format!("dereferencing freed memory '{name}'"));
        // One report per pointer; it stays dead either way.
        eng.set_state(owner, &name, Some(sym), ok_state());
    }));

    eng.hooks_mut().function_call.push(Rc::new(move |eng: &mut Engine, call: ExprId| {
        let decl = eng.decl();
        let Expr::Call { func, args } = decl.body.expr(call).kind.clone() else {
            return;
        };
        // The free primitives themselves handle their argument above.
        if let Some((fn_name, _)) = decl.body.expr_to_var(func) {
            if table_for(eng).iter().any(|&(n, _)| n == fn_name) {
                return;
            }
        }
        for arg in args {
            let Some((name, sym)) = eng.expr_var(decl.body.strip(arg)) else {
                continue;
            };
            if is_freed(eng, owner, &name, Some(sym)) && !eng.is_impossible_path() {
                eng.emit_warn(format!("passing freed memory '{name}'"));
                eng.set_state(owner, &name, Some(sym), ok_state());
            }
        }
    }));

    eng.hooks_mut().ret.push(Rc::new(move |eng: &mut Engine, _stmt, expr: Option<ExprId>| {
        let Some(expr) = expr else { return };
        let Some((name, sym)) = eng.expr_var(expr) else {
            return;
        };
        if is_freed(eng, owner, &name, Some(sym)) && !eng.is_impossible_path() {
            eng.emit_warn(format!("returning freed memory '{name}'"));
        }
    }));

    // Callee summaries: a function that freed our argument freed it here too.
    eng.select_return_states_hook(
        FactKind::ParamFreed,
        Rc::new(move |eng: &mut Engine, _call, name: &str, sym, _value: &str| {
            eng.set_state(owner, name, Some(sym), freed_state());
        }),
    );
    eng.select_return_states_hook(
        FactKind::MaybeFreed,
        Rc::new(move |eng: &mut Engine, _call, name: &str, sym, _value: &str| {
            eng.set_state(owner, name, Some(sym), maybe_freed_state());
        }),
    );

    // Export: every return path on which a parameter ended up freed.
    eng.hooks_mut().end_func.push(Rc::new(move |eng: &mut Engine| {
        let decl = eng.decl();
        let snapshots: Vec<_> = eng.return_snapshots().to_vec();
        let mut facts = Vec::new();
        for (i, snap) in snapshots.iter().enumerate() {
            for (idx, &param) in decl.params.iter().enumerate() {
                let name = decl.body.symbol(param).name.clone();
                let Some(state) = eng.state_in(&snap.stree, owner, &name, Some(param)) else {
                    continue;
                };
                let kind = if same_state(&state, &freed_state()) {
                    FactKind::ParamFreed
                } else if same_state(&state, &maybe_freed_state()) {
                    FactKind::MaybeFreed
                } else {
                    continue;
                };
                facts.push((i as i32 + 1, kind, idx as i32));
            }
        }
        for (rid, kind, param) in facts {
            eng.insert_return_fact(rid, kind, param, "$", "1");
        }
    }));

    owner
}

//! Lock-pairing checks. Lock and unlock primitives flip a per-lock state;
//! at end of function every return path is inspected, and a lock that is
//! held on some paths but released on others is reported.

use std::{rc::Rc, sync::Arc};

use sift_core::{Expr, ExprId};
use sift_db::FactKind;
use sift_engine::{same_state, CheckOps, Engine, OwnerId, State};

fn locked_state() -> Arc<State> {
    State::named("locked")
}

fn unlocked_state() -> Arc<State> {
    State::named("unlocked")
}

struct LockInfo {
    name: &'static str,
    lock: bool,
    /// Which argument names the lock.
    arg: usize,
}

const LOCK_TABLE: &[LockInfo] = &[
    LockInfo { name: "lock", lock: true, arg: 0 },
    LockInfo { name: "unlock", lock: false, arg: 0 },
    LockInfo { name: "spin_lock", lock: true, arg: 0 },
    LockInfo { name: "spin_unlock", lock: false, arg: 0 },
    LockInfo { name: "spin_lock_irqsave", lock: true, arg: 0 },
    LockInfo { name: "spin_unlock_irqrestore", lock: false, arg: 0 },
    LockInfo { name: "mutex_lock", lock: true, arg: 0 },
    LockInfo { name: "mutex_unlock", lock: false, arg: 0 },
    LockInfo { name: "down", lock: true, arg: 0 },
    LockInfo { name: "up", lock: false, arg: 0 },
];

struct LockingCheck;

impl CheckOps for LockingCheck {
    fn check_name(&self) -> &'static str {
        "locking"
    }
}

pub fn register(eng: &mut Engine) -> OwnerId {
    let owner = eng.register_check(Rc::new(LockingCheck));

    for info in LOCK_TABLE {
        let state = if info.lock { locked_state() } else { unlocked_state() };
        let arg_idx = info.arg;
        eng.add_function_hook(
            info.name,
            Rc::new(move |eng: &mut Engine, call: ExprId| {
                let decl = eng.decl();
                let Expr::Call { args, .. } = &decl.body.expr(call).kind else {
                    return;
                };
                let Some(&arg) = args.get(arg_idx) else {
                    return;
                };
                let Some((name, sym)) = eng.expr_var(decl.body.strip(arg)) else {
                    return;
                };
                eng.set_state(owner, &name, Some(sym), state.clone());
            }),
        );
    }

    eng.hooks_mut().end_func.push(Rc::new(move |eng: &mut Engine| {
        check_consistent_returns(eng, owner);
    }));

    owner
}

/// Collects, per lock, which return paths hold it and which released it.
/// Disagreement between paths is the bug this checker exists for.
fn check_consistent_returns(eng: &mut Engine, owner: OwnerId) {
    let snapshots: Vec<_> = eng.return_snapshots().to_vec();
    let mut names: Vec<(String, Option<sift_core::SymbolId>)> = Vec::new();
    for snap in &snapshots {
        for id in snap.stree.iter() {
            let sm = eng.sm(id);
            if sm.owner != owner {
                continue;
            }
            let name = eng.resolve_name(sm.name).to_string();
            if !names.iter().any(|(n, s)| *n == name && *s == sm.sym) {
                names.push((name, sm.sym));
            }
        }
    }

    let mut facts = Vec::new();
    for (name, sym) in names {
        let mut locked_on = Vec::new();
        let mut unlocked_on = Vec::new();
        for (i, snap) in snapshots.iter().enumerate() {
            let Some(state) = eng.state_in(&snap.stree, owner, &name, sym) else {
                continue;
            };
            if same_state(&state, &locked_state()) {
                locked_on.push(snap.line);
                facts.push((i as i32 + 1, FactKind::Lock));
            } else if same_state(&state, &unlocked_state()) {
                unlocked_on.push(snap.line);
                facts.push((i as i32 + 1, FactKind::Unlock));
            }
        }
        if !locked_on.is_empty() && !unlocked_on.is_empty() {
            eng.emit_warn(format!("inconsistent returns '{name}'"));
        }
    }

    for (rid, kind) in facts {
        eng.insert_return_fact(rid, kind, sift_db::PARAM_GLOBAL, "$", "1");
    }
}

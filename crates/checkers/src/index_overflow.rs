//! Array bound checking: compares the largest value the index can hold
//! against the declared element count of the array being subscripted.

use std::rc::Rc;

use sift_core::{Expr, ExprId};
use sift_engine::Engine;

pub fn register(eng: &mut Engine) {
    eng.hooks_mut().op.push(Rc::new(array_check));
}

fn array_check(eng: &mut Engine, expr: ExprId) {
    let decl = eng.decl();
    let Some(base) = decl.body.array_base(expr) else {
        return;
    };
    let Some(offset) = decl.body.array_offset(expr) else {
        return;
    };
    if eng.is_impossible_path() {
        return;
    }

    let Expr::Sym { sym } = &decl.body.expr(base).kind else {
        return;
    };
    let Some(array_size) = decl.body.symbol(*sym).array_len else {
        return;
    };
    if array_size <= 1 {
        return;
    }

    let max = if eng.options().spammy {
        eng.get_fuzzy_max(offset)
    } else {
        eng.get_implied_max(offset)
    };
    let Some(max) = max else { return };
    if max.is_negative() {
        return;
    }
    if array_size > max.uvalue() {
        return;
    }

    let name = decl.body.symbol(*sym).name.clone();
    eng.emit_error(format!("buffer overflow '{name}' {array_size} <= {max}"));
}

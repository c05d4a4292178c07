//! Integration coverage for the implied-value machinery: conditions on a
//! merged variable must sharpen the other variables that were set on the
//! same historical branches.

use std::{cell::Cell, cell::RefCell, rc::Rc};

use sift_core::{CmpOp, Expr, Ty};
use sift_engine::{Engine, Options, EXTRA_OWNER};
use sift_test_utils::FnBuilder;

/// The classic shape:
///
/// ```c
/// foo = 1;
/// if (bar)
///         foo = 99;
/// if (foo == 99)
///         probe(bar);      /* bar must be nonzero here */
/// ```
#[test]
fn condition_on_merged_var_refines_correlated_var() {
    let mut b = FnBuilder::new("f");
    let probe = b.func("probe");
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

    let be2 = b.sym(bar);
    let call = b.call(probe, vec![be2]);
    let probe_stmt = b.expr_stmt(call);
    let fe2 = b.sym(foo);
    let v99b = b.int(99);
    let cond = b.compare(CmpOp::Eq, fe2, v99b);
    let iff2 = b.if_stmt(cond, probe_stmt, None);
    b.push(iff2);

    let bar_nonzero = Rc::new(Cell::new(None));
    let seen = bar_nonzero.clone();

    let mut eng = Engine::new(Options::default());
    eng.add_function_hook(
        "probe",
        Rc::new(move |eng: &mut Engine, call| {
            let decl = eng.decl();
            let Expr::Call { args, .. } = &decl.body.expr(call).kind else {
                return;
            };
            seen.set(Some(eng.implied_not_equal(args[0], 0)));
        }),
    );
    eng.analyze(b.finish());

    assert_eq!(bar_nonzero.get(), Some(true));
}

/// The false branch of the same condition implies nothing about `bar`
/// when `foo` could be 99 on both sides.
#[test]
fn uncertain_history_is_not_refined() {
    let mut b = FnBuilder::new("f");
    let probe = b.func("probe");
    let bar = b.param("bar", Ty::I32);
    let foo = b.param("foo", Ty::I32);

    // No merge history for foo at all: the gate is unmerged, so no
    // refinement may occur.
    let be2 = b.sym(bar);
    let call = b.call(probe, vec![be2]);
    let probe_stmt = b.expr_stmt(call);
    let fe = b.sym(foo);
    let v99 = b.int(99);
    let cond = b.compare(CmpOp::Eq, fe, v99);
    let iff = b.if_stmt(cond, probe_stmt, None);
    b.push(iff);

    let bar_nonzero = Rc::new(Cell::new(None));
    let seen = bar_nonzero.clone();

    let mut eng = Engine::new(Options::default());
    eng.add_function_hook(
        "probe",
        Rc::new(move |eng: &mut Engine, call| {
            let decl = eng.decl();
            let Expr::Call { args, .. } = &decl.body.expr(call).kind else {
                return;
            };
            seen.set(Some(eng.implied_not_equal(args[0], 0)));
        }),
    );
    eng.analyze(b.finish());

    assert_eq!(bar_nonzero.get(), Some(false));
}

/// A child cap of zero makes the engine refuse every refinement, which must
/// degrade precision, never soundness.
#[test]
fn child_cap_disables_refinement() {
    let mut b = FnBuilder::new("f");
    let probe = b.func("probe");
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

    let be2 = b.sym(bar);
    let call = b.call(probe, vec![be2]);
    let probe_stmt = b.expr_stmt(call);
    let fe2 = b.sym(foo);
    let v99b = b.int(99);
    let cond = b.compare(CmpOp::Eq, fe2, v99b);
    let iff2 = b.if_stmt(cond, probe_stmt, None);
    b.push(iff2);

    let bar_nonzero = Rc::new(Cell::new(None));
    let seen = bar_nonzero.clone();

    let mut eng = Engine::new(Options { implied_children_cap: 0, ..Options::default() });
    eng.add_function_hook(
        "probe",
        Rc::new(move |eng: &mut Engine, call| {
            let decl = eng.decl();
            let Expr::Call { args, .. } = &decl.body.expr(call).kind else {
                return;
            };
            seen.set(Some(eng.implied_not_equal(args[0], 0)));
        }),
    );
    eng.analyze(b.finish());

    // The probe still runs, but nothing was learned about bar.
    assert_eq!(bar_nonzero.get(), Some(false));
}

/// After a canonical counting loop the induction variable holds exactly the
/// exit value.
#[test]
fn loop_fixpoint_pins_induction_variable() {
    let mut b = FnBuilder::new("f");
    let probe = b.func("probe");
    let i = b.local("i", Ty::I32);
    let d = b.decl_stmt(i, None);
    b.push(d);

    let ie = b.sym(i);
    let zero = b.int(0);
    let init = b.assign(ie, zero);
    let pre = b.expr_stmt(init);
    let ie2 = b.sym(i);
    let ten = b.int(10);
    let cond = b.compare(CmpOp::Lt, ie2, ten);
    let ie3 = b.sym(i);
    let bump = b.post_inc(ie3);
    let post = b.expr_stmt(bump);
    let body = b.block(vec![]);
    let looped = b.for_loop(Some(pre), Some(cond), Some(post), body);
    b.push(looped);

    let ie4 = b.sym(i);
    let call = b.call(probe, vec![ie4]);
    let s = b.expr_stmt(call);
    b.push(s);

    let value = Rc::new(Cell::new(None));
    let seen = value.clone();
    let mut eng = Engine::new(Options::default());
    eng.add_function_hook(
        "probe",
        Rc::new(move |eng: &mut Engine, call| {
            let decl = eng.decl();
            let Expr::Call { args, .. } = &decl.body.expr(call).kind else {
                return;
            };
            seen.set(eng.get_implied_value(args[0]).map(|v| v.value()));
        }),
    );
    eng.analyze(b.finish());

    assert_eq!(value.get(), Some(10));
}

/// Merging the same logical content twice leaves the state names stable:
/// the canonical-form property the loop fixpoint depends on.
#[test]
fn merge_is_idempotent_on_equal_content() {
    let mut b = FnBuilder::new("f");
    let cond = b.param("cond", Ty::I32);
    let x = b.local("x", Ty::I32);
    let seven = b.int(7);
    let d = b.decl_stmt(x, Some(seven));
    b.push(d);

    // if (cond) x = 7; -- both sides agree afterwards.
    let xe = b.sym(x);
    let seven2 = b.int(7);
    let asn = b.assign(xe, seven2);
    let then = b.expr_stmt(asn);
    let ce = b.sym(cond);
    let iff = b.if_stmt(ce, then, None);
    b.push(iff);

    let probe = b.func("probe");
    let xe2 = b.sym(x);
    let call = b.call(probe, vec![xe2]);
    let s = b.expr_stmt(call);
    b.push(s);

    let value = Rc::new(RefCell::new(None));
    let seen = value.clone();
    let mut eng = Engine::new(Options::default());
    eng.add_function_hook(
        "probe",
        Rc::new(move |eng: &mut Engine, call| {
            let decl = eng.decl();
            let Expr::Call { args, .. } = &decl.body.expr(call).kind else {
                return;
            };
            let state = eng.get_state_expr(EXTRA_OWNER, args[0]);
            *seen.borrow_mut() = state.map(|s| s.name.clone());
        }),
    );
    eng.analyze(b.finish());

    assert_eq!(value.borrow().clone(), Some("7".to_string()));
}

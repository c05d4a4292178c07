//! End-to-end scenarios: small function bodies driven through the engine
//! with the built-in checkers, asserting the exact diagnostics.

use pretty_assertions::assert_eq;
use sift_checkers::{deref, register_all};
use sift_core::{CmpOp, Ty};
use sift_test_utils::{analyze_one, assert_clean, assert_reported, FnBuilder};

/// `int *p = 0; *p = 1;`
#[test]
fn null_assignment_then_store() {
    let mut b = FnBuilder::new("frob");
    let p = b.local("p", Ty::Ptr);
    let zero = b.val(Ty::Ptr, 0);
    let d = b.decl_stmt(p, Some(zero));
    b.push(d);
    let pe = b.sym(p);
    let store = b.deref(pe);
    let one = b.int(1);
    let asn = b.assign(store, one);
    let s = b.expr_stmt(asn);
    b.push(s);

    let diags = analyze_one(b.finish(), |e| {
        register_all(e);
    });
    assert_reported(&diags, "error: potential NULL dereference 'p'");
}

/// `int *p; if (cond) p = 0; *p = 1;`
#[test]
fn null_on_one_path() {
    let mut b = FnBuilder::new("frob");
    let cond = b.param("cond", Ty::I32);
    let p = b.local("p", Ty::Ptr);
    let d = b.decl_stmt(p, None);
    b.push(d);

    let pe = b.sym(p);
    let zero = b.val(Ty::Ptr, 0);
    let asn = b.assign(pe, zero);
    let then = b.expr_stmt(asn);
    let ce = b.sym(cond);
    let iff = b.if_stmt(ce, then, None);
    b.push(iff);

    let pe2 = b.sym(p);
    let store = b.deref(pe2);
    let one = b.int(1);
    let asn2 = b.assign(store, one);
    let s = b.expr_stmt(asn2);
    b.push(s);

    let diags = analyze_one(b.finish(), |e| {
        register_all(e);
    });
    assert_reported(&diags, "error: potential NULL dereference 'p'");
}

/// `int *p = alloc(); if (p) *p = 1;` with `alloc` known to return null.
#[test]
fn checked_allocation_is_clean() {
    let mut b = FnBuilder::new("frob");
    let alloc = b.func("alloc");
    let p = b.local("p", Ty::Ptr);
    let call = b.call(alloc, vec![]);
    let d = b.decl_stmt(p, Some(call));
    b.push(d);

    let pe = b.sym(p);
    let store = b.deref(pe);
    let one = b.int(1);
    let asn = b.assign(store, one);
    let then = b.expr_stmt(asn);
    let ce = b.sym(p);
    let iff = b.if_stmt(ce, then, None);
    b.push(iff);

    let diags = analyze_one(b.finish(), |e| {
        let regs = register_all(e);
        deref::add_allocation_fn(e, regs.deref, "alloc");
    });
    assert_clean(&diags, "dereference");
    assert_clean(&diags, "null");
}

/// `int *p = alloc(); *p = 1; if (p) x = 1;`
#[test]
fn dereference_before_check() {
    let mut b = FnBuilder::new("frob");
    let alloc = b.func("alloc");
    let p = b.local("p", Ty::Ptr);
    let x = b.local("x", Ty::I32);
    let call = b.call(alloc, vec![]);
    let d = b.decl_stmt(p, Some(call));
    b.push(d);
    let dx = b.decl_stmt(x, None);
    b.push(dx);

    let pe = b.sym(p);
    let store = b.deref(pe);
    let one = b.int(1);
    let asn = b.assign(store, one);
    let s = b.expr_stmt(asn);
    b.push(s);

    let xe = b.sym(x);
    let one2 = b.int(1);
    let xasn = b.assign(xe, one2);
    let then = b.expr_stmt(xasn);
    let ce = b.sym(p);
    let iff = b.if_stmt(ce, then, None);
    b.push(iff);

    let diags = analyze_one(b.finish(), |e| {
        register_all(e);
    });
    assert_reported(&diags, "warn: variable dereferenced before check 'p'");
}

/// `free(p); p->x = 1;`
#[test]
fn use_after_free() {
    let mut b = FnBuilder::new("frob");
    let free_fn = b.func("free");
    let p = b.param("p", Ty::Ptr);
    let pe = b.sym(p);
    let call = b.call(free_fn, vec![pe]);
    let s1 = b.expr_stmt(call);
    b.push(s1);

    let pe2 = b.sym(p);
    let field = b.member(pe2, "x");
    let one = b.int(1);
    let asn = b.assign(field, one);
    let s2 = b.expr_stmt(asn);
    b.push(s2);

    let diags = analyze_one(b.finish(), |e| {
        register_all(e);
    });
    assert_reported(&diags, "error: dereferencing freed memory 'p'");
}

/// `for (i = 0; i < 10; i++); arr[i] = 0;` with `arr` of size 10.
#[test]
fn loop_exit_index_overflows() {
    let mut b = FnBuilder::new("frob");
    let i = b.local("i", Ty::I32);
    let arr = b.array("arr", Ty::I32, 10);
    let di = b.decl_stmt(i, None);
    b.push(di);

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
    let elem = b.index(arr, ie4);
    let zero2 = b.int(0);
    let asn = b.assign(elem, zero2);
    let s = b.expr_stmt(asn);
    b.push(s);

    let diags = analyze_one(b.finish(), |e| {
        register_all(e);
    });
    assert_reported(&diags, "error: buffer overflow 'arr' 10 <= 10");
}

/// `spin_lock(x); if (cond) return; spin_unlock(x);`
#[test]
fn inconsistent_lock_returns() {
    let mut b = FnBuilder::new("frob");
    let spin_lock = b.func("spin_lock");
    let spin_unlock = b.func("spin_unlock");
    let x = b.param("x", Ty::Ptr);
    let cond = b.param("cond", Ty::I32);

    let xe = b.sym(x);
    let lock = b.call(spin_lock, vec![xe]);
    let s1 = b.expr_stmt(lock);
    b.push(s1);

    let ret = b.ret(None);
    let ce = b.sym(cond);
    let iff = b.if_stmt(ce, ret, None);
    b.push(iff);

    let xe2 = b.sym(x);
    let unlock = b.call(spin_unlock, vec![xe2]);
    let s2 = b.expr_stmt(unlock);
    b.push(s2);

    let diags = analyze_one(b.finish(), |e| {
        register_all(e);
    });
    assert_reported(&diags, "warn: inconsistent returns 'x'");
}

/// The same input analyzed twice produces the identical diagnostic stream.
#[test]
fn diagnostics_are_deterministic() {
    let build = || {
        let mut b = FnBuilder::new("frob");
        let cond = b.param("cond", Ty::I32);
        let p = b.local("p", Ty::Ptr);
        let d = b.decl_stmt(p, None);
        b.push(d);
        let pe = b.sym(p);
        let zero = b.val(Ty::Ptr, 0);
        let asn = b.assign(pe, zero);
        let then = b.expr_stmt(asn);
        let ce = b.sym(cond);
        let iff = b.if_stmt(ce, then, None);
        b.push(iff);
        let pe2 = b.sym(p);
        let store = b.deref(pe2);
        let one = b.int(1);
        let asn2 = b.assign(store, one);
        let s = b.expr_stmt(asn2);
        b.push(s);
        b.finish()
    };

    let one = analyze_one(build(), |e| {
        register_all(e);
    });
    let two = analyze_one(build(), |e| {
        register_all(e);
    });
    assert_eq!(one, two);
}

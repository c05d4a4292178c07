//! Builders for writing elaborated function bodies by hand in tests.
//!
//! Statements are numbered with consecutive source lines as they are pushed,
//! so diagnostics carry predictable positions.

use std::rc::Rc;

use sift_core::{
    AssignOp, BinOp, CmpOp, Expr, ExprId, ExprNode, FnDecl, LogicalOp, Pos, PostOp, Stmt, StmtId,
    StmtNode, Sval, Symbol, SymbolId, Ty, UnOp,
};
use sift_engine::{Engine, Options};

// FUNCTION BUILDER
// ================================================================================================

pub struct FnBuilder {
    body: sift_core::FnBody,
    file: String,
    name: String,
    is_static: bool,
    params: Vec<SymbolId>,
    ret_ty: Ty,
    top: Vec<StmtId>,
    next_line: u32,
}

impl FnBuilder {
    pub fn new(name: &str) -> Self {
        FnBuilder {
            body: sift_core::FnBody::new(),
            file: "test.c".to_string(),
            name: name.to_string(),
            is_static: false,
            params: Vec::new(),
            ret_ty: Ty::I32,
            top: Vec::new(),
            next_line: 1,
        }
    }

    pub fn file(mut self, file: &str) -> Self {
        self.file = file.to_string();
        self
    }

    // SYMBOLS
    // --------------------------------------------------------------------------------------------

    pub fn param(&mut self, name: &str, ty: Ty) -> SymbolId {
        let idx = self.params.len() as u32;
        let sym = self.body.add_symbol(Symbol {
            name: name.to_string(),
            ty,
            array_len: None,
            param: Some(idx),
            global: false,
        });
        self.params.push(sym);
        sym
    }

    pub fn local(&mut self, name: &str, ty: Ty) -> SymbolId {
        self.body.add_symbol(Symbol {
            name: name.to_string(),
            ty,
            array_len: None,
            param: None,
            global: false,
        })
    }

    pub fn array(&mut self, name: &str, ty: Ty, len: u64) -> SymbolId {
        self.body.add_symbol(Symbol {
            name: name.to_string(),
            ty,
            array_len: Some(len),
            param: None,
            global: false,
        })
    }

    /// A function name usable as a call target.
    pub fn func(&mut self, name: &str) -> SymbolId {
        self.body.add_symbol(Symbol {
            name: name.to_string(),
            ty: Ty::Ptr,
            array_len: None,
            param: None,
            global: true,
        })
    }

    // EXPRESSIONS
    // --------------------------------------------------------------------------------------------

    fn expr(&mut self, kind: Expr) -> ExprId {
        let pos = Pos::line(self.next_line);
        self.body.push_expr(ExprNode { pos, ty: None, kind })
    }

    pub fn val(&mut self, ty: Ty, v: i64) -> ExprId {
        self.expr(Expr::Value { val: Sval::new(ty, v) })
    }

    pub fn int(&mut self, v: i64) -> ExprId {
        self.val(Ty::I32, v)
    }

    pub fn sym(&mut self, sym: SymbolId) -> ExprId {
        self.expr(Expr::Sym { sym })
    }

    pub fn deref(&mut self, inner: ExprId) -> ExprId {
        self.expr(Expr::Preop { op: UnOp::Deref, inner })
    }

    pub fn addr_of(&mut self, inner: ExprId) -> ExprId {
        self.expr(Expr::Preop { op: UnOp::AddrOf, inner })
    }

    pub fn not(&mut self, inner: ExprId) -> ExprId {
        self.expr(Expr::Preop { op: UnOp::Not, inner })
    }

    pub fn post_inc(&mut self, inner: ExprId) -> ExprId {
        self.expr(Expr::Postop { op: PostOp::Inc, inner })
    }

    pub fn member(&mut self, base: ExprId, field: &str) -> ExprId {
        self.expr(Expr::Deref { base, member: field.to_string(), arrow: true })
    }

    pub fn binop(&mut self, op: BinOp, left: ExprId, right: ExprId) -> ExprId {
        self.expr(Expr::Binop { op, left, right })
    }

    pub fn compare(&mut self, op: CmpOp, left: ExprId, right: ExprId) -> ExprId {
        self.expr(Expr::Compare { op, left, right })
    }

    pub fn logical(&mut self, op: LogicalOp, left: ExprId, right: ExprId) -> ExprId {
        self.expr(Expr::Logical { op, left, right })
    }

    pub fn assign(&mut self, left: ExprId, right: ExprId) -> ExprId {
        self.expr(Expr::Assignment { op: AssignOp::Assign, left, right })
    }

    pub fn call(&mut self, func: SymbolId, args: Vec<ExprId>) -> ExprId {
        let func = self.sym(func);
        self.expr(Expr::Call { func, args })
    }

    /// `arr[idx]` in the lowered `*(arr + idx)` form.
    pub fn index(&mut self, arr: SymbolId, idx: ExprId) -> ExprId {
        let base = self.sym(arr);
        let sum = self.binop(BinOp::Add, base, idx);
        self.deref(sum)
    }

    // STATEMENTS
    // --------------------------------------------------------------------------------------------

    fn stmt(&mut self, kind: Stmt) -> StmtId {
        let pos = Pos::line(self.next_line);
        self.next_line += 1;
        self.body.push_stmt(StmtNode { pos, kind })
    }

    /// Builds a statement without appending it to the function body (for
    /// branches and loop bodies).
    pub fn stmt_detached(&mut self, kind: Stmt) -> StmtId {
        self.stmt(kind)
    }

    pub fn push(&mut self, stmt: StmtId) {
        self.top.push(stmt);
    }

    pub fn expr_stmt(&mut self, expr: ExprId) -> StmtId {
        self.stmt(Stmt::Expression { expr })
    }

    pub fn decl_stmt(&mut self, sym: SymbolId, init: Option<ExprId>) -> StmtId {
        self.stmt(Stmt::Declaration { decls: vec![(sym, init)] })
    }

    pub fn block(&mut self, stmts: Vec<StmtId>) -> StmtId {
        self.stmt(Stmt::Compound { stmts })
    }

    pub fn if_stmt(&mut self, cond: ExprId, then: StmtId, otherwise: Option<StmtId>) -> StmtId {
        self.stmt(Stmt::If { cond, then, otherwise })
    }

    pub fn ret(&mut self, expr: Option<ExprId>) -> StmtId {
        self.stmt(Stmt::Return { expr })
    }

    pub fn for_loop(
        &mut self,
        pre: Option<StmtId>,
        cond: Option<ExprId>,
        post: Option<StmtId>,
        body: StmtId,
    ) -> StmtId {
        self.stmt(Stmt::Iterator {
            pre_statement: pre,
            pre_condition: cond,
            body,
            post_statement: post,
            post_condition: None,
        })
    }

    // FINISH
    // --------------------------------------------------------------------------------------------

    pub fn finish(mut self) -> Rc<FnDecl> {
        let stmts = std::mem::take(&mut self.top);
        let root = self.body.push_stmt(StmtNode {
            pos: Pos::line(1),
            kind: Stmt::Compound { stmts },
        });
        Rc::new(FnDecl {
            file: self.file,
            name: self.name,
            is_static: self.is_static,
            params: self.params,
            ret_ty: self.ret_ty,
            body: self.body,
            root,
        })
    }
}

// HARNESS
// ================================================================================================

/// Runs one function through a fresh engine with the given checkers
/// registered, returning the rendered diagnostic lines.
pub fn analyze_one(decl: Rc<FnDecl>, register: impl FnOnce(&mut Engine)) -> Vec<String> {
    analyze_one_with(Options::default(), decl, register)
}

pub fn analyze_one_with(
    opts: Options,
    decl: Rc<FnDecl>,
    register: impl FnOnce(&mut Engine),
) -> Vec<String> {
    let mut eng = Engine::new(opts);
    register(&mut eng);
    eng.analyze(decl);
    eng.take_diagnostics().iter().map(|d| d.to_string()).collect()
}

/// Asserts that some diagnostic line contains the fragment.
pub fn assert_reported(diags: &[String], fragment: &str) {
    assert!(
        diags.iter().any(|d| d.contains(fragment)),
        "expected a diagnostic containing {fragment:?}, got: {diags:#?}"
    );
}

/// Asserts that no diagnostic line contains the fragment.
pub fn assert_clean(diags: &[String], fragment: &str) {
    assert!(
        !diags.iter().any(|d| d.contains(fragment)),
        "expected no diagnostic containing {fragment:?}, got: {diags:#?}"
    );
}

use core::fmt;

use crate::{Sval, Ty};

// IDENTIFIERS
// ================================================================================================

/// Index of an expression node within its owning [`FnBody`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::From)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExprId(pub u32);

/// Index of a statement node within its owning [`FnBody`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::From)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StmtId(pub u32);

/// Index of a declared symbol within its owning [`FnBody`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::From)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SymbolId(pub u32);

/// Source position as the front-end reported it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pos {
    pub line: u32,
    pub pos: u16,
    pub stream: u16,
}

impl Pos {
    pub const fn line(line: u32) -> Self {
        Pos { line, pos: 0, stream: 0 }
    }
}

/// A declared variable, parameter, or function name.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Symbol {
    pub name: String,
    pub ty: Ty,
    /// Number of elements when the symbol is an array of known size.
    #[cfg_attr(feature = "serde", serde(default))]
    pub array_len: Option<u64>,
    /// Zero-based argument position for parameters.
    #[cfg_attr(feature = "serde", serde(default))]
    pub param: Option<u32>,
    /// File-scope storage rather than a local or a parameter.
    #[cfg_attr(feature = "serde", serde(default))]
    pub global: bool,
}

// OPERATORS
// ================================================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnOp {
    Deref,
    AddrOf,
    Not,
    BitNot,
    Neg,
    Inc,
    Dec,
    Paren,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PostOp {
    Inc,
    Dec,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        };
        f.write_str(s)
    }
}

/// Comparison operators, with the unsigned variants the front-end emits when
/// the usual conversions made the comparison unsigned.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    UnsignedLt,
    UnsignedLte,
    UnsignedGt,
    UnsignedGte,
}

impl CmpOp {
    /// The operator that holds exactly when `self` does not.
    pub fn negate(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Gte,
            CmpOp::Lte => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Lte,
            CmpOp::Gte => CmpOp::Lt,
            CmpOp::UnsignedLt => CmpOp::UnsignedGte,
            CmpOp::UnsignedLte => CmpOp::UnsignedGt,
            CmpOp::UnsignedGt => CmpOp::UnsignedLte,
            CmpOp::UnsignedGte => CmpOp::UnsignedLt,
        }
    }

    /// The operator with its operands swapped: `a op b` iff `b op.flip() a`.
    pub fn flip(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Lte => CmpOp::Gte,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Gte => CmpOp::Lte,
            CmpOp::UnsignedLt => CmpOp::UnsignedGt,
            CmpOp::UnsignedLte => CmpOp::UnsignedGte,
            CmpOp::UnsignedGt => CmpOp::UnsignedLt,
            CmpOp::UnsignedGte => CmpOp::UnsignedLte,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt | CmpOp::UnsignedLt => "<",
            CmpOp::Lte | CmpOp::UnsignedLte => "<=",
            CmpOp::Gt | CmpOp::UnsignedGt => ">",
            CmpOp::Gte | CmpOp::UnsignedGte => ">=",
        };
        f.write_str(s)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl AssignOp {
    /// The arithmetic half of a compound assignment, `None` for plain `=`.
    pub fn binop(self) -> Option<BinOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinOp::Add),
            AssignOp::Sub => Some(BinOp::Sub),
            AssignOp::Mul => Some(BinOp::Mul),
            AssignOp::Div => Some(BinOp::Div),
            AssignOp::Mod => Some(BinOp::Mod),
            AssignOp::And => Some(BinOp::And),
            AssignOp::Or => Some(BinOp::Or),
            AssignOp::Xor => Some(BinOp::Xor),
            AssignOp::Shl => Some(BinOp::Shl),
            AssignOp::Shr => Some(BinOp::Shr),
        }
    }
}

// EXPRESSIONS
// ================================================================================================

/// One elaborated expression. Subexpressions are ids into the same
/// [`FnBody`]; the nodes themselves never hold pointers.
///
/// Array subscripts arrive from the front-end in the lowered form
/// `*(base + index)`, so `Preop { op: Deref, inner: Binop { op: Add, .. } }`
/// is the shape checkers match for indexing.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Expr {
    Value { val: Sval },
    Str { text: String },
    Sym { sym: SymbolId },
    Preop { op: UnOp, inner: ExprId },
    Postop { op: PostOp, inner: ExprId },
    Binop { op: BinOp, left: ExprId, right: ExprId },
    Compare { op: CmpOp, left: ExprId, right: ExprId },
    Logical { op: LogicalOp, left: ExprId, right: ExprId },
    Conditional { cond: ExprId, then: Option<ExprId>, otherwise: ExprId },
    Select { cond: ExprId, then: ExprId, otherwise: ExprId },
    Cast { to: Ty, inner: ExprId },
    ForceCast { to: Ty, inner: ExprId },
    ImpliedCast { to: Ty, inner: ExprId },
    SizeOf { bytes: u64 },
    Assignment { op: AssignOp, left: ExprId, right: ExprId },
    Call { func: ExprId, args: Vec<ExprId> },
    /// Member access `base.member` (`arrow` for `base->member`).
    Deref { base: ExprId, member: String, arrow: bool },
    Statement { stmt: StmtId },
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExprNode {
    pub pos: Pos,
    /// The front-end's type annotation, when it gave one.
    pub ty: Option<Ty>,
    pub kind: Expr,
}

// STATEMENTS
// ================================================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Stmt {
    Expression {
        expr: ExprId,
    },
    If {
        cond: ExprId,
        then: StmtId,
        otherwise: Option<StmtId>,
    },
    /// All three C loop forms: `for` carries all the pieces, `while` only a
    /// pre-condition, `do while` only a post-condition.
    Iterator {
        pre_statement: Option<StmtId>,
        pre_condition: Option<ExprId>,
        body: StmtId,
        post_statement: Option<StmtId>,
        post_condition: Option<ExprId>,
    },
    Switch {
        cond: ExprId,
        body: StmtId,
    },
    /// `from == None` is a `default:` label; `to` is set for case ranges.
    Case {
        from: Option<ExprId>,
        to: Option<ExprId>,
        stmt: StmtId,
    },
    Label {
        name: String,
        stmt: StmtId,
    },
    /// `break` and `continue` arrive lowered as gotos to the reserved labels
    /// `"break"` and `"continue"`, the way the front-end linearizes them.
    Goto {
        label: String,
    },
    Return {
        expr: Option<ExprId>,
    },
    Compound {
        stmts: Vec<StmtId>,
    },
    Asm,
    Declaration {
        decls: Vec<(SymbolId, Option<ExprId>)>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StmtNode {
    pub pos: Pos,
    pub kind: Stmt,
}

// FUNCTION BODIES
// ================================================================================================

/// An elaborated function body: flat node tables plus the symbol table, with
/// the root compound statement marking the entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FnBody {
    exprs: Vec<ExprNode>,
    stmts: Vec<StmtNode>,
    symbols: Vec<Symbol>,
}

impl FnBody {
    pub fn new() -> Self {
        Self::default()
    }

    // CONSTRUCTION
    // --------------------------------------------------------------------------------------------

    pub fn push_expr(&mut self, node: ExprNode) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(node);
        id
    }

    pub fn push_stmt(&mut self, node: StmtNode) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(node);
        id
    }

    pub fn add_symbol(&mut self, sym: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(sym);
        id
    }

    // ACCESSORS
    // --------------------------------------------------------------------------------------------

    pub fn expr(&self, id: ExprId) -> &ExprNode {
        &self.exprs[id.0 as usize]
    }

    pub fn stmt(&self, id: StmtId) -> &StmtNode {
        &self.stmts[id.0 as usize]
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Skips parentheses and casts down to the interesting node.
    pub fn strip(&self, mut id: ExprId) -> ExprId {
        loop {
            match &self.expr(id).kind {
                Expr::Preop { op: UnOp::Paren, inner } => id = *inner,
                Expr::Cast { inner, .. }
                | Expr::ForceCast { inner, .. }
                | Expr::ImpliedCast { inner, .. } => id = *inner,
                _ => return id,
            }
        }
    }

    /// Best-effort type of an expression: the annotation when present,
    /// otherwise inferred structurally, defaulting to `i64`.
    pub fn expr_ty(&self, id: ExprId) -> Ty {
        let node = self.expr(id);
        if let Some(ty) = node.ty {
            return ty;
        }
        match &node.kind {
            Expr::Value { val } => val.ty(),
            Expr::Sym { sym } => self.symbol(*sym).ty,
            Expr::Cast { to, .. } | Expr::ForceCast { to, .. } | Expr::ImpliedCast { to, .. } => {
                *to
            },
            Expr::Compare { .. } | Expr::Logical { .. } => Ty::I32,
            Expr::Preop { op: UnOp::Paren, inner } => self.expr_ty(*inner),
            Expr::Preop { op: UnOp::AddrOf, .. } | Expr::Str { .. } => Ty::Ptr,
            Expr::Preop { inner, .. } | Expr::Postop { inner, .. } => self.expr_ty(*inner),
            Expr::Binop { left, .. } | Expr::Assignment { left, .. } => self.expr_ty(*left),
            Expr::SizeOf { .. } => Ty::U64,
            _ => Ty::default(),
        }
    }

    /// Folds a compile-time constant. This is syntactic only; implied values
    /// from tracked state are the engine's business.
    pub fn const_value(&self, id: ExprId) -> Option<Sval> {
        let id = self.strip(id);
        match &self.expr(id).kind {
            Expr::Value { val } => Some(*val),
            Expr::SizeOf { bytes } => Some(Sval::new_unsigned(Ty::U64, *bytes)),
            Expr::Preop { op, inner } => {
                let op = *op;
                if !matches!(op, UnOp::Not | UnOp::BitNot | UnOp::Neg) {
                    return None;
                }
                Some(self.const_value(*inner)?.preop(op))
            },
            Expr::Binop { op, left, right } => {
                let l = self.const_value(*left)?;
                let r = self.const_value(*right)?;
                Some(l.binop(*op, r))
            },
            Expr::Compare { op, left, right } => {
                let l = self.const_value(*left)?;
                let r = self.const_value(*right)?;
                Some(Sval::new(Ty::I32, cmp_holds(l, *op, r) as i64))
            },
            _ => None,
        }
    }

    /// Renders an expression to the variable name checkers report, and
    /// resolves the base symbol the name is rooted at. Returns `None` for
    /// expressions that are not variable-shaped (calls, literals, ...).
    pub fn expr_to_var(&self, id: ExprId) -> Option<(String, SymbolId)> {
        let id = self.strip(id);
        match &self.expr(id).kind {
            Expr::Sym { sym } => Some((self.symbol(*sym).name.clone(), *sym)),
            Expr::Preop { op: UnOp::Deref, inner } => {
                let (name, sym) = self.expr_to_var(*inner)?;
                Some((format!("*{name}"), sym))
            },
            Expr::Preop { op: UnOp::AddrOf, inner } => {
                let (name, sym) = self.expr_to_var(*inner)?;
                Some((format!("&{name}"), sym))
            },
            Expr::Preop { op: UnOp::Inc | UnOp::Dec, inner }
            | Expr::Postop { inner, .. } => self.expr_to_var(*inner),
            Expr::Deref { base, member, arrow } => {
                let (name, sym) = self.expr_to_var(*base)?;
                let sep = if *arrow { "->" } else { "." };
                Some((format!("{name}{sep}{member}"), sym))
            },
            _ => None,
        }
    }

    /// The symbol an expression names directly, parens/casts aside.
    pub fn expr_symbol(&self, id: ExprId) -> Option<SymbolId> {
        match &self.expr(self.strip(id)).kind {
            Expr::Sym { sym } => Some(*sym),
            _ => None,
        }
    }

    pub fn expr_pos(&self, id: ExprId) -> Pos {
        self.expr(id).pos
    }

    /// True when the expression is a literal (or constant-folded) zero.
    pub fn is_zero(&self, id: ExprId) -> bool {
        matches!(self.const_value(id), Some(v) if v.value() == 0)
    }

    /// For a lowered subscript `*(base + index)`, the base expression.
    pub fn array_base(&self, id: ExprId) -> Option<ExprId> {
        self.array_parts(id).map(|(base, _)| base)
    }

    /// For a lowered subscript `*(base + index)`, the index expression.
    pub fn array_offset(&self, id: ExprId) -> Option<ExprId> {
        self.array_parts(id).map(|(_, offset)| offset)
    }

    fn array_parts(&self, id: ExprId) -> Option<(ExprId, ExprId)> {
        let id = self.strip(id);
        let Expr::Preop { op: UnOp::Deref, inner } = &self.expr(id).kind else {
            return None;
        };
        let inner = self.strip(*inner);
        let Expr::Binop { op: BinOp::Add, left, right } = &self.expr(inner).kind else {
            return None;
        };
        Some((self.strip(*left), self.strip(*right)))
    }
}

/// Constant comparison at sval semantics, used by `const_value` folding.
fn cmp_holds(l: Sval, op: CmpOp, r: Sval) -> bool {
    use core::cmp::Ordering::*;
    let ord = l.cmp(r);
    match op {
        CmpOp::Eq => ord == Equal,
        CmpOp::Ne => ord != Equal,
        CmpOp::Lt | CmpOp::UnsignedLt => ord == Less,
        CmpOp::Lte | CmpOp::UnsignedLte => ord != Greater,
        CmpOp::Gt | CmpOp::UnsignedGt => ord == Greater,
        CmpOp::Gte | CmpOp::UnsignedGte => ord != Less,
    }
}

// FUNCTION DECLARATIONS
// ================================================================================================

/// A complete elaborated function as the front-end hands it over.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FnDecl {
    pub file: String,
    pub name: String,
    pub is_static: bool,
    pub params: Vec<SymbolId>,
    pub ret_ty: Ty,
    pub body: FnBody,
    pub root: StmtId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_with(f: impl FnOnce(&mut FnBody) -> ExprId) -> (FnBody, ExprId) {
        let mut body = FnBody::new();
        let id = f(&mut body);
        (body, id)
    }

    fn val(body: &mut FnBody, v: i64) -> ExprId {
        body.push_expr(ExprNode {
            pos: Pos::default(),
            ty: None,
            kind: Expr::Value { val: Sval::new(Ty::I32, v) },
        })
    }

    #[test]
    fn const_folding() {
        let (body, id) = body_with(|b| {
            let l = val(b, 6);
            let r = val(b, 7);
            b.push_expr(ExprNode {
                pos: Pos::default(),
                ty: None,
                kind: Expr::Binop { op: BinOp::Mul, left: l, right: r },
            })
        });
        assert_eq!(body.const_value(id).unwrap().value(), 42);
    }

    #[test]
    fn strip_sees_through_parens_and_casts() {
        let (body, id) = body_with(|b| {
            let v = val(b, 1);
            let paren = b.push_expr(ExprNode {
                pos: Pos::default(),
                ty: None,
                kind: Expr::Preop { op: UnOp::Paren, inner: v },
            });
            b.push_expr(ExprNode {
                pos: Pos::default(),
                ty: None,
                kind: Expr::Cast { to: Ty::U8, inner: paren },
            })
        });
        let stripped = body.strip(id);
        assert!(matches!(body.expr(stripped).kind, Expr::Value { .. }));
    }

    #[test]
    fn variable_names() {
        let mut body = FnBody::new();
        let sym = body.add_symbol(Symbol {
            name: "p".into(),
            ty: Ty::Ptr,
            array_len: None,
            param: None,
            global: false,
        });
        let p = body.push_expr(ExprNode {
            pos: Pos::default(),
            ty: None,
            kind: Expr::Sym { sym },
        });
        let deref = body.push_expr(ExprNode {
            pos: Pos::default(),
            ty: None,
            kind: Expr::Preop { op: UnOp::Deref, inner: p },
        });
        let field = body.push_expr(ExprNode {
            pos: Pos::default(),
            ty: None,
            kind: Expr::Deref { base: p, member: "x".into(), arrow: true },
        });
        assert_eq!(body.expr_to_var(deref).unwrap().0, "*p");
        assert_eq!(body.expr_to_var(field).unwrap(), ("p->x".to_string(), sym));
    }
}

//! Core data model for the sift analyzer: C integer types, typed scalar
//! values, canonical range lists, the elaborated AST the front-end hands us,
//! and diagnostic formatting.
//!
//! Everything in this crate is passive data plus algebra. The traversal and
//! state machinery live in `sift-engine`; this crate must stay free of any
//! analysis state so the algebra can be tested in isolation.

mod ast;
mod range;
mod report;
mod sval;
mod types;

// RE-EXPORTS
// ================================================================================================

pub use ast::{
    AssignOp, BinOp, CmpOp, Expr, ExprId, ExprNode, FnBody, FnDecl, LogicalOp, Pos, PostOp, Stmt,
    StmtId, StmtNode, Symbol, SymbolId, UnOp,
};
pub use range::{Range, RangeList, RangeParseError};
pub use report::{Diagnostic, Severity};
pub use sval::Sval;
pub use types::Ty;

use sift_core::Pos;

// ENGINE ERRORS
// ================================================================================================

/// Failures that abort analysis of a single function. Anything recoverable
/// (budget trips, refused refinements, bad checker input) is handled in
/// place by degrading the analysis, never by returning one of these.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("internal error at line {}: {msg}", pos.line)]
    Internal { pos: Pos, msg: String },

    #[error("state stacks unbalanced after hook dispatch ({event})")]
    UnbalancedStacks { event: &'static str },

    #[error("summary database failure")]
    Db(#[from] sift_db::DbError),
}

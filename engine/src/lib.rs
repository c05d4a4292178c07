//! The sift dataflow engine.
//!
//! The engine walks one elaborated function at a time, maintaining a *state
//! tree*: a sorted map from `(owner, name, symbol)` to the tracked abstract
//! value of that variable for that checker. Conditions fork the tree,
//! path joins merge it, and every merged entry remembers where its halves
//! came from so a later condition can retroactively sharpen correlated
//! variables (the implied-value machinery).
//!
//! Checkers are external: they register hooks at startup, observe traversal
//! events, and read or write states through the [`Engine`] API. The engine
//! itself owns exactly one always-on tracker, the value tracker in
//! [`extra`], because the implied-value machinery is built on its range
//! states.

mod context;
mod dbglue;
mod engine;
mod errors;
mod flow;
mod hooks;
mod implied;
mod options;
mod state;
mod store;
mod stree;

pub mod extra;

// RE-EXPORTS
// ================================================================================================

pub use context::ReturnSnapshot;
pub use engine::{Engine, EXTRA_OWNER, INTERNAL_OWNER, RETURN_RANGES_NAME};
pub use errors::EngineError;
pub use hooks::{
    Assignment, AssignTarget, CallAssignHook, CallHook, CallerInfoHook, CheckOps, ExprHook,
    NullaryHook, OwnerId, ParamKeyHook, ReturnHook, ReturnImpliesHook, StmtHook, SymDeclHook,
};
pub use options::{Options, Project};
pub use state::{
    false_state, merged_state, same_state, true_state, undefined_state, DataInfo, State, StateData,
};
pub use store::{NameId, PoolId, SmId, SmState, SmStore};
pub use stree::Stree;

pub use sift_core as core;
pub use sift_db as db;

//! The built-in checkers. Each module owns one state family, registers its
//! hooks against the engine, and publishes diagnostics; none of them reach
//! into the engine beyond the public state API.

use sift_engine::{Engine, OwnerId};

pub mod deref;
pub mod deref_check;
pub mod free;
pub mod index_overflow;
pub mod locking;

/// Owner ids handed back by [`register_all`], for callers that need to feed
/// a checker afterwards (config tables, tests).
pub struct Registered {
    pub deref: OwnerId,
    pub deref_check: OwnerId,
    pub free: OwnerId,
    pub locking: OwnerId,
}

/// Registers every built-in checker in the fixed order diagnostics are
/// expected in.
pub fn register_all(eng: &mut Engine) -> Registered {
    let deref = deref::register(eng);
    let deref_check = deref_check::register(eng);
    let free = free::register(eng);
    index_overflow::register(eng);
    let locking = locking::register(eng);
    Registered { deref, deref_check, free, locking }
}

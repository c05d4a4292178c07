use std::sync::Arc;

use sift_core::{RangeList, SymbolId};

// ABSTRACT STATES
// ================================================================================================

/// The auxiliary payload of a value-tracker state: the range list plus the
/// equivalence class this variable currently shares values with.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataInfo {
    pub ranges: RangeList,
    /// Variables established equal to this one by assignment or `==` tests.
    pub related: Vec<(String, SymbolId)>,
    /// The range was clamped by a checker rather than derived from code.
    pub capped: bool,
    /// Set fresh this frame, not inherited from a caller summary.
    pub fresh: bool,
}

impl DataInfo {
    pub fn from_ranges(ranges: RangeList) -> Self {
        DataInfo { ranges, ..Default::default() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StateData {
    #[default]
    None,
    Ranges(DataInfo),
}

/// One abstract value. Checkers allocate their own states; a few sentinels
/// are shared process-wide. Identity is structural: two states are the same
/// iff name and payload agree, which keeps merge decisions independent of
/// allocation order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct State {
    pub name: String,
    pub data: StateData,
}

impl State {
    pub fn named(name: &str) -> Arc<State> {
        Arc::new(State { name: name.to_string(), data: StateData::None })
    }

    pub fn ranges(&self) -> Option<&RangeList> {
        match &self.data {
            StateData::Ranges(info) => Some(&info.ranges),
            StateData::None => None,
        }
    }

    pub fn dinfo(&self) -> Option<&DataInfo> {
        match &self.data {
            StateData::Ranges(info) => Some(info),
            StateData::None => None,
        }
    }
}

lazy_static::lazy_static! {
    static ref UNDEFINED: Arc<State> = State::named("undefined");
    static ref MERGED: Arc<State> = State::named("merged");
    static ref TRUE_STATE: Arc<State> = State::named("true");
    static ref FALSE_STATE: Arc<State> = State::named("false");
}

/// The shared "we know nothing" sentinel.
pub fn undefined_state() -> Arc<State> {
    UNDEFINED.clone()
}

/// The shared "paths disagree and the owner has no merger" sentinel.
pub fn merged_state() -> Arc<State> {
    MERGED.clone()
}

pub fn true_state() -> Arc<State> {
    TRUE_STATE.clone()
}

pub fn false_state() -> Arc<State> {
    FALSE_STATE.clone()
}

/// States compare structurally, so sharing the sentinel and rebuilding an
/// identical state are indistinguishable, which is the point.
pub fn same_state(a: &Arc<State>, b: &Arc<State>) -> bool {
    Arc::ptr_eq(a, b) || **a == **b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_identity() {
        assert!(same_state(&undefined_state(), &undefined_state()));
        assert!(!same_state(&undefined_state(), &merged_state()));
        let rebuilt = State::named("merged");
        assert!(same_state(&rebuilt, &merged_state()));
    }
}

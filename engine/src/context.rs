use sift_core::{ExprId, RangeList};

use crate::{
    engine::Engine,
    stree::{merge_strees, Stree},
};

// PER-FUNCTION CONTEXT
// ================================================================================================

/// Everything that changes as the explorer walks one function: the current
/// state tree, the stacks that hold branch/loop/switch alternatives, the
/// goto accumulators, and the return snapshots.
///
/// `cur == None` means the current path is unreachable. The condition
/// stacks hold *partial* trees (only the states a condition touched); the
/// break/continue/goto accumulators hold full trees or `None` when no path
/// has arrived yet.
#[derive(Default)]
pub struct FnContext {
    pub cur: Option<Stree>,
    /// States at the end of a then-branch, waiting for the else to finish.
    pub true_stack: Vec<Option<Stree>>,
    /// States entering the else-branch.
    pub false_stack: Vec<Option<Stree>>,
    /// States captured just before a condition started splitting.
    pub pre_cond_stack: Vec<Option<Stree>>,
    /// States a condition sets on its true / false sides.
    pub cond_true_stack: Vec<Stree>,
    pub cond_false_stack: Vec<Stree>,
    pub break_stack: Vec<Option<Stree>>,
    pub continue_stack: Vec<Option<Stree>>,
    /// The state tree in force at the switch head, reused by every case.
    pub switch_stack: Vec<Option<Stree>>,
    /// Scrutinee values not yet claimed by an earlier case.
    pub remaining_cases: Vec<RangeList>,
    pub default_stack: Vec<bool>,
    pub switch_expr_stack: Vec<ExprId>,
    pub gotos: Vec<(String, Option<Stree>)>,
    pub start_states: Stree,
    pub returns: Vec<ReturnSnapshot>,
}

/// One observed `return`: the full tree at that point plus the value range
/// the function returns along this path.
#[derive(Clone)]
pub struct ReturnSnapshot {
    pub stree: Stree,
    pub ranges: RangeList,
    pub line: u32,
}

impl FnContext {
    pub fn reset(&mut self) {
        *self = FnContext::default();
    }
}

// STACK TRANSITIONS
// ================================================================================================

impl Engine {
    /// Merge of two possibly-unreachable trees: an unreachable side
    /// contributes nothing.
    pub(crate) fn merge_option(&mut self, a: Option<Stree>, b: Option<Stree>) -> Option<Stree> {
        match (a, b) {
            (None, x) | (x, None) => x,
            (Some(a), Some(b)) => {
                self.pre_merge_hooks(&a, &b);
                Some(merge_strees(&mut self.store, &mut self.pools, &self.owners, self.line, &a, &b))
            },
        }
    }

    // CONDITION STACKS
    // --------------------------------------------------------------------------------------------

    pub(crate) fn save_pre_cond_states(&mut self) {
        self.ctx.pre_cond_stack.push(self.ctx.cur.clone());
    }

    pub(crate) fn pop_pre_cond_states(&mut self) {
        self.ctx.pre_cond_stack.pop();
    }

    pub(crate) fn push_cond_stacks(&mut self) {
        self.ctx.cond_true_stack.push(Stree::default());
        self.ctx.cond_false_stack.push(Stree::default());
    }

    pub(crate) fn in_condition(&self) -> bool {
        !self.ctx.cond_true_stack.is_empty()
    }

    /// Rebuilds `cur` as the pre-condition states overlaid with one side's
    /// condition states, leaving that side on its stack. Used between the
    /// halves of `&&` and `||`.
    fn use_cond_stack(&mut self, true_side: bool) {
        let Some(pre) = self.ctx.pre_cond_stack.last().cloned() else {
            return;
        };
        let mut cur = pre;
        let top = if true_side {
            self.ctx.cond_true_stack.last().cloned()
        } else {
            self.ctx.cond_false_stack.last().cloned()
        };
        if let (Some(cur), Some(top)) = (cur.as_mut(), top) {
            cur.overwrite_all(&self.store, &top);
        }
        self.ctx.cur = cur;
    }

    pub(crate) fn use_cond_true_states(&mut self) {
        self.use_cond_stack(true);
    }

    pub(crate) fn use_cond_false_states(&mut self) {
        self.use_cond_stack(false);
    }

    /// `!cond`: the sides swap.
    pub(crate) fn negate_cond_stacks(&mut self) {
        self.use_cond_stack(false);
        let t = self.ctx.cond_true_stack.pop().unwrap_or_default();
        let f = self.ctx.cond_false_stack.pop().unwrap_or_default();
        self.ctx.cond_true_stack.push(f);
        self.ctx.cond_false_stack.push(t);
    }

    /// Top two true-trees are both required (`a && b`): overlay; the two
    /// false-trees are alternatives: merge.
    pub(crate) fn and_cond_states(&mut self) {
        self.and_stack(true);
        self.or_stack(false);
    }

    /// `a || b`: true sides are alternatives, false sides both required.
    pub(crate) fn or_cond_states(&mut self) {
        self.or_stack(true);
        self.and_stack(false);
    }

    fn and_stack(&mut self, true_side: bool) {
        let stack = if true_side {
            &mut self.ctx.cond_true_stack
        } else {
            &mut self.ctx.cond_false_stack
        };
        let right = stack.pop().unwrap_or_default();
        if let Some(top) = stack.last_mut() {
            top.overwrite_all(&self.store, &right);
        }
    }

    fn or_stack(&mut self, true_side: bool) {
        let (new, old) = {
            let stack = if true_side {
                &mut self.ctx.cond_true_stack
            } else {
                &mut self.ctx.cond_false_stack
            };
            let new = stack.pop().unwrap_or_default();
            let old = stack.pop().unwrap_or_default();
            (new, old)
        };

        // Each alternative is the pre-condition (resp. current) states with
        // that alternative's constraints overlaid; the result is their merge.
        let pre = self.ctx.pre_cond_stack.last().cloned().flatten().unwrap_or_default();
        let mut res = pre;
        res.overwrite_all(&self.store, &old);

        let mut tmp = self.ctx.cur.clone().unwrap_or_default();
        tmp.overwrite_all(&self.store, &new);

        let merged = self
            .merge_option(Some(res), Some(tmp))
            .unwrap_or_default();
        let stack = if true_side {
            &mut self.ctx.cond_true_stack
        } else {
            &mut self.ctx.cond_false_stack
        };
        stack.push(merged);
    }

    /// Ends a condition: `cur` becomes the true side, and the false side is
    /// parked on the false stack for the else-branch.
    pub(crate) fn use_cond_states(&mut self) {
        let pre = self.ctx.pre_cond_stack.pop().flatten();
        let true_states = self.ctx.cond_true_stack.pop().unwrap_or_default();
        let false_states = self.ctx.cond_false_stack.pop().unwrap_or_default();

        let mut true_side = pre.clone();
        if let Some(t) = true_side.as_mut() {
            t.overwrite_all(&self.store, &true_states);
        }
        let mut false_side = pre;
        if let Some(f) = false_side.as_mut() {
            f.overwrite_all(&self.store, &false_states);
        }

        self.ctx.cur = true_side;
        self.ctx.false_stack.push(false_side);
    }

    // BRANCH STACKS
    // --------------------------------------------------------------------------------------------

    pub(crate) fn push_true_states(&mut self) {
        self.ctx.true_stack.push(self.ctx.cur.clone());
    }

    pub(crate) fn use_false_states(&mut self) {
        self.ctx.cur = self.ctx.false_stack.pop().flatten();
    }

    pub(crate) fn pop_false_states(&mut self) {
        self.ctx.false_stack.pop();
    }

    pub(crate) fn merge_true_states(&mut self) {
        let t = self.ctx.true_stack.pop().flatten();
        let cur = self.ctx.cur.take();
        self.ctx.cur = self.merge_option(cur, t);
    }

    pub(crate) fn merge_false_states(&mut self) {
        let f = self.ctx.false_stack.pop().flatten();
        let cur = self.ctx.cur.take();
        self.ctx.cur = self.merge_option(cur, f);
    }

    // LOOP STACKS
    // --------------------------------------------------------------------------------------------

    pub(crate) fn push_breaks(&mut self) {
        self.ctx.break_stack.push(None);
    }

    /// A `break`: fold the current path into the loop-exit accumulator.
    pub(crate) fn process_breaks(&mut self) {
        let acc = self.ctx.break_stack.pop().unwrap_or(None);
        let cur = self.ctx.cur.clone();
        let merged = self.merge_option(acc, cur);
        self.ctx.break_stack.push(merged);
    }

    pub(crate) fn merge_breaks(&mut self) {
        let acc = self.ctx.break_stack.pop().flatten();
        let cur = self.ctx.cur.take();
        self.ctx.cur = self.merge_option(cur, acc);
    }

    pub(crate) fn had_breaks(&self) -> bool {
        matches!(self.ctx.break_stack.last(), Some(Some(_)))
    }

    pub(crate) fn push_continues(&mut self) {
        self.ctx.continue_stack.push(None);
    }

    pub(crate) fn process_continues(&mut self) {
        let acc = self.ctx.continue_stack.pop().unwrap_or(None);
        let cur = self.ctx.cur.clone();
        let merged = self.merge_option(acc, cur);
        self.ctx.continue_stack.push(merged);
    }

    pub(crate) fn merge_continues(&mut self) {
        let acc = self.ctx.continue_stack.pop().flatten();
        let cur = self.ctx.cur.take();
        self.ctx.cur = self.merge_option(cur, acc);
    }

    // GOTOS
    // --------------------------------------------------------------------------------------------

    /// A forward goto: fold the current path into the label's accumulator.
    pub(crate) fn save_gotos(&mut self, label: &str) {
        let cur = self.ctx.cur.clone();
        if let Some(i) = self.ctx.gotos.iter().position(|(n, _)| n == label) {
            let acc = self.ctx.gotos[i].1.take();
            let merged = self.merge_option(acc, cur);
            self.ctx.gotos[i].1 = merged;
        } else {
            self.ctx.gotos.push((label.to_string(), cur));
        }
    }

    /// A label definition: paths that jumped here join the fall-through.
    pub(crate) fn merge_gotos(&mut self, label: &str) {
        let acc = self
            .ctx
            .gotos
            .iter()
            .find(|(n, _)| n == label)
            .and_then(|(_, s)| s.clone());
        let cur = self.ctx.cur.take();
        self.ctx.cur = self.merge_option(cur, acc);
    }
}

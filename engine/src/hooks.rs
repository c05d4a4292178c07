use std::{collections::HashMap, rc::Rc, sync::Arc};

use sift_core::{AssignOp, ExprId, Pos, StmtId, Sval, SymbolId};
use sift_db::{CallerInfoRow, FactKind};

use crate::{
    engine::Engine,
    state::{undefined_state, State},
    store::{SmId, SmState},
    stree::Stree,
};

pub use crate::store::OwnerId;

// CHECKER STATE OPS
// ================================================================================================

/// The per-owner callbacks the state machinery consults. A checker
/// implements the subset it cares about; the defaults reproduce the stock
/// merge rules.
pub trait CheckOps {
    /// Short name used in debug output.
    fn check_name(&self) -> &'static str;

    /// Custom merger for two differing states. `None` falls back to the
    /// `merged` sentinel.
    fn merge_states(&self, s1: &Arc<State>, s2: &Arc<State>) -> Option<Arc<State>> {
        let _ = (s1, s2);
        None
    }

    /// State to materialize for a path that never tracked this variable.
    fn unmatched_state(&self, sm: &SmState) -> Arc<State> {
        let _ = sm;
        undefined_state()
    }

    /// Runs just before two paths join, once per tracked variable of this
    /// owner whose states differ between the sides.
    fn pre_merge(&self, eng: &mut Engine, cur: SmId, other: SmId) {
        let _ = (eng, cur, other);
    }

    /// Runs when a variable this owner tracks is modified (assigned,
    /// incremented, or passed out by address).
    fn on_modify(&self, eng: &mut Engine, sm: SmId, assign: Option<&Assignment>) {
        let _ = (eng, sm, assign);
    }
}

// EVENT PAYLOADS
// ================================================================================================

/// What an assignment hook sees. Declarations with initializers come through
/// the same path with a symbol target, so checkers treat `int *p = 0;` and
/// `p = 0;` identically.
#[derive(Clone, Debug)]
pub struct Assignment {
    pub op: AssignOp,
    pub target: AssignTarget,
    pub right: ExprId,
    pub pos: Pos,
}

#[derive(Copy, Clone, Debug)]
pub enum AssignTarget {
    Expr(ExprId),
    Sym(SymbolId),
}

impl Engine {
    /// Name and base symbol of an assignment target.
    pub fn target_var(&self, target: &AssignTarget) -> Option<(String, SymbolId)> {
        match target {
            AssignTarget::Expr(e) => self.expr_var(*e),
            AssignTarget::Sym(s) => Some((self.decl.body.symbol(*s).name.clone(), *s)),
        }
    }

    pub fn target_ty(&self, target: &AssignTarget) -> sift_core::Ty {
        match target {
            AssignTarget::Expr(e) => self.decl.body.expr_ty(*e),
            AssignTarget::Sym(s) => self.decl.body.symbol(*s).ty,
        }
    }

    pub(crate) fn target_is_global(&self, target: &AssignTarget) -> bool {
        match target {
            AssignTarget::Expr(e) => self
                .decl
                .body
                .expr_symbol(*e)
                .map(|s| self.decl.body.symbol(s).global)
                .unwrap_or(false),
            AssignTarget::Sym(s) => self.decl.body.symbol(*s).global,
        }
    }
}

// HOOK TYPES
// ================================================================================================

pub type ExprHook = Rc<dyn Fn(&mut Engine, ExprId)>;
pub type StmtHook = Rc<dyn Fn(&mut Engine, StmtId)>;
/// Declaration hook: the declared symbol and its initializer, if any.
pub type SymDeclHook = Rc<dyn Fn(&mut Engine, SymbolId, Option<ExprId>)>;
pub type NullaryHook = Rc<dyn Fn(&mut Engine)>;
pub type AssignHook = Rc<dyn Fn(&mut Engine, &Assignment)>;
pub type ReturnHook = Rc<dyn Fn(&mut Engine, StmtId, Option<ExprId>)>;
/// Per-function-name call hook; the argument is the call expression.
pub type CallHook = Rc<dyn Fn(&mut Engine, ExprId)>;
/// Per-function-name hook for `x = fn(...)`; arguments are the assignment
/// and the call expression.
pub type CallAssignHook = Rc<dyn Fn(&mut Engine, &Assignment, ExprId)>;
/// Fires when a call's return value is constrained to the registered range
/// on the branch indicated by the flag.
pub type ReturnImpliesHook = Rc<dyn Fn(&mut Engine, ExprId, bool)>;
/// Fires at a call site for each matching summary row; receives the call,
/// the resolved variable the row's key lands on, and the row value.
pub type ParamKeyHook = Rc<dyn Fn(&mut Engine, ExprId, &str, SymbolId, &str)>;
/// Fires at function entry for each matching caller-info row.
pub type CallerInfoHook = Rc<dyn Fn(&mut Engine, &CallerInfoRow, &str, SymbolId)>;

// REGISTRY
// ================================================================================================

/// All registered hooks, one vector per event in the closed event set.
/// Dispatch clones the relevant vector (cheap `Rc` bumps) so callbacks can
/// register nothing and remove nothing mid-dispatch.
#[derive(Default)]
pub struct Hooks {
    pub condition: Vec<ExprHook>,
    pub raw_assignment: Vec<AssignHook>,
    pub assignment: Vec<AssignHook>,
    pub global_assignment: Vec<AssignHook>,
    pub op: Vec<ExprHook>,
    pub deref: Vec<ExprHook>,
    pub function_call: Vec<ExprHook>,
    pub function_call_after_db: Vec<ExprHook>,
    pub func_def: Vec<NullaryHook>,
    pub after_def: Vec<NullaryHook>,
    pub stmt: Vec<StmtHook>,
    pub stmt_after: Vec<StmtHook>,
    pub ret: Vec<ReturnHook>,
    pub end_func: Vec<NullaryHook>,
    pub after_func: Vec<NullaryHook>,
    pub end_file: Vec<NullaryHook>,
    pub binop: Vec<ExprHook>,
    pub sym: Vec<ExprHook>,
    pub inline_fn_start: Vec<NullaryHook>,
    pub inline_fn_end: Vec<NullaryHook>,
    pub asm_stmt: Vec<StmtHook>,
    pub declaration: Vec<SymDeclHook>,
    pub after_loop_no_breaks: Vec<StmtHook>,

    pub(crate) named_call: HashMap<String, Vec<CallHook>>,
    pub(crate) named_assign: HashMap<String, Vec<CallAssignHook>>,
    pub(crate) return_implies: HashMap<String, Vec<(Sval, Sval, ReturnImpliesHook)>>,
    pub(crate) select_return_states: Vec<(FactKind, ParamKeyHook)>,
    pub(crate) select_caller_info: Vec<(FactKind, CallerInfoHook)>,
}

// REGISTRATION AND DISPATCH
// ================================================================================================

impl Engine {
    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    /// Registers a hook that fires on calls to the named function.
    pub fn add_function_hook(&mut self, name: &str, hook: CallHook) {
        self.hooks.named_call.entry(name.to_string()).or_default().push(hook);
    }

    /// Registers a hook that fires on assignments whose right side calls the
    /// named function.
    pub fn add_function_assign_hook(&mut self, name: &str, hook: CallAssignHook) {
        self.hooks.named_assign.entry(name.to_string()).or_default().push(hook);
    }

    /// Registers a hook that fires when the named function's return value is
    /// known to be inside `[min, max]` on one branch of a condition.
    pub fn return_implies_state(&mut self, name: &str, min: Sval, max: Sval, hook: ReturnImpliesHook) {
        self.hooks
            .return_implies
            .entry(name.to_string())
            .or_default()
            .push((min, max, hook));
    }

    /// Registers a callback for summary rows of the given kind applied at
    /// call sites.
    pub fn select_return_states_hook(&mut self, kind: FactKind, hook: ParamKeyHook) {
        self.hooks.select_return_states.push((kind, hook));
    }

    /// Registers a callback for caller-info rows of the given kind applied
    /// at function entry.
    pub fn select_caller_info_hook(&mut self, kind: FactKind, hook: CallerInfoHook) {
        self.hooks.select_caller_info.push((kind, hook));
    }

    // DISPATCH
    // --------------------------------------------------------------------------------------------

    pub(crate) fn pass_expr_hooks(&mut self, which: fn(&Hooks) -> &Vec<ExprHook>, expr: ExprId) {
        let hooks = which(&self.hooks).clone();
        for h in hooks {
            h(self, expr);
        }
    }

    pub(crate) fn pass_stmt_hooks(&mut self, which: fn(&Hooks) -> &Vec<StmtHook>, stmt: StmtId) {
        let hooks = which(&self.hooks).clone();
        for h in hooks {
            h(self, stmt);
        }
    }

    pub(crate) fn pass_nullary_hooks(&mut self, which: fn(&Hooks) -> &Vec<NullaryHook>) {
        let hooks = which(&self.hooks).clone();
        for h in hooks {
            h(self);
        }
    }

    pub(crate) fn pass_assign_hooks(
        &mut self,
        which: fn(&Hooks) -> &Vec<AssignHook>,
        assign: &Assignment,
    ) {
        let hooks = which(&self.hooks).clone();
        for h in hooks {
            h(self, assign);
        }
    }

    pub(crate) fn pass_declaration_hooks(&mut self, sym: SymbolId, init: Option<ExprId>) {
        let hooks = self.hooks.declaration.clone();
        for h in hooks {
            h(self, sym, init);
        }
    }

    pub(crate) fn pass_return_hooks(&mut self, stmt: StmtId, expr: Option<ExprId>) {
        let hooks = self.hooks.ret.clone();
        for h in hooks {
            h(self, stmt, expr);
        }
    }

    pub(crate) fn pass_named_call_hooks(&mut self, fn_name: &str, call: ExprId) {
        let hooks = self.hooks.named_call.get(fn_name).cloned().unwrap_or_default();
        for h in hooks {
            h(self, call);
        }
    }

    pub(crate) fn pass_named_assign_hooks(&mut self, fn_name: &str, assign: &Assignment, call: ExprId) {
        let hooks = self.hooks.named_assign.get(fn_name).cloned().unwrap_or_default();
        for h in hooks {
            h(self, assign, call);
        }
    }

    /// Fires modification callbacks for every owner currently tracking the
    /// variable. Runs before assignment hooks so checkers observe the old
    /// state being clobbered, then record the new one.
    pub(crate) fn pass_modification_hooks(
        &mut self,
        name: &str,
        sym: Option<SymbolId>,
        assign: Option<&Assignment>,
    ) {
        let owners = self.owners.clone();
        for (idx, ops) in owners.iter().enumerate() {
            let owner = OwnerId(idx as u16);
            if let Some(sm) = self.get_sm(owner, name, sym) {
                ops.on_modify(self, sm, assign);
            }
        }
    }

    /// Per-owner pre-merge callbacks for identities whose states differ
    /// between the joining sides.
    pub(crate) fn pre_merge_hooks(&mut self, one: &Stree, two: &Stree) {
        let owners = self.owners.clone();
        let mut pairs: Vec<(usize, SmId, SmId)> = Vec::new();
        for a in one.iter() {
            let key = self.store.get(a).key();
            if let Some(b) = two.get(&self.store, key) {
                if a != b && (key.owner.0 as usize) < owners.len() {
                    pairs.push((key.owner.0 as usize, a, b));
                }
            }
        }
        for (owner, a, b) in pairs {
            owners[owner].pre_merge(self, a, b);
        }
    }
}

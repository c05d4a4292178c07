use std::{rc::Rc, sync::Arc};

use sift_core::{
    Diagnostic, ExprId, FnBody, FnDecl, RangeList, Severity, StmtNode, SymbolId, Ty,
};
use sift_db::Db;

use crate::{
    context::{FnContext, ReturnSnapshot},
    extra,
    hooks::{CheckOps, Hooks, OwnerId},
    options::Options,
    state::{true_state, State},
    store::{Interner, NameId, PoolStore, SmId, SmState, SmStore, TrackerKey},
    stree::{OwnerTable, Stree},
    Project,
};

// WELL-KNOWN OWNERS
// ================================================================================================

/// The always-registered value tracker.
pub const EXTRA_OWNER: OwnerId = OwnerId(0);

/// Engine-internal states (path liveness, return ranges, impossibility).
/// Not backed by a checker; merges fall back to the stock rules.
pub const INTERNAL_OWNER: OwnerId = OwnerId(u16::MAX);

/// Internal tracker name that carries the rendered return-value range on
/// each return snapshot.
pub const RETURN_RANGES_NAME: &str = "return_ranges";

const UNNULL_PATH: &str = "unnull_path";
const IMPOSSIBLE: &str = "impossible";

// ENGINE
// ================================================================================================

/// The analysis engine: one of these lives for a whole run, is fed
/// elaborated functions one at a time, and owns every piece of mutable
/// analysis state so that hooks receive a single `&mut Engine`.
pub struct Engine {
    pub(crate) opts: Options,
    pub(crate) hooks: Hooks,
    pub(crate) owners: OwnerTable,
    pub(crate) db: Option<Db>,
    pub(crate) diags: Vec<Diagnostic>,

    // Per-function state, reset between functions.
    pub(crate) decl: Rc<FnDecl>,
    pub(crate) store: SmStore,
    pub(crate) pools: PoolStore,
    pub(crate) names: Interner,
    pub(crate) ctx: FnContext,
    pub(crate) line: u32,
    pub(crate) bail: bool,
    pub(crate) fake_stack: Vec<Stree>,
    pub(crate) scoped: Vec<Vec<TrackerKey>>,
    pub(crate) queued_facts: Vec<crate::dbglue::QueuedFact>,
    unreachable_logged: bool,
}

fn empty_decl() -> Rc<FnDecl> {
    let mut body = FnBody::new();
    let root = body.push_stmt(StmtNode {
        pos: sift_core::Pos::default(),
        kind: sift_core::Stmt::Compound { stmts: Vec::new() },
    });
    Rc::new(FnDecl {
        file: String::new(),
        name: String::new(),
        is_static: false,
        params: Vec::new(),
        ret_ty: Ty::I32,
        body,
        root,
    })
}

impl Engine {
    pub fn new(opts: Options) -> Engine {
        let mut eng = Engine {
            opts,
            hooks: Hooks::default(),
            owners: Vec::new(),
            db: None,
            diags: Vec::new(),
            decl: empty_decl(),
            store: SmStore::default(),
            pools: PoolStore::default(),
            names: Interner::default(),
            ctx: FnContext::default(),
            line: 0,
            bail: false,
            fake_stack: Vec::new(),
            scoped: Vec::new(),
            queued_facts: Vec::new(),
            unreachable_logged: false,
        };
        let extra_owner = eng.register_check(Rc::new(extra::ExtraOps));
        debug_assert_eq!(extra_owner, EXTRA_OWNER);
        extra::register(&mut eng);
        eng
    }

    pub fn options(&self) -> &Options {
        &self.opts
    }

    pub fn project(&self) -> Project {
        self.opts.project
    }

    /// Attaches the summary database. Without one the engine runs in the
    /// degraded intra-procedural mode.
    pub fn set_db(&mut self, db: Db) {
        self.db = Some(db);
    }

    pub fn db(&self) -> Option<&Db> {
        if self.opts.no_db { None } else { self.db.as_ref() }
    }

    /// Adds a checker's state family; the returned id is its owner for all
    /// state operations.
    pub fn register_check(&mut self, ops: Rc<dyn CheckOps>) -> OwnerId {
        let id = OwnerId(self.owners.len() as u16);
        self.owners.push(ops);
        id
    }

    // FUNCTION INFO
    // --------------------------------------------------------------------------------------------

    pub fn decl(&self) -> Rc<FnDecl> {
        self.decl.clone()
    }

    pub fn fn_name(&self) -> &str {
        &self.decl.name
    }

    pub fn fn_file(&self) -> &str {
        &self.decl.file
    }

    pub fn current_line(&self) -> u32 {
        self.line
    }

    // DIAGNOSTICS
    // --------------------------------------------------------------------------------------------

    pub fn emit(&mut self, severity: Severity, message: impl Into<String>) {
        let d = Diagnostic {
            file: self.decl.file.clone(),
            line: self.line,
            function: self.decl.name.clone(),
            severity,
            message: message.into(),
        };
        tracing::debug!(%d, "diagnostic");
        self.diags.push(d);
    }

    pub fn emit_error(&mut self, message: impl Into<String>) {
        self.emit(Severity::Error, message);
    }

    pub fn emit_warn(&mut self, message: impl Into<String>) {
        self.emit(Severity::Warn, message);
    }

    pub fn emit_info(&mut self, message: impl Into<String>) {
        self.emit(Severity::Info, message);
    }

    /// Records an engine bug without killing the process: the message lands
    /// in the output and the rest of this function is abandoned.
    pub fn internal_error(&mut self, message: impl Into<String>) {
        let msg = format!("internal error: {}", message.into());
        self.emit(Severity::Error, msg);
        self.bail = true;
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diags)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags
    }

    // STATE API
    // --------------------------------------------------------------------------------------------

    pub fn intern(&mut self, name: &str) -> NameId {
        self.names.intern(name)
    }

    pub fn resolve_name(&self, id: NameId) -> &str {
        self.names.resolve(id)
    }

    pub fn sm(&self, id: SmId) -> &SmState {
        self.store.get(id)
    }

    pub fn store(&self) -> &SmStore {
        &self.store
    }

    fn lookup_key(&self, owner: OwnerId, name: &str, sym: Option<SymbolId>) -> Option<TrackerKey> {
        let name = self.names.lookup(name)?;
        Some(TrackerKey { owner, name, sym })
    }

    /// Whether the current path can still be reached.
    pub fn is_reachable(&self) -> bool {
        self.ctx.cur.is_some()
    }

    fn unreachable_write(&mut self) -> bool {
        if self.ctx.cur.is_some() || !self.fake_stack.is_empty() {
            self.unreachable_logged = false;
            return false;
        }
        if !self.unreachable_logged {
            self.emit_info("ignoring unreachable code.");
            self.unreachable_logged = true;
        }
        true
    }

    /// Upserts the state for `(owner, name, sym)` in the current tree. When
    /// a condition is being split, the write lands on both shadow sides as
    /// well, since code inside a condition affects both outcomes.
    pub fn set_state(&mut self, owner: OwnerId, name: &str, sym: Option<SymbolId>, state: Arc<State>) {
        if name.is_empty() {
            return;
        }
        tracing::debug!(line = self.line, owner = owner.0, name, state = %state.name, "set_state");
        if self.unreachable_write() {
            return;
        }
        let nid = self.names.intern(name);
        let sm = self.store.alloc(owner, nid, sym, state, self.line);
        self.set_sm(sm);
    }

    /// Inserts an already-built sm_state, preserving its provenance.
    pub(crate) fn set_sm(&mut self, sm: SmId) {
        if let Some(fake) = self.fake_stack.last_mut() {
            fake.overwrite(&self.store, sm);
            return;
        }
        let Some(cur) = self.ctx.cur.as_mut() else {
            return;
        };
        cur.overwrite(&self.store, sm);
        if let Some(t) = self.ctx.cond_true_stack.last_mut() {
            t.overwrite(&self.store, sm);
        }
        if let Some(f) = self.ctx.cond_false_stack.last_mut() {
            f.overwrite(&self.store, sm);
        }
    }

    pub fn get_sm(&self, owner: OwnerId, name: &str, sym: Option<SymbolId>) -> Option<SmId> {
        let key = self.lookup_key(owner, name, sym)?;
        self.ctx.cur.as_ref()?.get(&self.store, key)
    }

    pub fn get_state(
        &self,
        owner: OwnerId,
        name: &str,
        sym: Option<SymbolId>,
    ) -> Option<Arc<State>> {
        self.get_sm(owner, name, sym).map(|id| self.store.get(id).state.clone())
    }

    pub fn delete_state(&mut self, owner: OwnerId, name: &str, sym: Option<SymbolId>) {
        let Some(key) = self.lookup_key(owner, name, sym) else {
            return;
        };
        if let Some(cur) = self.ctx.cur.as_mut() {
            cur.delete(&self.store, key);
        }
    }

    /// Registers the state for deletion when the enclosing block exits.
    pub fn scoped_state(&mut self, owner: OwnerId, name: &str, sym: Option<SymbolId>) {
        let nid = self.names.intern(name);
        if let Some(scope) = self.scoped.last_mut() {
            scope.push(TrackerKey { owner, name: nid, sym });
        }
    }

    /// Writes different states into the two sides of the condition being
    /// split. The true side also lands in `cur` since the explorer continues
    /// into the true branch.
    pub fn set_true_false_states(
        &mut self,
        owner: OwnerId,
        name: &str,
        sym: Option<SymbolId>,
        true_side: Option<Arc<State>>,
        false_side: Option<Arc<State>>,
    ) {
        if self.unreachable_write() {
            return;
        }
        if !self.in_condition() {
            self.internal_error("set_true_false_states outside a condition");
            return;
        }
        let nid = self.names.intern(name);
        if let Some(state) = true_side {
            let sm = self.store.alloc(owner, nid, sym, state, self.line);
            if let Some(cur) = self.ctx.cur.as_mut() {
                cur.overwrite(&self.store, sm);
            }
            if let Some(t) = self.ctx.cond_true_stack.last_mut() {
                t.overwrite(&self.store, sm);
            }
        }
        if let Some(state) = false_side {
            let sm = self.store.alloc(owner, nid, sym, state, self.line);
            if let Some(f) = self.ctx.cond_false_stack.last_mut() {
                f.overwrite(&self.store, sm);
            }
        }
    }

    /// The implied-engine variant: deposits refined sm_states directly,
    /// keeping their provenance intact.
    pub(crate) fn set_true_false_sm(&mut self, true_sm: Option<SmId>, false_sm: Option<SmId>) {
        if self.ctx.cur.is_none() {
            return;
        }
        if !self.in_condition() {
            self.internal_error("set_true_false_sm outside a condition");
            return;
        }
        if let Some(sm) = true_sm {
            if let Some(cur) = self.ctx.cur.as_mut() {
                cur.overwrite(&self.store, sm);
            }
            if let Some(t) = self.ctx.cond_true_stack.last_mut() {
                t.overwrite(&self.store, sm);
            }
        }
        if let Some(sm) = false_sm {
            if let Some(f) = self.ctx.cond_false_stack.last_mut() {
                f.overwrite(&self.store, sm);
            }
        }
    }

    /// All states this variable could be in on some path.
    pub fn possible_states(
        &self,
        owner: OwnerId,
        name: &str,
        sym: Option<SymbolId>,
    ) -> Vec<Arc<State>> {
        let Some(sm) = self.get_sm(owner, name, sym) else {
            return Vec::new();
        };
        self.store
            .get(sm)
            .possible
            .iter()
            .map(|&p| self.store.get(p).state.clone())
            .collect()
    }

    /// Point query against an arbitrary tree (a pool, a return snapshot).
    pub fn state_in(
        &self,
        stree: &Stree,
        owner: OwnerId,
        name: &str,
        sym: Option<SymbolId>,
    ) -> Option<Arc<State>> {
        let key = self.lookup_key(owner, name, sym)?;
        stree.get(&self.store, key).map(|id| self.store.get(id).state.clone())
    }

    pub fn return_snapshots(&self) -> &[ReturnSnapshot] {
        &self.ctx.returns
    }

    /// Whether the current path was proven contradictory by a condition.
    /// Only the exact marker counts: once paths merge, the marker dilutes to
    /// `merged` and the join is possible again.
    pub fn is_impossible_path(&self) -> bool {
        self.get_state(INTERNAL_OWNER, IMPOSSIBLE, None)
            .map(|s| crate::state::same_state(&s, &true_state()))
            .unwrap_or(false)
    }

    pub(crate) fn mark_impossible(&mut self, true_side: bool) {
        let (t, f) = if true_side {
            (Some(true_state()), None)
        } else {
            (None, Some(true_state()))
        };
        self.set_true_false_states(INTERNAL_OWNER, IMPOSSIBLE, None, t, f);
    }

    // EXPRESSION CONVENIENCE WRAPPERS
    // --------------------------------------------------------------------------------------------

    pub fn expr_var(&self, expr: ExprId) -> Option<(String, SymbolId)> {
        self.decl.body.expr_to_var(expr)
    }

    pub fn set_state_expr(&mut self, owner: OwnerId, expr: ExprId, state: Arc<State>) -> bool {
        let Some((name, sym)) = self.expr_var(expr) else {
            return false;
        };
        self.set_state(owner, &name, Some(sym), state);
        true
    }

    pub fn get_state_expr(&self, owner: OwnerId, expr: ExprId) -> Option<Arc<State>> {
        let (name, sym) = self.expr_var(expr)?;
        self.get_state(owner, &name, Some(sym))
    }

    pub fn get_sm_expr(&self, owner: OwnerId, expr: ExprId) -> Option<SmId> {
        let (name, sym) = self.expr_var(expr)?;
        self.get_sm(owner, &name, Some(sym))
    }

    pub fn set_true_false_states_expr(
        &mut self,
        owner: OwnerId,
        expr: ExprId,
        true_side: Option<Arc<State>>,
        false_side: Option<Arc<State>>,
    ) {
        if let Some((name, sym)) = self.expr_var(expr) {
            self.set_true_false_states(owner, &name, Some(sym), true_side, false_side);
        }
    }

    // FAKE TREES
    // --------------------------------------------------------------------------------------------

    /// Runs `f` with state writes redirected into a scratch tree, returning
    /// the scratch. Used for speculative evaluation (canonical loop seeding)
    /// that must not leak into the real path.
    pub(crate) fn with_fake_stree(&mut self, f: impl FnOnce(&mut Engine)) -> Stree {
        self.fake_stack.push(Stree::default());
        f(self);
        self.fake_stack.pop().unwrap_or_default()
    }

    // ANALYSIS DRIVER
    // --------------------------------------------------------------------------------------------

    /// Analyzes one function and leaves its diagnostics in the engine's
    /// output buffer.
    pub fn analyze(&mut self, decl: Rc<FnDecl>) {
        self.reset_function_state();
        self.decl = decl.clone();
        self.line = decl.body.stmt(decl.root).pos.line;

        // The path starts live: a sentinel state guarantees the tree is
        // nonempty until a return or a contradiction kills it.
        self.ctx.cur = Some(Stree::default());
        self.set_state(INTERNAL_OWNER, UNNULL_PATH, None, true_state());

        self.pass_nullary_hooks(|h| &h.func_def);
        self.db_apply_caller_info();
        self.pass_nullary_hooks(|h| &h.after_def);
        self.ctx.start_states = self.ctx.cur.clone().unwrap_or_default();

        self.split_stmt(decl.root);

        // The fall-through exit counts as one more return path.
        if self.is_reachable() {
            self.record_return_snapshot(None);
        }

        self.pass_nullary_hooks(|h| &h.end_func);
        self.db_export_return_states();
        self.pass_nullary_hooks(|h| &h.after_func);
        self.clear_function_state();
    }

    /// Runs end-of-file hooks; call after the last function of a stream.
    pub fn end_file(&mut self) {
        self.pass_nullary_hooks(|h| &h.end_file);
    }

    pub(crate) fn record_return_snapshot(&mut self, expr: Option<ExprId>) {
        let ranges = match expr {
            Some(e) => self
                .get_implied_rl(e)
                .unwrap_or_else(|| RangeList::whole(self.decl.body.expr_ty(e))),
            None => RangeList::empty(),
        };
        let rendered = ranges.to_string();
        self.set_state(INTERNAL_OWNER, RETURN_RANGES_NAME, None, State::named(&rendered));
        if let Some(stree) = self.ctx.cur.clone() {
            self.ctx.returns.push(ReturnSnapshot { stree, ranges, line: self.line });
        }
    }

    fn reset_function_state(&mut self) {
        self.store.clear();
        self.pools.clear();
        self.names.clear();
        self.ctx.reset();
        self.bail = false;
        self.fake_stack.clear();
        self.scoped.clear();
        self.queued_facts.clear();
        self.unreachable_logged = false;
    }

    fn clear_function_state(&mut self) {
        self.reset_function_state();
        self.decl = empty_decl();
    }
}

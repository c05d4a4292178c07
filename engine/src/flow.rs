//! The path explorer: drives the AST, maintains the context stacks, and
//! dispatches hooks at every traversal event. This module understands code
//! shape; what the states *mean* is the business of the owners.

use sift_core::{AssignOp, Expr, ExprId, RangeList, Stmt, StmtId, Sval, UnOp};

use crate::{
    engine::Engine,
    extra,
    hooks::{Assignment, AssignTarget},
    store::SmId,
};

impl Engine {
    // STATEMENTS
    // --------------------------------------------------------------------------------------------

    pub(crate) fn split_stmt(&mut self, stmt: StmtId) {
        if self.bail {
            self.ctx.cur = None;
            return;
        }
        let decl = self.decl();
        let node = decl.body.stmt(stmt);
        if node.pos.line != 0 {
            self.line = node.pos.line;
        }
        self.pass_stmt_hooks(|h| &h.stmt, stmt);

        match node.kind.clone() {
            Stmt::Expression { expr } => self.split_expr(expr),
            Stmt::Compound { stmts } => {
                self.scoped.push(Vec::new());
                for s in stmts {
                    self.split_stmt(s);
                }
                let scope = self.scoped.pop().unwrap_or_default();
                for key in scope {
                    if let Some(cur) = self.ctx.cur.as_mut() {
                        cur.delete(&self.store, key);
                    }
                }
            },
            Stmt::If { cond, then, otherwise } => self.handle_if(cond, then, otherwise),
            Stmt::Iterator {
                pre_statement,
                pre_condition,
                body,
                post_statement,
                post_condition,
            } => {
                self.handle_loop(stmt, pre_statement, pre_condition, body, post_statement, post_condition);
            },
            Stmt::Switch { cond, body } => self.handle_switch(cond, body),
            Stmt::Case { from, to, stmt: inner } => self.handle_case(from, to, inner),
            Stmt::Label { name, stmt: inner } => {
                self.merge_gotos(&name);
                self.split_stmt(inner);
            },
            Stmt::Goto { label } => match label.as_str() {
                "break" => {
                    self.process_breaks();
                    self.ctx.cur = None;
                },
                "continue" => {
                    self.process_continues();
                    self.ctx.cur = None;
                },
                _ => {
                    self.save_gotos(&label);
                    self.ctx.cur = None;
                },
            },
            Stmt::Return { expr } => {
                if let Some(e) = expr {
                    self.split_expr(e);
                }
                self.pass_return_hooks(stmt, expr);
                self.record_return_snapshot(expr);
                self.ctx.cur = None;
            },
            Stmt::Declaration { decls } => {
                for (sym, init) in decls {
                    self.pass_declaration_hooks(sym, init);
                    if let Some(init) = init {
                        let assign = Assignment {
                            op: AssignOp::Assign,
                            target: AssignTarget::Sym(sym),
                            right: init,
                            pos: node.pos,
                        };
                        self.do_assignment(&assign);
                    }
                }
            },
            Stmt::Asm => self.pass_stmt_hooks(|h| &h.asm_stmt, stmt),
        }

        self.pass_stmt_hooks(|h| &h.stmt_after, stmt);
    }

    // CONDITIONS
    // --------------------------------------------------------------------------------------------

    /// Splits a whole condition. Afterwards `cur` carries the true branch
    /// and the false branch sits on the false stack.
    pub(crate) fn split_whole_condition(&mut self, cond: ExprId) {
        self.save_pre_cond_states();
        self.push_cond_stacks();
        let depth = self.ctx.cond_true_stack.len();
        self.split_conditions(cond);
        // A hook that pushed or popped a shadow tree and bailed would poison
        // every later merge; restore the frame and abandon the function.
        if self.ctx.cond_true_stack.len() != depth || self.ctx.cond_false_stack.len() != depth {
            self.internal_error("unbalanced condition stacks after hook dispatch");
            self.ctx.cond_true_stack.truncate(depth);
            self.ctx.cond_false_stack.truncate(depth);
            self.ctx.cond_true_stack.resize(depth, Default::default());
            self.ctx.cond_false_stack.resize(depth, Default::default());
        }
        self.use_cond_states();
    }

    fn split_conditions(&mut self, cond: ExprId) {
        let decl = self.decl();
        let cond = decl.body.strip(cond);
        match decl.body.expr(cond).kind.clone() {
            Expr::Logical { op, left, right } => {
                self.split_conditions(left);
                match op {
                    sift_core::LogicalOp::And => self.use_cond_true_states(),
                    sift_core::LogicalOp::Or => self.use_cond_false_states(),
                }
                self.push_cond_stacks();
                self.split_conditions(right);
                match op {
                    sift_core::LogicalOp::And => self.and_cond_states(),
                    sift_core::LogicalOp::Or => self.or_cond_states(),
                }
            },
            Expr::Preop { op: UnOp::Not, inner } => {
                self.split_conditions(inner);
                self.negate_cond_stacks();
            },
            _ => {
                self.split_expr(cond);
                // Checkers first, on the unrefined states; the implied
                // machinery and the value tracker run last and sharpen both
                // branches.
                self.pass_expr_hooks(|h| &h.condition, cond);
                crate::implied::implied_states_hook(self, cond);
                extra::match_condition(self, cond);
            },
        }
    }

    /// What a condition must evaluate to, when the tracked ranges decide it.
    pub(crate) fn known_condition(&self, cond: ExprId) -> Option<bool> {
        let decl = self.decl();
        if let Some(v) = decl.body.const_value(cond) {
            return Some(v.value() != 0);
        }
        let cond = decl.body.strip(cond);
        match &decl.body.expr(cond).kind {
            Expr::Preop { op: UnOp::Not, inner } => self.known_condition(*inner).map(|b| !b),
            Expr::Compare { op, left, right } => {
                let l = self.get_implied_rl(*left)?;
                let r = self.get_implied_rl(*right)?;
                if !l.possibly_true(*op, &r) {
                    return Some(false);
                }
                if !l.possibly_false(*op, &r) {
                    return Some(true);
                }
                None
            },
            Expr::Sym { .. } | Expr::Deref { .. } | Expr::Preop { op: UnOp::Deref, .. } => {
                let rl = self.get_implied_rl(cond)?;
                let ty = rl.ty()?;
                let zero = Sval::new(ty, 0);
                if !rl.contains(zero) {
                    return Some(true);
                }
                if rl.to_sval().is_some_and(|v| v.value() == 0) {
                    return Some(false);
                }
                None
            },
            _ => None,
        }
    }

    fn handle_if(&mut self, cond: ExprId, then: StmtId, otherwise: Option<StmtId>) {
        let known = self.known_condition(cond);
        self.split_whole_condition(cond);
        if known == Some(false) {
            self.ctx.cur = None;
        }
        self.split_stmt(then);
        self.push_true_states();
        self.use_false_states();
        if known == Some(true) {
            self.ctx.cur = None;
        }
        if let Some(e) = otherwise {
            self.split_stmt(e);
        }
        self.merge_true_states();
    }

    // LOOPS
    // --------------------------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn handle_loop(
        &mut self,
        stmt: StmtId,
        pre_statement: Option<StmtId>,
        pre_condition: Option<ExprId>,
        body: StmtId,
        post_statement: Option<StmtId>,
        post_condition: Option<ExprId>,
    ) {
        if let Some(ps) = pre_statement {
            self.split_stmt(ps);
        }
        let seeded = extra::handle_canonical_loops(self, pre_condition, post_statement);

        self.push_breaks();
        let cap = self.opts.loop_iteration_cap.max(1);
        let mut iteration = 0;
        loop {
            iteration += 1;
            let entry = self.ctx.cur.clone();
            self.push_continues();

            if let Some(cond) = pre_condition {
                let known = self.known_condition(cond);
                self.split_whole_condition(cond);
                if known == Some(false) {
                    self.ctx.cur = None;
                }
            } else {
                // Exit only through breaks (or the post-condition below).
                self.ctx.false_stack.push(None);
            }

            if iteration == 1 {
                let seeds: Vec<SmId> = seeded.iter().collect();
                for sm in seeds {
                    self.set_sm(sm);
                }
            }

            self.split_stmt(body);
            // A body that always leaves on its first pass is just a
            // conditional wearing a loop costume.
            if iteration == 1
                && self.ctx.cur.is_none()
                && matches!(self.ctx.continue_stack.last(), Some(None))
                && matches!(self.ctx.break_stack.last(), Some(None))
            {
                self.emit_info("loop could be replaced with if statement.");
            }
            self.merge_continues();
            if let Some(ps) = post_statement {
                self.split_stmt(ps);
            }
            if let Some(pc) = post_condition {
                // do-while: the real exit is this condition's false branch.
                self.pop_false_states();
                self.split_whole_condition(pc);
            }

            let cur = self.ctx.cur.clone();
            let rejoined = self.merge_option(entry.clone(), cur);
            let stable = match (&entry, &rejoined) {
                (Some(a), Some(b)) => a.logically_equal(&self.store, b),
                (None, None) => true,
                _ => false,
            };
            if stable || iteration >= cap || self.bail {
                self.use_false_states();
                self.merge_breaks();
                break;
            }
            self.ctx.cur = rejoined;
            self.pop_false_states();
        }

        if !matches!(self.ctx.break_stack.last(), Some(Some(_))) {
            self.pass_stmt_hooks(|h| &h.after_loop_no_breaks, stmt);
        }
    }

    // SWITCHES
    // --------------------------------------------------------------------------------------------

    fn handle_switch(&mut self, cond: ExprId, body: StmtId) {
        self.split_expr(cond);
        let ty = self.decl().body.expr_ty(cond);
        let vals = self.get_implied_rl(cond).unwrap_or_else(|| RangeList::whole(ty));
        self.ctx.remaining_cases.push(vals);
        self.ctx.switch_stack.push(self.ctx.cur.clone());
        self.ctx.switch_expr_stack.push(cond);
        self.ctx.default_stack.push(false);
        self.push_breaks();

        // Anything before the first case label is unreachable.
        self.ctx.cur = None;
        self.split_stmt(body);

        // Values no case claimed fall straight through the switch.
        let had_default = self.ctx.default_stack.last().copied().unwrap_or(false);
        if !had_default {
            let skip = self.implied_case_stree(None);
            let cur = self.ctx.cur.take();
            self.ctx.cur = self.merge_option(cur, skip);
        }
        self.merge_breaks();

        self.ctx.remaining_cases.pop();
        self.ctx.switch_stack.pop();
        self.ctx.switch_expr_stack.pop();
        self.ctx.default_stack.pop();
    }

    fn handle_case(&mut self, from: Option<ExprId>, to: Option<ExprId>, inner: StmtId) {
        let case_rl = from.map(|f| {
            let decl = self.decl();
            let lo = decl.body.const_value(f).unwrap_or_else(|| Sval::new(decl.body.expr_ty(f), 0));
            let hi = to.and_then(|t| decl.body.const_value(t)).unwrap_or(lo);
            RangeList::new(lo, hi)
        });
        if case_rl.is_none() {
            if let Some(top) = self.ctx.default_stack.last_mut() {
                *top = true;
            }
        }
        let case_states = self.implied_case_stree(case_rl);
        let cur = self.ctx.cur.take();
        self.ctx.cur = self.merge_option(cur, case_states);
        self.split_stmt(inner);
    }

    /// The switch-entry states constrained to one case's values (or to the
    /// values no case claimed, for `None`), with implied filtering applied.
    fn implied_case_stree(&mut self, case_rl: Option<RangeList>) -> Option<crate::stree::Stree> {
        let entry = self.ctx.switch_stack.last().cloned().flatten()?;
        let switch_expr = self.ctx.switch_expr_stack.last().copied()?;

        let vals = match case_rl {
            Some(rl) => {
                if let Some(remaining) = self.ctx.remaining_cases.last_mut() {
                    let mut left = remaining.clone();
                    for r in rl.ranges() {
                        left = left.remove(r.min, r.max);
                    }
                    *remaining = left;
                }
                rl
            },
            None => self.ctx.remaining_cases.last().cloned().unwrap_or_default(),
        };
        if vals.is_empty() {
            return None;
        }

        let mut stree = entry.clone();
        if let Some((name, sym)) = self.expr_var(switch_expr) {
            if let Some(nid) = self.names.lookup(&name) {
                let key = crate::store::TrackerKey {
                    owner: crate::engine::EXTRA_OWNER,
                    name: nid,
                    sym: Some(sym),
                };
                if let Some(gate) = entry.get(&self.store, key) {
                    let (true_sms, _) = self.separate_and_filter_in(
                        gate,
                        sift_core::CmpOp::Eq,
                        &vals,
                        crate::implied::Side::Left,
                        &entry,
                    );
                    for sm in true_sms {
                        stree.overwrite(&self.store, sm);
                    }
                }
            }
            let nid = self.names.intern(&name);
            let sm = self.store.alloc(
                crate::engine::EXTRA_OWNER,
                nid,
                Some(sym),
                extra::alloc_estate(vals),
                self.line,
            );
            stree.overwrite(&self.store, sm);
        }
        Some(stree)
    }

    // EXPRESSIONS
    // --------------------------------------------------------------------------------------------

    pub(crate) fn split_expr(&mut self, expr: ExprId) {
        if self.ctx.cur.is_none() && self.fake_stack.is_empty() {
            return;
        }
        let decl = self.decl();
        let node = decl.body.expr(expr);
        if node.pos.line != 0 {
            self.line = node.pos.line;
        }

        match node.kind.clone() {
            Expr::Value { .. } | Expr::Str { .. } | Expr::SizeOf { .. } => {},
            Expr::Sym { .. } => self.pass_expr_hooks(|h| &h.sym, expr),
            Expr::Preop { op: UnOp::Deref, inner } => {
                self.split_expr(inner);
                self.pass_expr_hooks(|h| &h.deref, expr);
                self.pass_expr_hooks(|h| &h.op, expr);
            },
            Expr::Preop { op: UnOp::Inc | UnOp::Dec, inner } => {
                self.split_expr(inner);
                if let Some((name, sym)) = self.expr_var(inner) {
                    self.pass_modification_hooks(&name, Some(sym), None);
                }
                self.pass_expr_hooks(|h| &h.op, expr);
            },
            Expr::Preop { inner, .. } => self.split_expr(inner),
            Expr::Postop { inner, .. } => {
                self.split_expr(inner);
                if let Some((name, sym)) = self.expr_var(inner) {
                    self.pass_modification_hooks(&name, Some(sym), None);
                }
                self.pass_expr_hooks(|h| &h.op, expr);
            },
            Expr::Binop { left, right, .. } => {
                self.split_expr(left);
                self.split_expr(right);
                self.pass_expr_hooks(|h| &h.binop, expr);
            },
            Expr::Compare { left, right, .. } => {
                self.split_expr(left);
                self.split_expr(right);
            },
            Expr::Logical { .. } => {
                // In expression position the short-circuit still forks
                // state; run it as a mini-branch and rejoin.
                self.split_whole_condition(expr);
                self.push_true_states();
                self.use_false_states();
                self.merge_true_states();
            },
            Expr::Conditional { cond, then, otherwise } => {
                self.handle_select(cond, then, otherwise);
            },
            Expr::Select { cond, then, otherwise } => {
                self.handle_select(cond, Some(then), otherwise);
            },
            Expr::Cast { inner, .. }
            | Expr::ForceCast { inner, .. }
            | Expr::ImpliedCast { inner, .. } => self.split_expr(inner),
            Expr::Assignment { op, left, right } => {
                let assign = Assignment {
                    op,
                    target: AssignTarget::Expr(left),
                    right,
                    pos: node.pos,
                };
                self.do_assignment(&assign);
                // Stores through a pointer are dereferences of the target.
                let decl = self.decl();
                let is_store = matches!(
                    &decl.body.expr(decl.body.strip(left)).kind,
                    Expr::Preop { op: UnOp::Deref, .. } | Expr::Deref { .. }
                );
                if is_store {
                    self.split_expr(left);
                }
            },
            Expr::Call { .. } => self.handle_call(expr),
            Expr::Deref { base, .. } => {
                self.split_expr(base);
                self.pass_expr_hooks(|h| &h.deref, expr);
            },
            Expr::Statement { stmt } => self.split_stmt(stmt),
        }
    }

    fn handle_select(&mut self, cond: ExprId, then: Option<ExprId>, otherwise: ExprId) {
        self.split_whole_condition(cond);
        if let Some(t) = then {
            self.split_expr(t);
        }
        self.push_true_states();
        self.use_false_states();
        self.split_expr(otherwise);
        self.merge_true_states();
    }

    // ASSIGNMENTS
    // --------------------------------------------------------------------------------------------

    pub(crate) fn do_assignment(&mut self, assign: &Assignment) {
        self.split_expr(assign.right);

        if let Some((name, sym)) = self.target_var(&assign.target) {
            self.pass_modification_hooks(&name, Some(sym), Some(assign));
        }

        self.pass_assign_hooks(|h| &h.raw_assignment, assign);
        self.pass_assign_hooks(|h| &h.assignment, assign);
        if self.target_is_global(&assign.target) {
            self.pass_assign_hooks(|h| &h.global_assignment, assign);
        }

        let decl = self.decl();
        let call = decl.body.strip(assign.right);
        if let Expr::Call { func, .. } = &decl.body.expr(call).kind {
            if let Some((fn_name, _)) = decl.body.expr_to_var(*func) {
                self.pass_named_assign_hooks(&fn_name, assign, call);
            }
            self.db_apply_return_states(call, Some(assign));
        }
    }

    // CALLS
    // --------------------------------------------------------------------------------------------

    fn handle_call(&mut self, call: ExprId) {
        let decl = self.decl();
        let Expr::Call { func, args } = decl.body.expr(call).kind.clone() else {
            return;
        };
        for &arg in &args {
            self.split_expr(arg);
        }

        self.pass_expr_hooks(|h| &h.function_call, call);
        if let Some((fn_name, _)) = decl.body.expr_to_var(func) {
            self.pass_named_call_hooks(&fn_name, call);
        }

        // An argument passed out by address may be rewritten by the callee.
        for &arg in &args {
            let stripped = decl.body.strip(arg);
            if let Expr::Preop { op: UnOp::AddrOf, inner } = &decl.body.expr(stripped).kind {
                let inner = *inner;
                if let Some((name, sym)) = self.expr_var(inner) {
                    self.pass_modification_hooks(&name, Some(sym), None);
                    let ty = decl.body.expr_ty(inner);
                    self.set_state(
                        crate::engine::EXTRA_OWNER,
                        &name,
                        Some(sym),
                        extra::whole_estate(ty),
                    );
                }
            }
        }

        self.db_apply_return_states(call, None);
        self.pass_expr_hooks(|h| &h.function_call_after_db, call);
    }
}

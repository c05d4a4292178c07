//! Where the engine meets the summary database: applying recorded facts at
//! function entry and call sites, and exporting this function's behavior
//! when it ends. All SQL stays behind the `sift-db` facade.

use std::collections::HashSet;

use sift_core::{Expr, ExprId, FnDecl, RangeList, Sval};
use sift_db::{CallerInfoRow, FactKind, KeyPath, ReturnStateRow, PARAM_RETURN};

use crate::{
    engine::{Engine, EXTRA_OWNER, INTERNAL_OWNER},
    extra,
    hooks::Assignment,
};

/// A fact a checker recorded about one of this function's return paths,
/// waiting for export at end of function.
#[derive(Clone, Debug)]
pub(crate) struct QueuedFact {
    pub return_id: i32,
    pub kind: FactKind,
    pub parameter: i32,
    pub key: String,
    pub value: String,
}

impl Engine {
    // FUNCTION ENTRY
    // --------------------------------------------------------------------------------------------

    /// Applies caller-recorded facts to this function's parameters.
    pub(crate) fn db_apply_caller_info(&mut self) {
        let rows = {
            let Some(db) = self.db() else { return };
            match db.caller_info(&self.decl.name, &self.decl.file) {
                Ok(rows) => rows,
                Err(err) => {
                    tracing::warn!(%err, "caller_info lookup failed; continuing without");
                    return;
                },
            }
        };
        if rows.is_empty() {
            return;
        }
        let decl = self.decl();
        let hooks = self.hooks.select_caller_info.clone();
        for row in rows {
            if row.parameter < 0 {
                continue;
            }
            let Some(&param_sym) = decl.params.get(row.parameter as usize) else {
                continue;
            };
            let pname = decl.body.symbol(param_sym).name.clone();
            let Ok(path) = KeyPath::parse(&row.key) else {
                continue;
            };
            let name = path.apply(&pname);

            if row.kind == FactKind::ParamValue && path.is_whole() {
                let ty = decl.body.symbol(param_sym).ty;
                if let Ok(rl) = RangeList::from_str_ty(ty, &row.value) {
                    self.set_state(EXTRA_OWNER, &name, Some(param_sym), extra::alloc_estate(rl));
                }
            }
            for (kind, hook) in &hooks {
                if *kind == row.kind {
                    hook(self, &row, &name, param_sym);
                }
            }
        }
    }

    // CALL SITES
    // --------------------------------------------------------------------------------------------

    /// Applies the callee's recorded return facts at a call site: the return
    /// value's possible ranges flow into the assignment, and per-kind hooks
    /// fire for every fact attached to an argument.
    pub(crate) fn db_apply_return_states(&mut self, call: ExprId, assign: Option<&Assignment>) {
        let decl = self.decl();
        let Expr::Call { func, args } = decl.body.expr(call).kind.clone() else {
            return;
        };
        let Some((fn_name, _)) = decl.body.expr_to_var(func) else {
            return;
        };
        let rows = {
            let Some(db) = self.db() else { return };
            match db.return_states(&fn_name, &self.decl.file) {
                Ok(rows) => rows,
                Err(err) => {
                    tracing::warn!(%err, "return_states lookup failed; continuing without");
                    return;
                },
            }
        };
        if rows.is_empty() {
            return;
        }

        if let Some(assign) = assign {
            let ty = self.target_ty(&assign.target);
            let mut seen = HashSet::new();
            let mut acc: Option<RangeList> = None;
            for row in &rows {
                if !seen.insert(row.return_id) {
                    continue;
                }
                if let Ok(rl) = RangeList::from_str_ty(ty, &row.return_ranges) {
                    acc = Some(match acc {
                        Some(a) => a.union(&rl),
                        None => rl,
                    });
                }
            }
            if let (Some(rl), Some((name, sym))) = (acc, self.target_var(&assign.target)) {
                if !rl.is_empty() {
                    self.set_state(EXTRA_OWNER, &name, Some(sym), extra::alloc_estate(rl));
                }
            }
        }

        // A call on the right of an assignment comes through here twice:
        // once from the call itself (argument facts) and once from the
        // assignment (return-value facts). Each row fires exactly once.
        let assigning = assign.is_some();
        let hooks = self.hooks.select_return_states.clone();
        for row in rows {
            let target = if row.parameter == PARAM_RETURN {
                if !assigning {
                    continue;
                }
                assign.and_then(|a| self.target_var(&a.target))
            } else if row.parameter >= 0 {
                if assigning {
                    continue;
                }
                args.get(row.parameter as usize)
                    .and_then(|&a| self.expr_var(decl.body.strip(a)))
            } else {
                None
            };
            let Some((base, sym)) = target else {
                continue;
            };
            let Ok(path) = KeyPath::parse(&row.key) else {
                continue;
            };
            let name = path.apply(&base);
            for (kind, hook) in &hooks {
                if *kind == row.kind {
                    hook(self, call, &name, sym, &row.value);
                }
            }
        }
    }

    /// Fires registered return-implies hooks for a call tested in a
    /// condition: the true branch sees the nonzero part of the recorded
    /// range, the false branch the zero part.
    pub(crate) fn apply_return_implies(&mut self, call: ExprId) {
        let decl = self.decl();
        let Expr::Call { func, .. } = &decl.body.expr(call).kind else {
            return;
        };
        let Some((fn_name, _)) = decl.body.expr_to_var(*func) else {
            return;
        };
        let hooks = self.hooks.return_implies.get(&fn_name).cloned().unwrap_or_default();
        for (min, max, hook) in hooks {
            let rl = RangeList::new(min, max);
            let ty = min.ty();
            let zero = Sval::new(ty, 0);
            if !rl.remove(zero, zero).is_empty() {
                hook(self, call, true);
            }
            if rl.contains(zero) {
                hook(self, call, false);
            }
        }
    }

    // WRITES
    // --------------------------------------------------------------------------------------------

    /// Records a fact about an argument of an outgoing call, to be applied
    /// when the callee is analyzed in a later pass.
    pub fn insert_caller_info(
        &mut self,
        call: ExprId,
        kind: FactKind,
        parameter: i32,
        key: &str,
        value: &str,
    ) {
        let decl = self.decl();
        let Expr::Call { func, .. } = &decl.body.expr(call).kind else {
            return;
        };
        let Some((fn_name, _)) = decl.body.expr_to_var(*func) else {
            return;
        };
        let row = CallerInfoRow {
            file: self.decl.file.clone(),
            function: fn_name,
            is_static: false,
            kind,
            parameter,
            key: key.to_string(),
            value: value.to_string(),
        };
        if let Some(db) = self.db() {
            if let Err(err) = db.insert_caller_info(&row) {
                tracing::warn!(%err, "caller_info insert failed");
            }
        }
    }

    /// Queues a fact about one of this function's return paths; written out
    /// at end of function with that path's return ranges.
    pub fn insert_return_fact(
        &mut self,
        return_id: i32,
        kind: FactKind,
        parameter: i32,
        key: &str,
        value: &str,
    ) {
        self.queued_facts.push(QueuedFact {
            return_id,
            kind,
            parameter,
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    // FUNCTION EXIT
    // --------------------------------------------------------------------------------------------

    /// Exports one row per return path per parameter-rooted state that
    /// changed since function entry, plus everything checkers queued.
    pub(crate) fn db_export_return_states(&mut self) {
        if self.db().is_none() {
            return;
        }
        let decl = self.decl();
        let start = self.ctx.start_states.clone();
        let mut rows: Vec<ReturnStateRow> = Vec::new();

        let base_row = |return_id: i32, return_ranges: String| ReturnStateRow {
            file: decl.file.clone(),
            function: decl.name.clone(),
            is_static: decl.is_static,
            return_id,
            return_ranges,
            kind: FactKind::Internal,
            parameter: PARAM_RETURN,
            key: "$".to_string(),
            value: String::new(),
        };

        let snapshots: Vec<(i32, String, crate::stree::Stree)> = self
            .ctx
            .returns
            .iter()
            .enumerate()
            .map(|(i, s)| (i as i32 + 1, s.ranges.to_string(), s.stree.clone()))
            .collect();

        for (rid, ranges, stree) in &snapshots {
            let mut row = base_row(*rid, ranges.clone());
            row.value = ranges.clone();
            rows.push(row);

            for id in stree.iter() {
                let sm = self.store.get(id);
                if sm.owner == INTERNAL_OWNER || sm.owner != EXTRA_OWNER {
                    continue;
                }
                let name = self.names.resolve(sm.name).to_string();
                let Some((param, key)) = param_key_for(&decl, &name) else {
                    continue;
                };
                if let Some(old) = start.get(&self.store, sm.key()) {
                    if crate::state::same_state(&self.store.get(old).state, &sm.state) {
                        continue;
                    }
                }
                let Some(rl) = sm.state.ranges() else {
                    continue;
                };
                let mut row = base_row(*rid, ranges.clone());
                row.kind = FactKind::ParamValue;
                row.parameter = param;
                row.key = key;
                row.value = rl.to_string();
                rows.push(row);
            }
        }

        for fact in std::mem::take(&mut self.queued_facts) {
            let ranges = snapshots
                .iter()
                .find(|(rid, ..)| *rid == fact.return_id)
                .map(|(_, r, _)| r.clone())
                .unwrap_or_default();
            let mut row = base_row(fact.return_id, ranges);
            row.kind = fact.kind;
            row.parameter = fact.parameter;
            row.key = fact.key;
            row.value = fact.value;
            rows.push(row);
        }

        let Some(db) = self.db() else { return };
        for row in &rows {
            if let Err(err) = db.insert_return_state(row) {
                tracing::warn!(%err, "return_states insert failed");
                break;
            }
        }
    }
}

/// Maps a tracked name back to the parameter-relative key grammar:
/// `p` becomes `$`, `p->len` becomes `$->len`, `*p` becomes `*$`.
fn param_key_for(decl: &FnDecl, name: &str) -> Option<(i32, String)> {
    for (idx, &param) in decl.params.iter().enumerate() {
        let pname = &decl.body.symbol(param).name;
        if name == pname {
            return Some((idx as i32, "$".to_string()));
        }
        if let Some(rest) = name.strip_prefix(pname.as_str()) {
            if rest.starts_with("->") || rest.starts_with('.') {
                return Some((idx as i32, format!("${rest}")));
            }
        }
        if let Some(rest) = name.strip_prefix('*') {
            if rest == pname {
                return Some((idx as i32, "*$".to_string()));
            }
        }
    }
    None
}

use std::{fs, path::PathBuf, rc::Rc};

use clap::Parser;
use sift_checkers::{deref, register_all};
use sift_core::{FnDecl, Severity};
use sift_db::Db;
use sift_engine::Engine;

use crate::cli::{options_from, App, CliError, ProjectArg};

/// Analyze serialized function streams produced by the front-end.
#[derive(Debug, Parser)]
pub struct AnalyzeCmd {
    /// JSON files, each holding an array of elaborated functions.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

pub fn run(app: &App, cmd: &AnalyzeCmd) -> Result<i32, CliError> {
    let mut eng = Engine::new(options_from(app));
    let registered = register_all(&mut eng);

    if !app.no_db {
        match Db::open(&app.db_file) {
            Ok(db) => eng.set_db(db),
            Err(err) => {
                // Missing database only costs cross-function refinement.
                tracing::warn!(%err, "summary database unavailable; running without");
            },
        }
    }

    load_config_tables(app, &mut eng, &registered);

    let mut internal_failure = false;
    for path in &cmd.files {
        let text = fs::read_to_string(path).map_err(|source| CliError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let decls: Vec<FnDecl> = serde_json::from_str(&text).map_err(|source| CliError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        for decl in decls {
            eng.analyze(Rc::new(decl));
            for diag in eng.take_diagnostics() {
                if diag.severity == Severity::Info && !app.info {
                    continue;
                }
                if diag.message.starts_with("internal error:") {
                    internal_failure = true;
                }
                println!("{diag}");
            }
        }
    }
    eng.end_file();

    Ok(if internal_failure { 1 } else { 0 })
}

/// Preloads the plain-text `function [arg]` tables as data-driven hooks.
fn load_config_tables(app: &App, eng: &mut Engine, registered: &sift_checkers::Registered) {
    let prefix = match app.project {
        ProjectArg::Kernel => "kernel",
        ProjectArg::IllumosKernel => "illumos_kernel",
        ProjectArg::None => return,
    };

    for (func, _) in read_table(app, &format!("{prefix}.allocation_funcs_gfp")) {
        deref::add_allocation_fn(eng, registered.deref, &func);
    }

    // Functions that rewrite an argument: the tracked value is invalidated
    // at the call site.
    for (func, arg) in read_table(app, &format!("{prefix}.clears_argument")) {
        let arg = arg.unwrap_or(0);
        eng.add_function_hook(
            &func,
            std::rc::Rc::new(move |eng: &mut Engine, call| {
                let decl = eng.decl();
                let sift_core::Expr::Call { args, .. } = &decl.body.expr(call).kind else {
                    return;
                };
                let Some(&a) = args.get(arg) else { return };
                let Some((name, sym)) = eng.expr_var(decl.body.strip(a)) else {
                    return;
                };
                let ty = decl.body.expr_ty(a);
                eng.set_state(
                    sift_engine::EXTRA_OWNER,
                    &name,
                    Some(sym),
                    sift_engine::extra::whole_estate(ty),
                );
            }),
        );
    }
}

/// Reads one `function [arg_index]` table; a missing file is an empty table.
fn read_table(app: &App, file: &str) -> Vec<(String, Option<usize>)> {
    let path = app.config_dir.join(file);
    let Ok(text) = fs::read_to_string(&path) else {
        tracing::debug!(path = %path.display(), "config table not present; skipping");
        return Vec::new();
    };
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let mut fields = l.split_whitespace();
            let func = fields.next()?.to_string();
            let arg = fields.next().and_then(|a| a.parse().ok());
            Some((func, arg))
        })
        .collect()
}

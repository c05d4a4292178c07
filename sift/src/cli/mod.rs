use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use sift_engine::{Options, Project};

mod analyze;
mod db;

// ARGUMENTS
// ================================================================================================

#[derive(Debug, Parser)]
#[command(name = "sift", about = "Semantic defect finder for C", version)]
pub struct App {
    /// Project whose function tables and idioms to load.
    #[arg(long, value_enum, default_value = "none", global = true)]
    pub project: ProjectArg,

    /// Also emit info-severity rows.
    #[arg(long, global = true)]
    pub info: bool,

    /// Enable the noisier variants of checks.
    #[arg(long, global = true)]
    pub spammy: bool,

    /// Run without the summary database (intra-procedural only).
    #[arg(long, global = true)]
    pub no_db: bool,

    /// Verbose engine logging.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Trace the implied-value machinery.
    #[arg(long, global = true)]
    pub debug_implied: bool,

    /// Path of the summary database.
    #[arg(long, default_value = "sift.db", global = true)]
    pub db_file: PathBuf,

    /// Directory holding the project config tables.
    #[arg(long, default_value = ".", global = true)]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProjectArg {
    None,
    Kernel,
    #[value(name = "illumos_kernel")]
    IllumosKernel,
}

impl From<ProjectArg> for Project {
    fn from(p: ProjectArg) -> Project {
        match p {
            ProjectArg::None => Project::None,
            ProjectArg::Kernel => Project::Kernel,
            ProjectArg::IllumosKernel => Project::IllumosKernel,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Analyze a stream of elaborated functions.
    Analyze(analyze::AnalyzeCmd),
    /// Summary database maintenance.
    Db(db::DbCmd),
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse '{path}' as a function stream")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Db(#[from] sift_db::DbError),
}

// ENTRY
// ================================================================================================

pub fn run(app: App) -> Result<i32, CliError> {
    init_tracing(&app);
    match &app.command {
        Command::Analyze(cmd) => analyze::run(&app, cmd),
        Command::Db(cmd) => db::run(&app, cmd),
    }
}

fn init_tracing(app: &App) {
    let mut filter = String::from("warn");
    if app.debug {
        filter.push_str(",sift=debug,sift_engine=debug,sift_db=debug,sift_checkers=debug");
    }
    if app.debug_implied {
        filter.push_str(",sift_engine::implied=trace");
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

pub(crate) fn options_from(app: &App) -> Options {
    Options {
        project: app.project.into(),
        info: app.info,
        spammy: app.spammy,
        no_db: app.no_db,
        debug: app.debug,
        debug_implied: app.debug_implied,
        ..Options::default()
    }
}

use clap::{Parser, Subcommand};
use sift_db::Db;

use crate::cli::{App, CliError};

#[derive(Debug, Parser)]
pub struct DbCmd {
    #[command(subcommand)]
    pub command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum DbSubcommand {
    /// Create the summary database and its schema.
    Init,
    /// Remove rows superseded by later analysis runs.
    Compact,
}

pub fn run(app: &App, cmd: &DbCmd) -> Result<i32, CliError> {
    match cmd.command {
        DbSubcommand::Init => {
            Db::open(&app.db_file)?;
            println!("initialized {}", app.db_file.display());
        },
        DbSubcommand::Compact => {
            let db = Db::open(&app.db_file)?;
            let removed = db.compact()?;
            println!("removed {removed} superseded rows");
        },
    }
    Ok(0)
}

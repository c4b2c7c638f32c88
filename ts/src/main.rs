//! Thin inspection CLI over a taskstore SQLite file.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

#[derive(Parser)]
#[command(name = "taskstore", version = env!("GIT_DESCRIBE"), about = "Inspect taskstore SQLite databases")]
struct Cli {
    /// Path to the SQLite database file
    #[arg(short, long)]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the collections (tables) present in the database
    Tables,
}

fn main() -> eyre::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let conn = rusqlite::Connection::open(&cli.db)?;
    match cli.command {
        Command::Tables => {
            let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
            let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for name in names {
                println!("{}", name?.green());
            }
        }
    }

    Ok(())
}

//! Command-line interface for boardsync
//!
//! This module defines the CLI structure using clap derive macros.
//! Each subcommand is defined in its own submodule.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::{Error, Result};

mod column;
mod init;
mod task;
mod watch;

/// boardsync - realtime task board mirror
///
/// Keeps a local projection of a shared task board consistent with remote
/// collaborators through its change feed, and issues optimistic mutations
/// against the board.
#[derive(Parser, Debug)]
#[command(name = "boardsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the board directory (defaults to the configured dir)
    #[arg(long, global = true, env = "BOARDSYNC_DIR")]
    pub dir: Option<PathBuf>,

    /// Project to operate on
    #[arg(short, long, global = true, env = "BOARDSYNC_PROJECT")]
    pub project: Option<String>,

    /// Acting user recorded on created records
    #[arg(long, global = true, env = "BOARDSYNC_USER")]
    pub user: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the board directory and a project's default columns
    Init,

    /// Mirror a project and stream change notifications
    Watch {
        /// Stop after this many feed events (mainly for scripting)
        #[arg(long)]
        events: Option<usize>,
    },

    /// Task mutations
    #[command(subcommand)]
    Task(TaskCommands),

    /// Column mutations
    #[command(subcommand)]
    Column(ColumnCommands),
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task
    Add {
        title: String,

        /// Longer description
        #[arg(long, default_value = "")]
        description: String,

        /// Column to create the task in (defaults to the first column)
        #[arg(long)]
        status: Option<String>,
    },

    /// Soft-delete a task
    Rm {
        id: String,
    },

    /// Move a task to another column
    Move {
        id: String,
        status: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ColumnCommands {
    /// Create a column
    Add {
        name: String,

        /// Board position (defaults past the current last column)
        #[arg(long)]
        order: Option<i64>,
    },

    /// Soft-delete a column
    Rm {
        id: String,
    },

    /// Change a column's position
    Move {
        id: String,
        order: i64,
    },
}

/// Resolved flags and configuration shared by the subcommands.
pub(crate) struct CliContext {
    pub dir: PathBuf,
    pub project: String,
    pub user: Option<String>,
    pub json: bool,
    pub config: Config,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config = Config::load_from_dir(&std::env::current_dir()?)?;
        let dir = self.dir.clone().unwrap_or_else(|| config.dir.clone());
        let project = self.project.clone().ok_or_else(|| {
            Error::InvalidArgument(
                "no project given; pass --project or set BOARDSYNC_PROJECT".to_string(),
            )
        })?;
        let ctx = CliContext {
            dir,
            project,
            user: self.user.clone(),
            json: self.json,
            config,
        };

        match self.command {
            Commands::Init => init::run(&ctx),
            Commands::Watch { events } => watch::run(&ctx, events),
            Commands::Task(command) => task::run(&ctx, command),
            Commands::Column(command) => column::run(&ctx, command),
        }
    }
}

/// Print a created or mutated record, honoring `--json`.
pub(crate) fn emit_record<T: serde::Serialize>(
    ctx: &CliContext,
    human: &str,
    record: &T,
) -> Result<()> {
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(record)?);
    } else {
        println!("{human}");
    }
    Ok(())
}

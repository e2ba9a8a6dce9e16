use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Durable batch task scheduler.
///
/// Loads inputs into a named task set in SQLite and drains it in batches
/// through a compute engine. Interrupted runs resume where they stopped.
#[derive(Parser, Debug)]
#[command(name = "drover", version, about = "Durable batch task scheduler")]
pub struct Cli {
    /// Path to a TOML config file (default: ./drover.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database URL, e.g. sqlite://data/drover.db (overrides the config file)
    #[arg(long, env = "DROVER_DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct TaskSetArgs {
    /// Task set name ([A-Za-z0-9_.-], up to 128 chars)
    #[arg(long)]
    pub task_set: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load inputs into a task set, one per line
    Load {
        #[command(flatten)]
        target: TaskSetArgs,

        /// Input file; lines that parse as JSON are stored as JSON, others as strings
        #[arg(long)]
        input: PathBuf,

        /// Keep existing tasks instead of clearing the task set first
        #[arg(long)]
        append: bool,
    },

    /// Drain a task set with the built-in echo engine
    Run {
        #[command(flatten)]
        target: TaskSetArgs,

        /// Tasks per engine call (overrides the config file)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Retry bound (overrides the config file)
        #[arg(long)]
        max_retries: Option<u32>,

        /// Inputs the echo engine answers with null (repeatable)
        #[arg(long)]
        fail_on: Vec<String>,
    },

    /// Print the task set summary as JSON
    Status {
        #[command(flatten)]
        target: TaskSetArgs,
    },

    /// Print completed {input, output} pairs as JSON lines
    Results {
        #[command(flatten)]
        target: TaskSetArgs,
    },

    /// List task sets present in the database
    Sets,
}

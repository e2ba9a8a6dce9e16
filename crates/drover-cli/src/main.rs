mod cli;
mod config;
mod demo;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use drover_core::{Engine, SchedulerBuilder, SchedulerConfig, TaskDatabase, TaskStore};
use serde_json::Value;
use tracing::info;

use crate::cli::{Cli, Command};
use crate::config::{DroverConfig, init_tracing};
use crate::demo::EchoEngine;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut config = DroverConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.logging);

    if let Some(url) = args.database_url {
        config.store.database_url = url;
    }

    let db = TaskDatabase::open(&config.store.database_url)
        .await
        .with_context(|| format!("failed to open database {}", config.store.database_url))?;

    let outcome = execute(args.command, &db, &config.scheduler, &mut std::io::stdout().lock()).await;
    db.close().await;
    outcome
}

async fn execute(
    command: Command,
    db: &TaskDatabase,
    scheduler_config: &SchedulerConfig,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        Command::Load {
            target,
            input,
            append,
        } => {
            let store = db.task_set(&target.task_set)?;
            let inputs = read_inputs(&input)?;
            let ids = store
                .load(inputs, !append)
                .await
                .context("failed to load tasks")?;
            info!(task_set = %target.task_set, loaded = ids.len(), "load finished");
            writeln!(out, "{}", serde_json::json!({ "loaded": ids.len() }))?;
        }

        Command::Run {
            target,
            batch_size,
            max_retries,
            fail_on,
        } => {
            let mut settings = scheduler_config.clone();
            if let Some(n) = batch_size {
                settings.batch_size = n;
            }
            if let Some(n) = max_retries {
                settings.max_retries = n;
            }

            let store = Arc::new(db.task_set(&target.task_set)?);
            let scheduler = SchedulerBuilder::new(store)
                .engine(Engine::asynchronous(EchoEngine::new(fail_on)))
                .config(&settings)
                .build()
                .context("invalid scheduler settings")?;
            let report = scheduler.run().await.context("scheduler run failed")?;
            writeln!(out, "{}", serde_json::to_string(&report.summary)?)?;
        }

        Command::Status { target } => {
            let store = db.task_set(&target.task_set)?;
            let summary = store.summary().await?;
            writeln!(out, "{}", serde_json::to_string(&summary)?)?;
        }

        Command::Results { target } => {
            let store = db.task_set(&target.task_set)?;
            for pair in store.completed_results().await? {
                writeln!(out, "{}", serde_json::to_string(&pair)?)?;
            }
        }

        Command::Sets => {
            for name in db.task_sets().await? {
                writeln!(out, "{name}")?;
            }
        }
    }
    Ok(())
}

fn read_inputs(path: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read inputs: {}", path.display()))?;
    Ok(parse_inputs(&content))
}

/// One input per non-blank line: JSON when it parses, a plain string otherwise.
fn parse_inputs(content: &str) -> Vec<Value> {
    content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string())))
        .collect()
}

//! Background backups of a working directory onto `autocommit/backup`.
//!
//! `autocommit start` runs the timer until SIGINT/SIGTERM; the other commands
//! are one-shot helpers around the same pieces.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use autocommit::backup::BACKUP_BRANCH;
use autocommit::cycle::{CycleOutcome, CycleRunner};
use autocommit::daemon::{Orchestrator, shutdown_signal};
use autocommit::exit_codes;
use autocommit::io::config::{AutocommitConfig, CONFIG_FILE_NAME, load_config};
use autocommit::io::drafter::CommandDrafter;
use autocommit::io::git::Git;
use autocommit::io::init::{InitOptions, InitOutcome, init_config, repository_root};
use autocommit::logging;
use autocommit::reconcile::untrack_ignored;
use autocommit::status::backup_status;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "autocommit",
    version,
    about = "Periodically back up the working tree to a dedicated git branch"
)]
struct Cli {
    /// Directory inside the repository to back up.
    #[arg(long, global = true, default_value = ".")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run commit cycles on a timer until interrupted.
    Start,
    /// Run a single commit cycle now.
    Once,
    /// Write a default `.autocommit.toml` at the repository root.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Untrack files that now match ignore rules.
    Untrack,
    /// Print backup branch status as JSON.
    Status,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::FAILURE
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    logging::init();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::FAILURE);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Start => cmd_start(&cli.dir),
        Command::Once => cmd_once(&cli.dir),
        Command::Init { force } => cmd_init(&cli.dir, force),
        Command::Untrack => cmd_untrack(&cli.dir),
        Command::Status => cmd_status(&cli.dir),
    }
}

/// Repository root and its validated config.
fn load_repo(dir: &Path) -> Result<(PathBuf, AutocommitConfig)> {
    let root = repository_root(dir)?;
    let config = load_config(&root.join(CONFIG_FILE_NAME))?;
    Ok((root, config))
}

fn cmd_start(dir: &Path) -> Result<i32> {
    let (root, config) = load_repo(dir)?;
    println!(
        "Backing up {} to {BACKUP_BRANCH} every {}s",
        root.display(),
        config.commit_interval_seconds
    );

    let runner = Arc::new(CycleRunner::new(Git::new(&root), CommandDrafter::new()?));
    let orchestrator = Orchestrator::new(runner, config)
        .reload_config_from(root.join(CONFIG_FILE_NAME))
        .show_countdown(std::io::stdout().is_terminal());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let result = runtime.block_on(async {
        let shutdown = shutdown_signal()?;
        orchestrator.run(shutdown).await
    });
    // An abandoned cycle may still hold a blocking thread; do not wait for it.
    runtime.shutdown_background();

    let report = result?;
    info!(
        cycles_run = report.cycles_run,
        interrupted_cycle = report.interrupted_cycle,
        "autocommit stopped"
    );
    Ok(exit_codes::OK)
}

fn cmd_once(dir: &Path) -> Result<i32> {
    let (root, config) = load_repo(dir)?;
    let runner = CycleRunner::new(Git::new(&root), CommandDrafter::new()?);
    let outcome = runner.run_cycle(&config);
    println!("{outcome}");
    Ok(match outcome {
        CycleOutcome::Failed { .. } => exit_codes::FAILURE,
        _ => exit_codes::OK,
    })
}

fn cmd_init(dir: &Path, force: bool) -> Result<i32> {
    match init_config(dir, &InitOptions { force })? {
        InitOutcome::Created(path) => println!("created {}", path.display()),
        InitOutcome::Overwritten(path) => println!("overwrote {}", path.display()),
        InitOutcome::Kept(path) => {
            println!("{} already exists (use --force to overwrite)", path.display());
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_untrack(dir: &Path) -> Result<i32> {
    let (root, config) = load_repo(dir)?;
    let report = untrack_ignored(&Git::new(&root), config.untrack_batch_size)?;
    if report.batches.is_empty() {
        println!("no tracked files match ignore rules");
    } else {
        println!(
            "untracked {} files in {} batches ({})",
            report.total(),
            report.batches.len(),
            report
                .batches
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_status(dir: &Path) -> Result<i32> {
    let root = repository_root(dir)?;
    let status = backup_status(&Git::new(&root))?;
    let json = serde_json::to_string_pretty(&status).context("serialize status")?;
    println!("{json}");
    Ok(exit_codes::OK)
}

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use vg_core::config::Config;
use vg_core::gateway::ProcessRunner;
use vg_core::{probe, VibeEngine};
use vg_telemetry::LogFormat;

use commands::start::Resolution;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// vibe-git -- auto-commit every edit to a session branch, then squash it
/// into one commit and open a pull request.
#[derive(Parser)]
#[command(name = "vg", version, about)]
struct Cli {
    /// Repository to operate on (defaults to the current directory).
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// Print reports and logs as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the session status (default when no subcommand is given).
    Status,

    /// Start a session and keep auto-committing until Ctrl-C.
    #[command(group(ArgGroup::new("resolution").args(["stash", "checkpoint", "adopt"])))]
    Start {
        /// Stash uncommitted changes first.
        #[arg(long)]
        stash: bool,
        /// Commit uncommitted changes as a checkpoint first.
        #[arg(long)]
        checkpoint: bool,
        /// Keep uncommitted changes as the first auto-commit.
        #[arg(long)]
        adopt: bool,
    },

    /// Squash the session into one commit, rebase, push and open a pull request.
    Stop {
        /// Commit message; the first line becomes the pull request title.
        #[arg(short, long)]
        message: String,
    },

    /// Re-attach a session left behind by an earlier process.
    Resume,

    /// Forget a session left behind by an earlier process.
    Discard,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let start = match cli.repo {
        Some(path) => path,
        None => std::env::current_dir().context("cannot read current directory")?,
    };
    let root = probe::locate(&start)
        .with_context(|| format!("no git repository at {}", start.display()))?;
    let config = Config::load_for_repo(root.workdir())
        .with_context(|| format!("loading config for {root}"))?;

    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Human
    };
    vg_telemetry::init(format, "vg", &config.general.log_level);

    let engine = VibeEngine::with_runner(root, config, Arc::new(ProcessRunner))
        .await
        .context("opening session engine")?;

    match cli.command {
        None | Some(Commands::Status) => commands::status::run(&engine, cli.json)?,
        Some(Commands::Start {
            stash,
            checkpoint,
            adopt,
        }) => {
            let how = if stash {
                Resolution::Stash
            } else if checkpoint {
                Resolution::Checkpoint
            } else if adopt {
                Resolution::Adopt
            } else {
                Resolution::None
            };
            commands::start::run(&engine, how, cli.json).await?;
        }
        Some(Commands::Stop { message }) => {
            commands::stop::run(&engine, &message, cli.json).await?;
        }
        Some(Commands::Resume) => commands::orphan::resume(&engine, cli.json).await?,
        Some(Commands::Discard) => commands::orphan::discard(&engine, cli.json).await?,
    }

    Ok(())
}

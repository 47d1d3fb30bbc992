use std::time::Duration;

use anyhow::Context;
use tracing::info;
use vg_core::{VibeEngine, VibeError};

use super::emit;

/// How `start` treats uncommitted changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    None,
    Stash,
    Checkpoint,
    Adopt,
}

/// Run the `start` subcommand. Watching continues until Ctrl-C.
pub async fn run(engine: &VibeEngine, how: Resolution, json: bool) -> anyhow::Result<()> {
    let result = match how {
        Resolution::None => engine.start().await,
        Resolution::Stash => engine.stash_and_start().await,
        Resolution::Checkpoint => engine.commit_checkpoint_and_start().await,
        Resolution::Adopt => engine.adopt_current_and_start().await,
    };
    let report = match result {
        Ok(report) => report,
        Err(e @ VibeError::DirtyWorkingTree { .. }) => {
            return Err(e).context("rerun with --stash, --checkpoint or --adopt");
        }
        Err(e) => return Err(e.into()),
    };
    emit(&report, json)?;
    watch_until_interrupted(engine, json).await
}

/// Report each new auto-commit, then detach the session on Ctrl-C.
pub async fn watch_until_interrupted(engine: &VibeEngine, json: bool) -> anyhow::Result<()> {
    let mut seen = engine.status().auto_commits;
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("waiting for Ctrl-C")?;
                break;
            }
            _ = tick.tick() => {
                let status = engine.status();
                if status.auto_commits != seen {
                    seen = status.auto_commits;
                    if !json {
                        println!("{status}");
                    }
                }
            }
        }
    }

    info!("interrupted, detaching session");
    engine.shutdown().await;
    emit(&engine.status(), json)
}

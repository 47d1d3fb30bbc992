use vg_core::VibeEngine;

use super::emit;

/// Run the `resume` subcommand. Watching continues until Ctrl-C.
pub async fn resume(engine: &VibeEngine, json: bool) -> anyhow::Result<()> {
    let report = engine.resume_orphan().await?;
    emit(&report, json)?;
    super::start::watch_until_interrupted(engine, json).await
}

/// Run the `discard` subcommand.
pub async fn discard(engine: &VibeEngine, json: bool) -> anyhow::Result<()> {
    let report = engine.discard_orphan().await?;
    emit(&report, json)
}

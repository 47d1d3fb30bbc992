use anyhow::Context;
use tracing::error;
use vg_core::VibeEngine;

use super::emit;

/// Run the `stop` subcommand: finalize the session.
pub async fn run(engine: &VibeEngine, message: &str, json: bool) -> anyhow::Result<()> {
    match engine.stop(message).await {
        Ok(report) => emit(&report, json),
        Err(e) => {
            if let Some(step) = e.finalize_step() {
                error!(%step, error = %e.root_cause(), "finalize failed, session keeps vibing");
            }
            Err(e).context("stop failed; fix the cause and run 'vg stop' again")
        }
    }
}

use vg_core::VibeEngine;

use super::emit;

/// Run the `status` subcommand.
pub fn run(engine: &VibeEngine, json: bool) -> anyhow::Result<()> {
    let report = engine.status();
    emit(&report, json)?;
    if let (false, Some(orphan)) = (json, &report.orphan) {
        let reason = orphan.reason.as_deref().unwrap_or("no reason recorded");
        println!("  left behind by process {}: {reason}", orphan.pid);
    }
    Ok(())
}

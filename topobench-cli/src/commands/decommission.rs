// SPDX-License-Identifier: Apache-2.0

//! `topobench decommission` command - ledger-driven teardown.
//!
//! Best-effort: exits zero even with partial failures, because an
//! incomplete teardown log is preferable to a teardown that stops early.
//! The ledger is cleared only when the report is clean.

use topobench_core::decommission::{Decommissioner, Outcome};

pub async fn execute(config_path: &str, no_sweep: bool) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = super::load(config_path)?;

    println!("▶ Decommissioning everything in the ledger");
    let decommissioner = Decommissioner::new(&ctx.provider, &ctx.ledger, &ctx.config);
    let report = decommissioner.decommission().await;

    for outcome in &report.outcomes {
        match outcome.outcome {
            Outcome::Deleted => println!("✓ {} {}", outcome.kind, outcome.identifier),
            Outcome::Skipped => println!("- {} {} (skipped)", outcome.kind, outcome.identifier),
            Outcome::Failed => println!(
                "✗ {} {} ({})",
                outcome.kind,
                outcome.identifier,
                outcome.detail.as_deref().unwrap_or("unknown")
            ),
        }
    }

    if !no_sweep {
        println!("▶ Sweeping orphaned interfaces and addresses");
        let sweep = decommissioner.sweep_orphans().await;
        println!(
            "✓ Sweep removed {} interfaces, {} addresses",
            sweep.interfaces_deleted, sweep.addresses_released
        );
    }

    ctx.artifacts.save_json("decommission_report.json", &report)?;

    println!(
        "Teardown: {} deleted, {} skipped, {} failed",
        report.deleted(),
        report.skipped(),
        report.failed()
    );

    if report.is_clean() {
        ctx.ledger.clear()?;
        println!("✓ Ledger cleared: {}", ctx.ledger.dir().display());
    } else {
        println!(
            "✗ Partial teardown; ledger kept for a retry: {}",
            ctx.ledger.dir().display()
        );
    }

    Ok(())
}

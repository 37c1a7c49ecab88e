// SPDX-License-Identifier: Apache-2.0

//! `topobench all` command - provision, test, collect in sequence.
//!
//! Teardown stays a separate, explicit decision; this command leaves the
//! infrastructure running and the ledger populated.

use topobench_core::collect::MetricsCollector;
use topobench_core::provision::Provisioner;
use topobench_core::testrun::TestRunner;

pub async fn execute(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = super::load(config_path)?;

    println!("▶ Provisioning both topologies");
    Provisioner::new(&ctx.provider, &ctx.ledger, &ctx.config)
        .provision_all()
        .await?;
    println!("✓ Provisioned; ledger: {}", ctx.ledger.dir().display());

    println!("▶ Running benchmark protocol");
    let window = TestRunner::new(&ctx.config, &ctx.ledger, &ctx.artifacts)
        .run()
        .await?;
    println!("✓ Protocol complete: {} .. {}", window.start, window.end);

    println!("▶ Collecting metrics and costs");
    let summary = MetricsCollector::new(&ctx.provider, &ctx.ledger, &ctx.artifacts, &ctx.config)
        .collect()
        .await?;
    println!(
        "✓ {} metric queries ({} empty), {} cost rows",
        summary.metric_queries, summary.empty_series, summary.cost_rows
    );

    println!("Artifacts: {}", ctx.artifacts.dir().display());
    println!("Run `topobench decommission` to tear everything down.");
    Ok(())
}

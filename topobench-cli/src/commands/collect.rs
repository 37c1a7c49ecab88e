// SPDX-License-Identifier: Apache-2.0

//! `topobench collect-metrics` command - query metrics and costs.

use topobench_core::collect::MetricsCollector;

pub async fn execute(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = super::load(config_path)?;

    println!("▶ Collecting metrics and costs");
    let collector =
        MetricsCollector::new(&ctx.provider, &ctx.ledger, &ctx.artifacts, &ctx.config);
    let summary = collector.collect().await?;

    println!(
        "✓ {} metric queries ({} empty), {} cost rows",
        summary.metric_queries, summary.empty_series, summary.cost_rows
    );
    println!("Artifacts: {}", ctx.artifacts.dir().display());
    Ok(())
}

// SPDX-License-Identifier: Apache-2.0

//! `topobench test` command - run the benchmark protocol.

use topobench_core::testrun::{protocol_duration_lower_bound, TestRunner};

pub async fn execute(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = super::load(config_path)?;

    let lower_bound = protocol_duration_lower_bound(&ctx.config);
    println!(
        "▶ Running benchmark protocol (at least {}s of timed waits)",
        lower_bound.as_secs()
    );

    let runner = TestRunner::new(&ctx.config, &ctx.ledger, &ctx.artifacts);
    let window = runner.run().await?;

    println!("✓ Protocol complete: {} .. {}", window.start, window.end);
    println!("Artifacts: {}", ctx.artifacts.dir().display());
    Ok(())
}

// SPDX-License-Identifier: Apache-2.0

//! `topobench provision` command - stand up both topologies.

use topobench_core::provision::Provisioner;
use topobench_core::types::{ResourceKind, Topology};

pub async fn execute(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = super::load(config_path)?;
    tracing::info!(config = %config_path, region = %ctx.config.region, "provisioning");

    let provisioner = Provisioner::new(&ctx.provider, &ctx.ledger, &ctx.config);

    println!("▶ Provisioning {} topology", Topology::Function);
    provisioner.provision_function_topology().await?;
    let endpoint = ctx
        .ledger
        .get(ResourceKind::FunctionEndpoint)?
        .map(|r| r.identifier)
        .unwrap_or_default();
    println!("✓ Function topology ready: {}", endpoint);

    println!("▶ Provisioning {} topology", Topology::Service);
    provisioner.provision_service_topology().await?;
    let endpoint = ctx
        .ledger
        .get(ResourceKind::ServiceEndpoint)?
        .map(|r| r.identifier)
        .unwrap_or_default();
    println!("✓ Service topology ready: {}", endpoint);

    println!("Ledger: {}", ctx.ledger.dir().display());
    Ok(())
}

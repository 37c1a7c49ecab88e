// SPDX-License-Identifier: Apache-2.0

//! CLI command modules.

pub mod all;
pub mod collect;
pub mod decommission;
pub mod provision;
pub mod test;

use topobench_core::artifacts::ArtifactStore;
use topobench_core::config::{BenchConfig, ConfigLoader, EnvSettings, ProviderKind};
use topobench_core::ledger::Ledger;
use topobench_core::provider::InMemoryProvider;

/// Everything a stage needs, wired from the config file and the process
/// environment. Environment variables are read here and nowhere else.
pub(crate) struct Context {
    pub config: BenchConfig,
    pub ledger: Ledger,
    pub artifacts: ArtifactStore,
    pub provider: InMemoryProvider,
}

pub(crate) fn load(config_path: &str) -> Result<Context, Box<dyn std::error::Error>> {
    let env = EnvSettings::from_process_env()?;
    let config = ConfigLoader::load_file(config_path, env)?;

    let ledger = Ledger::open(&config.ledger_dir)?;
    let artifacts = ArtifactStore::new(&config.artifact_dir)?;
    let provider = match config.provider {
        ProviderKind::Memory => InMemoryProvider::new(),
    };

    Ok(Context {
        config,
        ledger,
        artifacts,
        provider,
    })
}

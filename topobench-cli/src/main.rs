// SPDX-License-Identifier: Apache-2.0

//! Topobench CLI
//!
//! Command-line interface for the dual-topology benchmark orchestrator.

use clap::{Parser, Subcommand};

mod commands;

/// Topobench - benchmark the same workload as a function and as a service
#[derive(Parser)]
#[command(name = "topobench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "topobench.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision both deployment topologies
    Provision,

    /// Run the benchmark protocol against the provisioned endpoints
    Test,

    /// Collect metrics and costs for the recorded test window
    CollectMetrics,

    /// Tear down everything recorded in the ledger (best-effort)
    Decommission {
        /// Skip the orphan sweep after the ledger-driven teardown
        #[arg(long)]
        no_sweep: bool,
    },

    /// Provision, test, and collect in sequence (teardown stays explicit)
    All,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    // Dispatch to command handlers
    match cli.command {
        Commands::Provision => commands::provision::execute(&cli.config).await,
        Commands::Test => commands::test::execute(&cli.config).await,
        Commands::CollectMetrics => commands::collect::execute(&cli.config).await,
        Commands::Decommission { no_sweep } => {
            commands::decommission::execute(&cli.config, no_sweep).await
        }
        Commands::All => commands::all::execute(&cli.config).await,
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Core library for the dual-topology cloud benchmark orchestrator.
//!
//! Provisions the same containerized workload two ways - as an invocation-
//! billed function behind an HTTP route and as a load-balanced container
//! service - runs a standardized benchmark protocol against both, collects
//! time-correlated metrics and daily costs, and tears everything down from
//! a durable resource ledger.

pub mod artifacts;
pub mod collect;
pub mod config;
pub mod decommission;
pub mod error;
pub mod ledger;
pub mod provider;
pub mod provision;
pub mod stats;
pub mod testrun;
pub mod types;
pub mod wait;

pub use artifacts::ArtifactStore;
pub use collect::{CollectionSummary, MetricsCollector};
pub use config::{BenchConfig, ConfigLoader, EnvSettings};
pub use decommission::{DecommissionReport, Decommissioner, Outcome};
pub use error::{BenchError, BenchResult};
pub use ledger::Ledger;
pub use provider::{CloudProvider, InMemoryProvider};
pub use provision::Provisioner;
pub use stats::LatencyStats;
pub use testrun::TestRunner;
pub use types::{ResourceKind, ResourceRecord, TestWindow, Topology};

// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the orchestrator.
//!
//! Explicit enum error types throughout - no `Box<dyn Error>`, no `anyhow`.
//! Provisioning and testing fail fast within a stage; metric queries fail
//! per-query without blocking siblings; decommission failures never surface
//! here at all (they are aggregated into a `DecommissionReport`).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{ResourceKind, Topology};

/// Top-level error type covering every stage.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("test execution error: {0}")]
    Test(#[from] TestExecutionError),

    #[error("metrics collection error: {0}")]
    Metrics(#[from] MetricsQueryError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

/// Result type alias using BenchError.
pub type BenchResult<T> = Result<T, BenchError>;

/// Configuration validation errors. Any of these prevents a stage from
/// starting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("configuration parse error: {message}")]
    Parse { message: String },

    #[error("invalid field value: {field} = {value} - {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("missing required environment variable: {var}")]
    MissingEnv { var: &'static str },

    #[error("io error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// A provisioning step failed. Remaining steps for the topology are
/// abandoned; ledger entries written so far are deliberately left in place
/// for inspection and later decommissioning.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("stage '{stage}' failed creating {kind}: {source}")]
    Provider {
        stage: &'static str,
        kind: ResourceKind,
        #[source]
        source: ProviderError,
    },

    #[error("stage '{stage}' could not persist ledger entry: {source}")]
    Ledger {
        stage: &'static str,
        #[source]
        source: LedgerError,
    },

    #[error("stage '{stage}' timed out: {source}")]
    Wait {
        stage: &'static str,
        #[source]
        source: WaitTimeout,
    },
}

/// The benchmark protocol failed mid-run. Artifacts written before the
/// failure are preserved for forensic inspection.
#[derive(Debug, Error)]
pub enum TestExecutionError {
    #[error("no {topology} endpoint in the ledger; run provisioning first")]
    MissingEndpoint { topology: Topology },

    #[error("{topology} health check never succeeded: {source}")]
    HealthCheck {
        topology: Topology,
        #[source]
        source: WaitTimeout,
    },

    #[error("invocation failed during {phase} against {topology}: {source}")]
    Invocation {
        phase: &'static str,
        topology: Topology,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to persist test artifact: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("failed to persist test window: {0}")]
    Ledger(#[from] LedgerError),

    #[error("invalid test window: {0}")]
    Window(#[source] ConfigError),
}

/// One or more metric queries ultimately failed. Raised only after every
/// query has been attempted; successful queries have already been persisted.
#[derive(Debug, Error)]
pub enum MetricsQueryError {
    #[error("no test window recorded; run the test stage first")]
    WindowMissing,

    #[error("{} of {attempted} metric queries failed: {failed:?}", failed.len())]
    QueriesFailed {
        attempted: usize,
        failed: Vec<String>,
    },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Error returned by cloud provider primitives.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The resource does not exist. The decommissioner maps this to a
    /// "skipped" outcome instead of a failure.
    #[error("resource not found: {identifier}")]
    NotFound { identifier: String },

    #[error("{operation} failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound { .. })
    }
}

/// Ledger persistence errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Artifact store errors.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A bounded poll expired before its condition became true.
#[derive(Debug, Error)]
#[error("condition '{condition}' not met within {waited:?}")]
pub struct WaitTimeout {
    pub condition: String,
    pub waited: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provision_error_names_stage_and_kind() {
        let err = ProvisionError::Provider {
            stage: "network",
            kind: ResourceKind::Subnet,
            source: ProviderError::Operation {
                operation: "create_subnet",
                message: "quota exceeded".to_string(),
            },
        };
        let text = err.to_string();
        assert!(text.contains("network"));
        assert!(text.contains("subnet"));
    }

    #[test]
    fn test_not_found_discriminator() {
        let err = ProviderError::NotFound {
            identifier: "vpc-123".to_string(),
        };
        assert!(err.is_not_found());

        let err = ProviderError::Operation {
            operation: "delete_vpc",
            message: "dependency violation".to_string(),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_chain() {
        let cfg_err = ConfigError::MissingEnv {
            var: "TOPOBENCH_DATASTORE_URL",
        };
        let bench_err: BenchError = cfg_err.into();
        assert!(matches!(bench_err, BenchError::Config(_)));
    }
}

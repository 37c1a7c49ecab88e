// SPDX-License-Identifier: Apache-2.0

//! Core data model: topologies, resource kinds, ledger records, test windows.
//!
//! Validated inputs follow the newtype pattern - invariants are checked at
//! construction time so downstream code never sees an invalid value.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One of the two deployment styles under benchmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Function-invocation topology behind an HTTP routing layer.
    Function,
    /// Long-running container service behind a load balancer.
    Service,
}

impl Topology {
    /// Service name used to filter cost reports for this topology.
    pub fn cost_service_name(&self) -> &'static str {
        match self {
            Topology::Function => "function-compute",
            Topology::Service => "container-service",
        }
    }

    /// Monitoring namespace for this topology's metrics.
    pub fn metric_namespace(&self) -> &'static str {
        match self {
            Topology::Function => "compute/function",
            Topology::Service => "compute/service",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Function => write!(f, "function"),
            Topology::Service => write!(f, "service"),
        }
    }
}

/// Every class of cloud resource the provisioner can create.
///
/// One ledger file per kind. Variant order follows provisioning dependency
/// order; the decommissioner walks it in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    // Shared pipeline (one per topology, disjoint namespaces)
    FunctionRepository,
    ServiceRepository,
    FunctionImage,
    ServiceImage,
    FunctionRole,
    ServiceRole,
    FunctionLogGroup,
    ServiceLogGroup,

    // Function topology
    Function,
    HttpRoute,
    InvokePermission,
    FunctionEndpoint,

    // Service topology network (single owned network, shared by all tasks)
    Vpc,
    Subnet,
    InternetGateway,
    RouteTable,
    SecurityGroup,

    // Service topology compute
    Cluster,
    TargetGroup,
    LoadBalancer,
    Listener,
    Service,
    AutoscalingPolicy,
    ServiceEndpoint,
}

impl ResourceKind {
    /// File name backing this kind in the ledger directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            ResourceKind::FunctionRepository => "function_repository",
            ResourceKind::ServiceRepository => "service_repository",
            ResourceKind::FunctionImage => "function_image",
            ResourceKind::ServiceImage => "service_image",
            ResourceKind::FunctionRole => "function_role",
            ResourceKind::ServiceRole => "service_role",
            ResourceKind::FunctionLogGroup => "function_log_group",
            ResourceKind::ServiceLogGroup => "service_log_group",
            ResourceKind::Function => "function",
            ResourceKind::HttpRoute => "http_route",
            ResourceKind::InvokePermission => "invoke_permission",
            ResourceKind::FunctionEndpoint => "function_endpoint",
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "internet_gateway",
            ResourceKind::RouteTable => "route_table",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::Cluster => "cluster",
            ResourceKind::TargetGroup => "target_group",
            ResourceKind::LoadBalancer => "load_balancer",
            ResourceKind::Listener => "listener",
            ResourceKind::Service => "service",
            ResourceKind::AutoscalingPolicy => "autoscaling_policy",
            ResourceKind::ServiceEndpoint => "service_endpoint",
        }
    }

    /// All kinds in provisioning dependency order.
    pub fn all() -> &'static [ResourceKind] {
        &[
            ResourceKind::FunctionRepository,
            ResourceKind::ServiceRepository,
            ResourceKind::FunctionImage,
            ResourceKind::ServiceImage,
            ResourceKind::FunctionRole,
            ResourceKind::ServiceRole,
            ResourceKind::FunctionLogGroup,
            ResourceKind::ServiceLogGroup,
            ResourceKind::Function,
            ResourceKind::HttpRoute,
            ResourceKind::InvokePermission,
            ResourceKind::FunctionEndpoint,
            ResourceKind::Vpc,
            ResourceKind::Subnet,
            ResourceKind::InternetGateway,
            ResourceKind::RouteTable,
            ResourceKind::SecurityGroup,
            ResourceKind::Cluster,
            ResourceKind::TargetGroup,
            ResourceKind::LoadBalancer,
            ResourceKind::Listener,
            ResourceKind::Service,
            ResourceKind::AutoscalingPolicy,
            ResourceKind::ServiceEndpoint,
        ]
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

/// A single provisioned resource as persisted in the ledger.
///
/// Written once at the moment the cloud resource is confirmed created,
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub kind: ResourceKind,
    pub identifier: String,
    pub created_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn new(kind: ResourceKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            created_at: Utc::now(),
        }
    }
}

/// Half-open UTC interval bracketing load-test execution.
///
/// The authoritative query range for performance metrics. Invariant:
/// `end` is strictly greater than `start`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestWindow {
    #[serde(rename = "start_time")]
    pub start: DateTime<Utc>,
    #[serde(rename = "end_time")]
    pub end: DateTime<Utc>,
}

impl TestWindow {
    /// Create a window, rejecting `end <= start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ConfigError> {
        if end <= start {
            return Err(ConfigError::InvalidField {
                field: "test_window",
                value: format!("{} .. {}", start, end),
                reason: "end must be strictly greater than start".to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// One provider-reported datapoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Validated resource-name prefix.
///
/// Prepended to every cloud resource name so a run's resources are
/// identifiable and namespaced per topology. Lowercase alphanumeric plus
/// hyphens, non-empty, at most 32 chars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamePrefix(String);

impl NamePrefix {
    pub fn new(prefix: impl Into<String>) -> Result<Self, ConfigError> {
        let prefix = prefix.into();

        if prefix.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "name_prefix",
                value: prefix,
                reason: "prefix cannot be empty".to_string(),
            });
        }

        if prefix.len() > 32 {
            return Err(ConfigError::InvalidField {
                field: "name_prefix",
                value: prefix.clone(),
                reason: format!("prefix too long: {} chars (max 32)", prefix.len()),
            });
        }

        if !prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ConfigError::InvalidField {
                field: "name_prefix",
                value: prefix,
                reason: "prefix must be lowercase alphanumeric with hyphens".to_string(),
            });
        }

        Ok(Self(prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build a resource name scoped to a topology, e.g. `bench-function-role`.
    pub fn scoped(&self, topology: Topology, suffix: &str) -> String {
        format!("{}-{}-{}", self.0, topology, suffix)
    }
}

impl fmt::Display for NamePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for NamePrefix {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NamePrefix> for String {
    fn from(prefix: NamePrefix) -> Self {
        prefix.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_name_prefix_valid() {
        assert!(NamePrefix::new("bench").is_ok());
        assert!(NamePrefix::new("bench-2026").is_ok());
    }

    #[test]
    fn test_name_prefix_invalid() {
        assert!(NamePrefix::new("").is_err());
        assert!(NamePrefix::new("Bench").is_err());
        assert!(NamePrefix::new("bench_run").is_err());
        assert!(NamePrefix::new("a".repeat(33)).is_err());
    }

    #[test]
    fn test_scoped_names_are_disjoint_per_topology() {
        let prefix = NamePrefix::new("bench").unwrap();
        assert_eq!(prefix.scoped(Topology::Function, "role"), "bench-function-role");
        assert_eq!(prefix.scoped(Topology::Service, "role"), "bench-service-role");
    }

    #[test]
    fn test_test_window_rejects_inverted() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 5, 0).unwrap();
        assert!(TestWindow::new(t0, t1).is_ok());
        assert!(TestWindow::new(t1, t0).is_err());
        assert!(TestWindow::new(t0, t0).is_err());
    }

    #[test]
    fn test_test_window_serializes_documented_keys() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 5, 0).unwrap();
        let window = TestWindow::new(t0, t1).unwrap();
        let json = serde_json::to_string(&window).unwrap();
        assert!(json.contains("start_time"));
        assert!(json.contains("end_time"));
    }

    #[test]
    fn test_resource_kind_file_names_unique() {
        let mut seen = std::collections::HashSet::new();
        for kind in ResourceKind::all() {
            assert!(seen.insert(kind.file_name()), "duplicate: {}", kind);
        }
    }
}

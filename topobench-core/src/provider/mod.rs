// SPDX-License-Identifier: Apache-2.0

//! Vendor-neutral cloud provider abstraction.
//!
//! The orchestrator stages are generic over [`CloudProvider`], which exposes
//! the primitives the four stages need: image pipeline, identity, compute,
//! network assembly, teardown, orphan discovery, and the monitoring/cost
//! query backends. A vendor integration implements this trait against its
//! SDK; the bundled [`memory::InMemoryProvider`] is a deterministic
//! in-process implementation used for rehearsal runs and tests.

pub mod memory;

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::types::MetricSample;

pub use memory::InMemoryProvider;

/// Health check attached to the load balancer's target group. Points at the
/// workload's documented health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    pub path: String,
    pub interval_seconds: u32,
    pub timeout_seconds: u32,
    pub healthy_threshold: u32,
}

/// Target-tracking autoscaling attachment for a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalingSpec {
    pub target_cpu_percent: f64,
    pub scale_out_cooldown_seconds: u64,
    pub scale_in_cooldown_seconds: u64,
    pub min_tasks: u32,
    pub max_tasks: u32,
}

/// An HTTP routing layer in front of a function.
#[derive(Debug, Clone)]
pub struct RouteEndpoint {
    pub route_id: String,
    pub url: String,
}

/// A created load balancer and its public endpoint.
#[derive(Debug, Clone)]
pub struct LoadBalancerEndpoint {
    pub load_balancer_id: String,
    pub url: String,
}

/// Statistic requested from the monitoring backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    Average,
    Sum,
    Maximum,
}

/// A monitoring backend query:
/// `(namespace, metric, dimensions, window, period, statistic) -> series`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricQuery {
    pub namespace: String,
    pub metric: String,
    pub dimensions: Vec<(String, String)>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub period_seconds: u32,
    pub statistic: Statistic,
}

/// Raw response from the monitoring backend; persisted verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSeries {
    pub namespace: String,
    pub metric: String,
    pub statistic: Statistic,
    pub period_seconds: u32,
    pub datapoints: Vec<MetricSample>,
}

/// Cost backend query. Granularity is always daily; billing data is
/// reported per-day, never per-invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub service_filter: String,
}

/// One daily cost row, grouped by service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRow {
    pub date: NaiveDate,
    pub service: String,
    pub amount_usd: f64,
}

type Result<T> = std::result::Result<T, ProviderError>;

/// The vendor-neutral provisioning/teardown/query surface.
///
/// Creation methods return the created resource's identifier. Deletion
/// methods return `ProviderError::NotFound` for already-gone resources so
/// callers can distinguish "skipped" from real failures.
#[allow(async_fn_in_trait)]
pub trait CloudProvider {
    // --- image pipeline ---------------------------------------------------
    async fn create_repository(&self, name: &str) -> Result<String>;
    /// Delegated container build + push; returns the pushed image reference.
    async fn build_and_push_image(&self, repository: &str, build_context: &Path)
        -> Result<String>;
    async fn delete_repository(&self, id: &str) -> Result<()>;

    // --- identity ---------------------------------------------------------
    async fn create_execution_role(&self, name: &str) -> Result<String>;
    async fn attach_execution_policy(&self, role: &str) -> Result<()>;
    /// Role visibility to the compute service is eventually consistent;
    /// callers poll this instead of sleeping a fixed interval.
    async fn role_is_visible(&self, role: &str) -> bool;
    async fn detach_execution_policy(&self, role: &str) -> Result<()>;
    async fn delete_execution_role(&self, id: &str) -> Result<()>;

    // --- logging ----------------------------------------------------------
    async fn create_log_group(&self, name: &str) -> Result<String>;
    async fn delete_log_group(&self, id: &str) -> Result<()>;

    // --- function topology ------------------------------------------------
    async fn create_function(
        &self,
        name: &str,
        image: &str,
        role: &str,
        env: &HashMap<String, String>,
    ) -> Result<String>;
    async fn create_http_route(&self, name: &str, function: &str) -> Result<RouteEndpoint>;
    /// Grant invoke permission scoped to the given route identifier, never
    /// a wildcard. Returns the permission identifier.
    async fn grant_invoke(&self, function: &str, route_id: &str) -> Result<String>;
    async fn revoke_invoke(&self, id: &str) -> Result<()>;
    async fn delete_http_route(&self, id: &str) -> Result<()>;
    async fn delete_function(&self, id: &str) -> Result<()>;

    // --- network ----------------------------------------------------------
    async fn create_vpc(&self, cidr: &str) -> Result<String>;
    async fn enable_dns(&self, vpc: &str) -> Result<()>;
    async fn create_subnet(&self, vpc: &str, availability_zone: &str, cidr: &str)
        -> Result<String>;
    async fn create_internet_gateway(&self) -> Result<String>;
    async fn attach_internet_gateway(&self, vpc: &str, gateway: &str) -> Result<()>;
    async fn create_route_table(&self, vpc: &str) -> Result<String>;
    async fn add_default_route(&self, route_table: &str, gateway: &str) -> Result<()>;
    async fn associate_route_table(&self, route_table: &str, subnet: &str) -> Result<()>;
    async fn enable_public_ip(&self, subnet: &str) -> Result<()>;
    async fn create_security_group(&self, vpc: &str, ingress_port: u16) -> Result<String>;
    async fn detach_internet_gateway(&self, vpc: &str, gateway: &str) -> Result<()>;
    async fn delete_internet_gateway(&self, id: &str) -> Result<()>;
    async fn delete_subnet(&self, id: &str) -> Result<()>;
    async fn delete_route_table(&self, id: &str) -> Result<()>;
    async fn delete_security_group(&self, id: &str) -> Result<()>;
    async fn delete_vpc(&self, id: &str) -> Result<()>;

    // --- service topology ---------------------------------------------
    async fn create_cluster(&self, name: &str) -> Result<String>;
    async fn create_target_group(
        &self,
        vpc: &str,
        port: u16,
        health: &HealthCheckSpec,
    ) -> Result<String>;
    async fn create_load_balancer(
        &self,
        name: &str,
        subnets: &[String],
        security_group: &str,
    ) -> Result<LoadBalancerEndpoint>;
    async fn create_listener(
        &self,
        load_balancer: &str,
        target_group: &str,
        port: u16,
    ) -> Result<String>;
    /// Load balancer provisioning state is observable; poll this before use.
    async fn load_balancer_is_active(&self, id: &str) -> bool;
    /// Deletion finalization is also observable.
    async fn load_balancer_is_deleted(&self, id: &str) -> bool;
    #[allow(clippy::too_many_arguments)]
    async fn create_service(
        &self,
        cluster: &str,
        name: &str,
        image: &str,
        role: &str,
        subnets: &[String],
        security_group: &str,
        target_group: &str,
        env: &HashMap<String, String>,
    ) -> Result<String>;
    async fn attach_autoscaling(
        &self,
        cluster: &str,
        service: &str,
        spec: &AutoscalingSpec,
    ) -> Result<String>;
    async fn scale_service(&self, cluster: &str, service: &str, desired: u32) -> Result<()>;
    async fn running_task_count(&self, cluster: &str, service: &str) -> Result<u32>;
    async fn delete_service(&self, cluster: &str, service: &str) -> Result<()>;
    async fn delete_cluster(&self, id: &str) -> Result<()>;
    async fn delete_load_balancer(&self, id: &str) -> Result<()>;
    async fn delete_listener(&self, id: &str) -> Result<()>;
    async fn delete_target_group(&self, id: &str) -> Result<()>;
    async fn delete_autoscaling_policy(&self, id: &str) -> Result<()>;

    // --- orphan discovery (direct query, not ledger-driven) ----------------
    /// Network interfaces still attached to the owned network. The compute
    /// service detaches from these asynchronously and frequently leaks them.
    async fn list_network_interfaces(&self, vpc: &str) -> Result<Vec<String>>;
    async fn delete_network_interface(&self, id: &str) -> Result<()>;
    async fn list_unattached_addresses(&self, vpc: &str) -> Result<Vec<String>>;
    async fn release_address(&self, id: &str) -> Result<()>;

    // --- observability backends --------------------------------------------
    async fn query_metrics(&self, query: &MetricQuery) -> Result<MetricSeries>;
    async fn query_costs(&self, query: &CostQuery) -> Result<Vec<CostRow>>;
}

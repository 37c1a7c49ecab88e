// SPDX-License-Identifier: Apache-2.0

//! Deterministic in-process provider.
//!
//! Models the provisioning surface faithfully enough to rehearse a full
//! run: eventual consistency (roles become visible and load balancers
//! become active only after a configurable number of polls), metric
//! backends that return empty before data lands, and the compute service's
//! habit of leaking network interfaces and addresses into the owned
//! network. Tests inject per-operation failures to exercise the
//! partial-failure paths.

use std::collections::HashMap;
use std::path::Path;

use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::types::MetricSample;

use super::{
    AutoscalingSpec, CloudProvider, CostQuery, CostRow, HealthCheckSpec, LoadBalancerEndpoint,
    MetricQuery, MetricSeries, RouteEndpoint,
};

type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, Clone)]
struct ResourceEntry {
    class: &'static str,
    /// Owning network, for resources scoped to a VPC.
    vpc: Option<String>,
}

#[derive(Debug, Clone)]
struct PermissionEntry {
    function: String,
    /// Identifier the permission is scoped to - a specific route, never `*`.
    scope: String,
}

/// In-memory [`CloudProvider`] implementation.
#[derive(Debug)]
pub struct InMemoryProvider {
    endpoint_base: String,
    role_visible_after: u32,
    lb_active_after: u32,
    empty_metric_responses: u32,
    resources: DashMap<String, ResourceEntry>,
    permissions: DashMap<String, PermissionEntry>,
    health_checks: DashMap<String, HealthCheckSpec>,
    poll_counts: DashMap<String, u32>,
    metric_query_counts: DashMap<String, u32>,
    task_counts: DashMap<String, u32>,
    fail_ops: DashMap<&'static str, String>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            endpoint_base: "http://127.0.0.1:8080".to_string(),
            role_visible_after: 2,
            lb_active_after: 2,
            empty_metric_responses: 0,
            resources: DashMap::new(),
            permissions: DashMap::new(),
            health_checks: DashMap::new(),
            poll_counts: DashMap::new(),
            metric_query_counts: DashMap::new(),
            task_counts: DashMap::new(),
            fail_ops: DashMap::new(),
        }
    }

    /// Base URL returned for both topologies' endpoints. Tests point this
    /// at a stub workload server.
    pub fn with_endpoint_base(mut self, base: impl Into<String>) -> Self {
        self.endpoint_base = base.into();
        self
    }

    /// Number of visibility polls before a created role becomes usable.
    pub fn with_role_visible_after(mut self, polls: u32) -> Self {
        self.role_visible_after = polls;
        self
    }

    /// Number of state polls before a load balancer reports active.
    pub fn with_lb_active_after(mut self, polls: u32) -> Self {
        self.lb_active_after = polls;
        self
    }

    /// Number of empty responses each metric query returns before data
    /// becomes available.
    pub fn with_empty_metric_responses(mut self, responses: u32) -> Self {
        self.empty_metric_responses = responses;
        self
    }

    /// Make the named operation fail until cleared.
    pub fn fail_operation(&self, operation: &'static str, message: impl Into<String>) {
        self.fail_ops.insert(operation, message.into());
    }

    pub fn clear_failure(&self, operation: &'static str) {
        self.fail_ops.remove(operation);
    }

    /// Whether a minted identifier still exists.
    pub fn exists(&self, id: &str) -> bool {
        self.resources.contains_key(id) || self.permissions.contains_key(id)
    }

    /// Total live resources (permissions excluded).
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// The identifier an invoke permission is scoped to.
    pub fn permission_scope(&self, permission_id: &str) -> Option<String> {
        self.permissions
            .get(permission_id)
            .map(|p| p.scope.clone())
    }

    /// The function an invoke permission was granted for.
    pub fn permission_function(&self, permission_id: &str) -> Option<String> {
        self.permissions
            .get(permission_id)
            .map(|p| p.function.clone())
    }

    /// The health check attached to a target group at creation.
    pub fn target_group_health(&self, target_group: &str) -> Option<HealthCheckSpec> {
        self.health_checks
            .get(target_group)
            .map(|h| h.clone())
    }

    /// Times each metric (keyed `namespace/metric`) has been queried.
    pub fn metric_query_count(&self, namespace: &str, metric: &str) -> u32 {
        self.metric_query_counts
            .get(&format!("{}/{}", namespace, metric))
            .map(|c| *c)
            .unwrap_or(0)
    }

    fn guard(&self, operation: &'static str) -> Result<()> {
        if let Some(message) = self.fail_ops.get(operation) {
            return Err(ProviderError::Operation {
                operation,
                message: message.clone(),
            });
        }
        Ok(())
    }

    fn mint(&self, class: &'static str, vpc: Option<String>) -> String {
        let id = format!("{}-{}", class, &Uuid::new_v4().simple().to_string()[..12]);
        self.resources
            .insert(id.clone(), ResourceEntry { class, vpc });
        id
    }

    fn require(&self, id: &str) -> Result<ResourceEntry> {
        self.resources
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| ProviderError::NotFound {
                identifier: id.to_string(),
            })
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.resources
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound {
                identifier: id.to_string(),
            })
    }

    fn bump(&self, counter: &DashMap<String, u32>, key: String) -> u32 {
        let mut entry = counter.entry(key).or_insert(0);
        *entry += 1;
        *entry
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudProvider for InMemoryProvider {
    async fn create_repository(&self, _name: &str) -> Result<String> {
        self.guard("create_repository")?;
        Ok(self.mint("repo", None))
    }

    async fn build_and_push_image(
        &self,
        repository: &str,
        _build_context: &Path,
    ) -> Result<String> {
        self.guard("build_and_push_image")?;
        self.require(repository)?;
        Ok(format!("{}:latest", repository))
    }

    async fn delete_repository(&self, id: &str) -> Result<()> {
        self.guard("delete_repository")?;
        self.remove(id)
    }

    async fn create_execution_role(&self, _name: &str) -> Result<String> {
        self.guard("create_execution_role")?;
        Ok(self.mint("role", None))
    }

    async fn attach_execution_policy(&self, role: &str) -> Result<()> {
        self.guard("attach_execution_policy")?;
        self.require(role)?;
        Ok(())
    }

    async fn role_is_visible(&self, role: &str) -> bool {
        if !self.resources.contains_key(role) {
            return false;
        }
        let polls = self.bump(&self.poll_counts, format!("role-visible/{}", role));
        polls >= self.role_visible_after
    }

    async fn detach_execution_policy(&self, role: &str) -> Result<()> {
        self.guard("detach_execution_policy")?;
        self.require(role)?;
        Ok(())
    }

    async fn delete_execution_role(&self, id: &str) -> Result<()> {
        self.guard("delete_execution_role")?;
        self.remove(id)
    }

    async fn create_log_group(&self, _name: &str) -> Result<String> {
        self.guard("create_log_group")?;
        Ok(self.mint("logs", None))
    }

    async fn delete_log_group(&self, id: &str) -> Result<()> {
        self.guard("delete_log_group")?;
        self.remove(id)
    }

    async fn create_function(
        &self,
        _name: &str,
        image: &str,
        role: &str,
        _env: &HashMap<String, String>,
    ) -> Result<String> {
        self.guard("create_function")?;
        self.require(role)?;
        if image.is_empty() {
            return Err(ProviderError::Operation {
                operation: "create_function",
                message: "image reference is empty".to_string(),
            });
        }
        Ok(self.mint("fn", None))
    }

    async fn create_http_route(&self, _name: &str, function: &str) -> Result<RouteEndpoint> {
        self.guard("create_http_route")?;
        self.require(function)?;
        let route_id = self.mint("route", None);
        Ok(RouteEndpoint {
            route_id,
            url: self.endpoint_base.clone(),
        })
    }

    async fn grant_invoke(&self, function: &str, route_id: &str) -> Result<String> {
        self.guard("grant_invoke")?;
        self.require(function)?;
        self.require(route_id)?;
        let id = format!("perm-{}", &Uuid::new_v4().simple().to_string()[..12]);
        self.permissions.insert(
            id.clone(),
            PermissionEntry {
                function: function.to_string(),
                scope: route_id.to_string(),
            },
        );
        Ok(id)
    }

    async fn revoke_invoke(&self, id: &str) -> Result<()> {
        self.guard("revoke_invoke")?;
        self.permissions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound {
                identifier: id.to_string(),
            })
    }

    async fn delete_http_route(&self, id: &str) -> Result<()> {
        self.guard("delete_http_route")?;
        self.remove(id)
    }

    async fn delete_function(&self, id: &str) -> Result<()> {
        self.guard("delete_function")?;
        self.remove(id)
    }

    async fn create_vpc(&self, _cidr: &str) -> Result<String> {
        self.guard("create_vpc")?;
        Ok(self.mint("vpc", None))
    }

    async fn enable_dns(&self, vpc: &str) -> Result<()> {
        self.guard("enable_dns")?;
        self.require(vpc)?;
        Ok(())
    }

    async fn create_subnet(&self, vpc: &str, _availability_zone: &str, _cidr: &str) -> Result<String> {
        self.guard("create_subnet")?;
        self.require(vpc)?;
        Ok(self.mint("subnet", Some(vpc.to_string())))
    }

    async fn create_internet_gateway(&self) -> Result<String> {
        self.guard("create_internet_gateway")?;
        Ok(self.mint("igw", None))
    }

    async fn attach_internet_gateway(&self, vpc: &str, gateway: &str) -> Result<()> {
        self.guard("attach_internet_gateway")?;
        self.require(vpc)?;
        self.require(gateway)?;
        Ok(())
    }

    async fn create_route_table(&self, vpc: &str) -> Result<String> {
        self.guard("create_route_table")?;
        self.require(vpc)?;
        Ok(self.mint("rtb", Some(vpc.to_string())))
    }

    async fn add_default_route(&self, route_table: &str, gateway: &str) -> Result<()> {
        self.guard("add_default_route")?;
        self.require(route_table)?;
        self.require(gateway)?;
        Ok(())
    }

    async fn associate_route_table(&self, route_table: &str, subnet: &str) -> Result<()> {
        self.guard("associate_route_table")?;
        self.require(route_table)?;
        self.require(subnet)?;
        Ok(())
    }

    async fn enable_public_ip(&self, subnet: &str) -> Result<()> {
        self.guard("enable_public_ip")?;
        self.require(subnet)?;
        Ok(())
    }

    async fn create_security_group(&self, vpc: &str, _ingress_port: u16) -> Result<String> {
        self.guard("create_security_group")?;
        self.require(vpc)?;
        Ok(self.mint("sg", Some(vpc.to_string())))
    }

    async fn detach_internet_gateway(&self, vpc: &str, gateway: &str) -> Result<()> {
        self.guard("detach_internet_gateway")?;
        self.require(vpc)?;
        self.require(gateway)?;
        Ok(())
    }

    async fn delete_internet_gateway(&self, id: &str) -> Result<()> {
        self.guard("delete_internet_gateway")?;
        self.remove(id)
    }

    async fn delete_subnet(&self, id: &str) -> Result<()> {
        self.guard("delete_subnet")?;
        self.remove(id)
    }

    async fn delete_route_table(&self, id: &str) -> Result<()> {
        self.guard("delete_route_table")?;
        self.remove(id)
    }

    async fn delete_security_group(&self, id: &str) -> Result<()> {
        self.guard("delete_security_group")?;
        self.remove(id)
    }

    async fn delete_vpc(&self, id: &str) -> Result<()> {
        self.guard("delete_vpc")?;
        self.remove(id)
    }

    async fn create_cluster(&self, _name: &str) -> Result<String> {
        self.guard("create_cluster")?;
        Ok(self.mint("cluster", None))
    }

    async fn create_target_group(
        &self,
        vpc: &str,
        _port: u16,
        health: &HealthCheckSpec,
    ) -> Result<String> {
        self.guard("create_target_group")?;
        self.require(vpc)?;
        let id = self.mint("tg", Some(vpc.to_string()));
        self.health_checks.insert(id.clone(), health.clone());
        Ok(id)
    }

    async fn create_load_balancer(
        &self,
        _name: &str,
        subnets: &[String],
        security_group: &str,
    ) -> Result<LoadBalancerEndpoint> {
        self.guard("create_load_balancer")?;
        self.require(security_group)?;
        let vpc = subnets
            .first()
            .and_then(|s| self.resources.get(s))
            .and_then(|e| e.vpc.clone());
        // LB provisioning allocates an address that lingers after deletion.
        self.mint("address", vpc.clone());
        let load_balancer_id = self.mint("lb", vpc);
        Ok(LoadBalancerEndpoint {
            load_balancer_id,
            url: self.endpoint_base.clone(),
        })
    }

    async fn create_listener(
        &self,
        load_balancer: &str,
        target_group: &str,
        _port: u16,
    ) -> Result<String> {
        self.guard("create_listener")?;
        self.require(load_balancer)?;
        self.require(target_group)?;
        Ok(self.mint("listener", None))
    }

    async fn load_balancer_is_active(&self, id: &str) -> bool {
        if !self.resources.contains_key(id) {
            return false;
        }
        let polls = self.bump(&self.poll_counts, format!("lb-active/{}", id));
        polls >= self.lb_active_after
    }

    async fn load_balancer_is_deleted(&self, id: &str) -> bool {
        !self.resources.contains_key(id)
    }

    async fn create_service(
        &self,
        cluster: &str,
        _name: &str,
        image: &str,
        role: &str,
        subnets: &[String],
        security_group: &str,
        target_group: &str,
        _env: &HashMap<String, String>,
    ) -> Result<String> {
        self.guard("create_service")?;
        self.require(cluster)?;
        self.require(role)?;
        self.require(security_group)?;
        self.require(target_group)?;
        if image.is_empty() {
            return Err(ProviderError::Operation {
                operation: "create_service",
                message: "image reference is empty".to_string(),
            });
        }
        let vpc = subnets
            .first()
            .and_then(|s| self.resources.get(s))
            .and_then(|e| e.vpc.clone());
        // Task placement attaches interfaces the service will not clean up
        // itself - the orphan sweep exists because of these.
        self.mint("eni", vpc.clone());
        self.mint("eni", vpc);
        let id = self.mint("service", None);
        self.task_counts
            .insert(format!("{}/{}", cluster, id), 1);
        Ok(id)
    }

    async fn attach_autoscaling(
        &self,
        cluster: &str,
        service: &str,
        _spec: &AutoscalingSpec,
    ) -> Result<String> {
        self.guard("attach_autoscaling")?;
        self.require(cluster)?;
        self.require(service)?;
        Ok(self.mint("scaling-policy", None))
    }

    async fn scale_service(&self, cluster: &str, service: &str, desired: u32) -> Result<()> {
        self.guard("scale_service")?;
        self.require(service)?;
        self.task_counts
            .insert(format!("{}/{}", cluster, service), desired);
        Ok(())
    }

    async fn running_task_count(&self, cluster: &str, service: &str) -> Result<u32> {
        Ok(self
            .task_counts
            .get(&format!("{}/{}", cluster, service))
            .map(|c| *c)
            .unwrap_or(0))
    }

    async fn delete_service(&self, cluster: &str, service: &str) -> Result<()> {
        self.guard("delete_service")?;
        self.task_counts.remove(&format!("{}/{}", cluster, service));
        self.remove(service)
    }

    async fn delete_cluster(&self, id: &str) -> Result<()> {
        self.guard("delete_cluster")?;
        self.remove(id)
    }

    async fn delete_load_balancer(&self, id: &str) -> Result<()> {
        self.guard("delete_load_balancer")?;
        self.remove(id)
    }

    async fn delete_listener(&self, id: &str) -> Result<()> {
        self.guard("delete_listener")?;
        self.remove(id)
    }

    async fn delete_target_group(&self, id: &str) -> Result<()> {
        self.guard("delete_target_group")?;
        self.health_checks.remove(id);
        self.remove(id)
    }

    async fn delete_autoscaling_policy(&self, id: &str) -> Result<()> {
        self.guard("delete_autoscaling_policy")?;
        self.remove(id)
    }

    async fn list_network_interfaces(&self, vpc: &str) -> Result<Vec<String>> {
        self.guard("list_network_interfaces")?;
        Ok(self
            .resources
            .iter()
            .filter(|e| e.class == "eni" && e.vpc.as_deref() == Some(vpc))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn delete_network_interface(&self, id: &str) -> Result<()> {
        self.guard("delete_network_interface")?;
        self.remove(id)
    }

    async fn list_unattached_addresses(&self, vpc: &str) -> Result<Vec<String>> {
        self.guard("list_unattached_addresses")?;
        Ok(self
            .resources
            .iter()
            .filter(|e| e.class == "address" && e.vpc.as_deref() == Some(vpc))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn release_address(&self, id: &str) -> Result<()> {
        self.guard("release_address")?;
        self.remove(id)
    }

    async fn query_metrics(&self, query: &MetricQuery) -> Result<MetricSeries> {
        self.guard("query_metrics")?;
        let key = format!("{}/{}", query.namespace, query.metric);
        let calls = self.bump(&self.metric_query_counts, key);

        let datapoints = if calls <= self.empty_metric_responses {
            Vec::new()
        } else {
            let period = ChronoDuration::seconds(query.period_seconds as i64);
            let mut points = Vec::new();
            let mut ts = query.start;
            let mut k = 0u32;
            while ts < query.end {
                points.push(MetricSample {
                    timestamp: ts,
                    value: 40.0 + k as f64,
                });
                ts = ts + period;
                k += 1;
            }
            points
        };

        Ok(MetricSeries {
            namespace: query.namespace.clone(),
            metric: query.metric.clone(),
            statistic: query.statistic,
            period_seconds: query.period_seconds,
            datapoints,
        })
    }

    async fn query_costs(&self, query: &CostQuery) -> Result<Vec<CostRow>> {
        self.guard("query_costs")?;
        let mut rows = Vec::new();
        let mut date = query.start_date;
        while date < query.end_date {
            rows.push(CostRow {
                date,
                service: query.service_filter.clone(),
                amount_usd: 0.37,
            });
            date = date + ChronoDuration::days(1);
        }
        Ok(rows)
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Provisioning stage: stands up both topologies.
//!
//! Every created identifier is written to the ledger before the next step
//! runs, so a failure at step k leaves records for steps 1..k-1 exactly.
//! There is no rollback here; cleanup is the decommissioner's job, driven
//! by whatever the ledger holds.

use tracing::info;

use crate::config::BenchConfig;
use crate::error::{ProviderError, ProvisionError};
use crate::ledger::Ledger;
use crate::provider::{AutoscalingSpec, CloudProvider, HealthCheckSpec};
use crate::types::{ResourceKind, ResourceRecord, Topology};
use crate::wait::poll_until;

const VPC_CIDR: &str = "10.0.0.0/16";

/// Stands up the function and service topologies, recording everything.
pub struct Provisioner<'a, P: CloudProvider> {
    provider: &'a P,
    ledger: &'a Ledger,
    config: &'a BenchConfig,
}

impl<'a, P: CloudProvider> Provisioner<'a, P> {
    pub fn new(provider: &'a P, ledger: &'a Ledger, config: &'a BenchConfig) -> Self {
        Self {
            provider,
            ledger,
            config,
        }
    }

    /// Provision both topologies: function first, then service.
    pub async fn provision_all(&self) -> Result<(), ProvisionError> {
        self.provision_function_topology().await?;
        self.provision_service_topology().await
    }

    /// Function-invocation topology: image pipeline, role, log group,
    /// function, HTTP route, invoke permission.
    pub async fn provision_function_topology(&self) -> Result<(), ProvisionError> {
        let stage = "function";
        let topology = Topology::Function;
        info!(topology = %topology, "provisioning function topology");

        let repo = self
            .create(stage, ResourceKind::FunctionRepository, async {
                self.provider
                    .create_repository(&self.config.name_prefix.scoped(topology, "repo"))
                    .await
            })
            .await?;

        let image = self
            .create(stage, ResourceKind::FunctionImage, async {
                self.provider
                    .build_and_push_image(&repo, &self.config.workload.build_context)
                    .await
            })
            .await?;

        let role = self.provision_role(stage, topology).await?;

        let _logs = self
            .create(stage, ResourceKind::FunctionLogGroup, async {
                self.provider
                    .create_log_group(&self.config.name_prefix.scoped(topology, "logs"))
                    .await
            })
            .await?;

        let function = self
            .create(stage, ResourceKind::Function, async {
                self.provider
                    .create_function(
                        &self.config.name_prefix.scoped(topology, "fn"),
                        &image,
                        &role,
                        &self.config.workload_env(),
                    )
                    .await
            })
            .await?;

        let route = self
            .provider
            .create_http_route(&self.config.name_prefix.scoped(topology, "api"), &function)
            .await
            .map_err(|e| ProvisionError::Provider {
                stage,
                kind: ResourceKind::HttpRoute,
                source: e,
            })?;
        self.save(stage, ResourceKind::HttpRoute, &route.route_id)?;
        self.save(stage, ResourceKind::FunctionEndpoint, &route.url)?;

        // Permission bound to this route only, never a wildcard.
        self.create(stage, ResourceKind::InvokePermission, async {
            self.provider.grant_invoke(&function, &route.route_id).await
        })
        .await?;

        info!(topology = %topology, endpoint = %route.url, "function topology ready");
        Ok(())
    }

    /// Load-balanced service topology: image pipeline, role, log group,
    /// full network, then cluster, target group, load balancer, listener,
    /// service, autoscaling.
    pub async fn provision_service_topology(&self) -> Result<(), ProvisionError> {
        let stage = "service";
        let topology = Topology::Service;
        info!(topology = %topology, "provisioning service topology");

        let repo = self
            .create(stage, ResourceKind::ServiceRepository, async {
                self.provider
                    .create_repository(&self.config.name_prefix.scoped(topology, "repo"))
                    .await
            })
            .await?;

        let image = self
            .create(stage, ResourceKind::ServiceImage, async {
                self.provider
                    .build_and_push_image(&repo, &self.config.workload.build_context)
                    .await
            })
            .await?;

        let role = self.provision_role(stage, topology).await?;

        let _logs = self
            .create(stage, ResourceKind::ServiceLogGroup, async {
                self.provider
                    .create_log_group(&self.config.name_prefix.scoped(topology, "logs"))
                    .await
            })
            .await?;

        let (subnets, security_group, vpc) = self.provision_network(stage).await?;

        let cluster = self
            .create(stage, ResourceKind::Cluster, async {
                self.provider
                    .create_cluster(&self.config.name_prefix.scoped(topology, "cluster"))
                    .await
            })
            .await?;

        let health = HealthCheckSpec {
            path: self.config.workload.health_path.clone(),
            interval_seconds: self.config.workload.health_interval_seconds,
            timeout_seconds: self.config.workload.health_timeout_seconds,
            healthy_threshold: self.config.workload.healthy_threshold,
        };
        let target_group = self
            .create(stage, ResourceKind::TargetGroup, async {
                self.provider
                    .create_target_group(&vpc, self.config.workload.port, &health)
                    .await
            })
            .await?;

        let lb = self
            .provider
            .create_load_balancer(
                &self.config.name_prefix.scoped(topology, "lb"),
                &subnets,
                &security_group,
            )
            .await
            .map_err(|e| ProvisionError::Provider {
                stage,
                kind: ResourceKind::LoadBalancer,
                source: e,
            })?;
        self.save(stage, ResourceKind::LoadBalancer, &lb.load_balancer_id)?;
        self.save(stage, ResourceKind::ServiceEndpoint, &lb.url)?;

        self.create(stage, ResourceKind::Listener, async {
            self.provider
                .create_listener(&lb.load_balancer_id, &target_group, self.config.workload.port)
                .await
        })
        .await?;

        poll_until(
            "load balancer active",
            self.config.waits.lb_active_timeout,
            self.config.waits.poll_interval,
            || self.provider.load_balancer_is_active(&lb.load_balancer_id),
        )
        .await
        .map_err(|e| ProvisionError::Wait { stage, source: e })?;

        let service = self
            .create(stage, ResourceKind::Service, async {
                self.provider
                    .create_service(
                        &cluster,
                        &self.config.name_prefix.scoped(topology, "svc"),
                        &image,
                        &role,
                        &subnets,
                        &security_group,
                        &target_group,
                        &self.config.workload_env(),
                    )
                    .await
            })
            .await?;

        let scaling = AutoscalingSpec {
            target_cpu_percent: self.config.autoscaling.target_cpu_percent,
            scale_out_cooldown_seconds: self.config.autoscaling.scale_out_cooldown.as_secs(),
            scale_in_cooldown_seconds: self.config.autoscaling.scale_in_cooldown.as_secs(),
            min_tasks: self.config.autoscaling.min_tasks,
            max_tasks: self.config.autoscaling.max_tasks,
        };
        self.create(stage, ResourceKind::AutoscalingPolicy, async {
            self.provider
                .attach_autoscaling(&cluster, &service, &scaling)
                .await
        })
        .await?;

        info!(topology = %topology, endpoint = %lb.url, "service topology ready");
        Ok(())
    }

    /// Execution role with its policy, recorded before visibility is
    /// confirmed so a timeout still leaves the role in the ledger.
    async fn provision_role(
        &self,
        stage: &'static str,
        topology: Topology,
    ) -> Result<String, ProvisionError> {
        let kind = match topology {
            Topology::Function => ResourceKind::FunctionRole,
            Topology::Service => ResourceKind::ServiceRole,
        };

        let role = self
            .create(stage, kind, async {
                self.provider
                    .create_execution_role(&self.config.name_prefix.scoped(topology, "role"))
                    .await
            })
            .await?;

        self.provider
            .attach_execution_policy(&role)
            .await
            .map_err(|e| ProvisionError::Provider {
                stage,
                kind,
                source: e,
            })?;

        poll_until(
            "execution role visible",
            self.config.waits.role_visibility_timeout,
            self.config.waits.poll_interval,
            || self.provider.role_is_visible(&role),
        )
        .await
        .map_err(|e| ProvisionError::Wait { stage, source: e })?;

        Ok(role)
    }

    /// Owned network: VPC, one subnet per availability zone, internet
    /// gateway, one route table associated with every subnet, security
    /// group admitting the workload port.
    async fn provision_network(
        &self,
        stage: &'static str,
    ) -> Result<(Vec<String>, String, String), ProvisionError> {
        let vpc = self
            .create(stage, ResourceKind::Vpc, async {
                self.provider.create_vpc(VPC_CIDR).await
            })
            .await?;

        self.provider
            .enable_dns(&vpc)
            .await
            .map_err(|e| ProvisionError::Provider {
                stage,
                kind: ResourceKind::Vpc,
                source: e,
            })?;

        let mut subnets = Vec::with_capacity(self.config.availability_zones.len());
        for (index, zone) in self.config.availability_zones.iter().enumerate() {
            let cidr = format!("10.0.{}.0/24", index);
            let subnet = self
                .create(stage, ResourceKind::Subnet, async {
                    self.provider.create_subnet(&vpc, zone, &cidr).await
                })
                .await?;
            self.provider
                .enable_public_ip(&subnet)
                .await
                .map_err(|e| ProvisionError::Provider {
                    stage,
                    kind: ResourceKind::Subnet,
                    source: e,
                })?;
            subnets.push(subnet);
        }

        let gateway = self
            .create(stage, ResourceKind::InternetGateway, async {
                self.provider.create_internet_gateway().await
            })
            .await?;
        self.provider
            .attach_internet_gateway(&vpc, &gateway)
            .await
            .map_err(|e| ProvisionError::Provider {
                stage,
                kind: ResourceKind::InternetGateway,
                source: e,
            })?;

        let route_table = self
            .create(stage, ResourceKind::RouteTable, async {
                self.provider.create_route_table(&vpc).await
            })
            .await?;
        self.provider
            .add_default_route(&route_table, &gateway)
            .await
            .map_err(|e| ProvisionError::Provider {
                stage,
                kind: ResourceKind::RouteTable,
                source: e,
            })?;
        for subnet in &subnets {
            self.provider
                .associate_route_table(&route_table, subnet)
                .await
                .map_err(|e| ProvisionError::Provider {
                    stage,
                    kind: ResourceKind::RouteTable,
                    source: e,
                })?;
        }

        let security_group = self
            .create(stage, ResourceKind::SecurityGroup, async {
                self.provider
                    .create_security_group(&vpc, self.config.workload.port)
                    .await
            })
            .await?;

        Ok((subnets, security_group, vpc))
    }

    /// Run a creation future, then persist its identifier before returning.
    async fn create<Fut>(
        &self,
        stage: &'static str,
        kind: ResourceKind,
        fut: Fut,
    ) -> Result<String, ProvisionError>
    where
        Fut: std::future::Future<Output = Result<String, ProviderError>>,
    {
        let identifier = fut.await.map_err(|e| ProvisionError::Provider {
            stage,
            kind,
            source: e,
        })?;
        self.save(stage, kind, &identifier)?;
        Ok(identifier)
    }

    fn save(
        &self,
        stage: &'static str,
        kind: ResourceKind,
        identifier: &str,
    ) -> Result<(), ProvisionError> {
        self.ledger
            .record(ResourceRecord::new(kind, identifier))
            .map_err(|e| ProvisionError::Ledger { stage, source: e })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigLoader, EnvSettings};
    use crate::provider::InMemoryProvider;
    use tempfile::TempDir;

    fn test_config() -> BenchConfig {
        let yaml = r#"
name_prefix: bench
availability_zones: ["az-1", "az-2"]
waits:
  role_visibility_timeout_secs: 1
  lb_active_timeout_secs: 1
  task_drain_timeout_secs: 1
  poll_interval_secs: 0
"#;
        let env = EnvSettings {
            datastore_url: "postgres://bench@db/records".to_string(),
            region_override: None,
        };
        ConfigLoader::load_string(yaml, env).unwrap()
    }

    #[tokio::test]
    async fn test_full_provision_records_every_kind() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let provider = InMemoryProvider::new();
        let config = test_config();

        Provisioner::new(&provider, &ledger, &config)
            .provision_all()
            .await
            .unwrap();

        let present = ledger.kinds_present();
        assert_eq!(present.len(), ResourceKind::all().len());
    }

    #[tokio::test]
    async fn test_two_zones_yield_two_subnets_one_route_table() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let provider = InMemoryProvider::new();
        let config = test_config();

        Provisioner::new(&provider, &ledger, &config)
            .provision_service_topology()
            .await
            .unwrap();

        assert_eq!(ledger.get_all(ResourceKind::Subnet).unwrap().len(), 2);
        assert_eq!(ledger.get_all(ResourceKind::RouteTable).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_prior_records_only() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let provider = InMemoryProvider::new();
        provider.fail_operation("create_function", "image pull denied");
        let config = test_config();

        let err = Provisioner::new(&provider, &ledger, &config)
            .provision_function_topology()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Provider {
                kind: ResourceKind::Function,
                ..
            }
        ));

        // Everything before the failing step is in the ledger.
        assert!(ledger.get(ResourceKind::FunctionRepository).unwrap().is_some());
        assert!(ledger.get(ResourceKind::FunctionImage).unwrap().is_some());
        assert!(ledger.get(ResourceKind::FunctionRole).unwrap().is_some());
        assert!(ledger.get(ResourceKind::FunctionLogGroup).unwrap().is_some());
        // Nothing at or after it.
        assert!(ledger.get(ResourceKind::Function).unwrap().is_none());
        assert!(ledger.get(ResourceKind::HttpRoute).unwrap().is_none());
        assert!(ledger.get(ResourceKind::InvokePermission).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invoke_permission_scoped_to_route() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let provider = InMemoryProvider::new();
        let config = test_config();

        Provisioner::new(&provider, &ledger, &config)
            .provision_function_topology()
            .await
            .unwrap();

        let permission = ledger.get(ResourceKind::InvokePermission).unwrap().unwrap();
        let route = ledger.get(ResourceKind::HttpRoute).unwrap().unwrap();
        assert_eq!(
            provider.permission_scope(&permission.identifier).unwrap(),
            route.identifier
        );
    }

    #[tokio::test]
    async fn test_target_group_health_check_comes_from_config() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let provider = InMemoryProvider::new();
        let yaml = r#"
name_prefix: bench
availability_zones: ["az-1", "az-2"]
workload:
  health_path: /status
  health_interval_secs: 15
  health_timeout_secs: 3
  healthy_threshold: 4
waits:
  role_visibility_timeout_secs: 1
  lb_active_timeout_secs: 1
  task_drain_timeout_secs: 1
  poll_interval_secs: 0
"#;
        let env = EnvSettings {
            datastore_url: "postgres://bench@db/records".to_string(),
            region_override: None,
        };
        let config = ConfigLoader::load_string(yaml, env).unwrap();

        Provisioner::new(&provider, &ledger, &config)
            .provision_service_topology()
            .await
            .unwrap();

        let target_group = ledger.get(ResourceKind::TargetGroup).unwrap().unwrap();
        let health = provider.target_group_health(&target_group.identifier).unwrap();
        assert_eq!(health.path, "/status");
        assert_eq!(health.interval_seconds, 15);
        assert_eq!(health.timeout_seconds, 3);
        assert_eq!(health.healthy_threshold, 4);
    }

    #[tokio::test]
    async fn test_role_visibility_timeout_is_wait_error() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let provider = InMemoryProvider::new().with_role_visible_after(u32::MAX);
        let config = test_config();

        let err = Provisioner::new(&provider, &ledger, &config)
            .provision_function_topology()
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Wait { .. }));

        // The role itself was recorded before the wait began.
        assert!(ledger.get(ResourceKind::FunctionRole).unwrap().is_some());
    }
}

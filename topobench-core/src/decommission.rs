// SPDX-License-Identifier: Apache-2.0

//! Teardown stage: best-effort, fail-soft, ledger-driven.
//!
//! Walks the ledger in reverse dependency order. Every deletion is wrapped:
//! a missing resource becomes `Skipped`, any other failure becomes `Failed`
//! and the sequence continues - leaving infrastructure running is costlier
//! than an incomplete log. Nothing here returns an error; the caller gets a
//! [`DecommissionReport`] and decides what to do with it.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::BenchConfig;
use crate::error::ProviderError;
use crate::ledger::Ledger;
use crate::provider::CloudProvider;
use crate::types::{ResourceKind, ResourceRecord};
use crate::wait::poll_until;

/// What happened to one resource the teardown walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Deleted,
    /// Resource absent - no ledger entry, or already gone provider-side.
    Skipped,
    Failed,
}

/// Per-resource teardown result, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceOutcome {
    pub kind: ResourceKind,
    pub identifier: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Aggregate teardown result. The ledger should be cleared only when this
/// is clean.
#[derive(Debug, Serialize)]
pub struct DecommissionReport {
    pub outcomes: Vec<ResourceOutcome>,
    /// Interfaces leaked into the owned network and removed before the
    /// network itself was torn down.
    pub leaked_interfaces_deleted: usize,
}

impl DecommissionReport {
    pub fn deleted(&self) -> usize {
        self.count(Outcome::Deleted)
    }

    pub fn skipped(&self) -> usize {
        self.count(Outcome::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(Outcome::Failed)
    }

    /// No failures. Skips are fine; they are the idempotent case.
    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome == outcome)
            .count()
    }
}

/// Result of the orphan sweep.
#[derive(Debug, Serialize)]
pub struct SweepReport {
    pub interfaces_deleted: usize,
    pub addresses_released: usize,
}

/// Tears down everything the ledger knows about.
pub struct Decommissioner<'a, P: CloudProvider> {
    provider: &'a P,
    ledger: &'a Ledger,
    config: &'a BenchConfig,
}

impl<'a, P: CloudProvider> Decommissioner<'a, P> {
    pub fn new(provider: &'a P, ledger: &'a Ledger, config: &'a BenchConfig) -> Self {
        Self {
            provider,
            ledger,
            config,
        }
    }

    /// Reverse-dependency teardown of both topologies.
    pub async fn decommission(&self) -> DecommissionReport {
        let mut outcomes = Vec::new();

        let cluster = self.identifier(ResourceKind::Cluster);
        let vpc = self.identifier(ResourceKind::Vpc);

        // Service topology compute, newest first.
        for record in self.walk(ResourceKind::AutoscalingPolicy, &mut outcomes) {
            let fut = self.provider.delete_autoscaling_policy(&record.identifier);
            Self::attempt(&mut outcomes, &record, fut).await;
        }
        self.teardown_service(&mut outcomes, cluster.as_deref()).await;
        for record in self.walk(ResourceKind::LoadBalancer, &mut outcomes) {
            self.teardown_load_balancer(&mut outcomes, &record).await;
        }
        for record in self.walk(ResourceKind::Listener, &mut outcomes) {
            let fut = self.provider.delete_listener(&record.identifier);
            Self::attempt(&mut outcomes, &record, fut).await;
        }
        for record in self.walk(ResourceKind::TargetGroup, &mut outcomes) {
            let fut = self.provider.delete_target_group(&record.identifier);
            Self::attempt(&mut outcomes, &record, fut).await;
        }
        for record in self.walk(ResourceKind::Cluster, &mut outcomes) {
            let fut = self.provider.delete_cluster(&record.identifier);
            Self::attempt(&mut outcomes, &record, fut).await;
        }

        // Interfaces leaked into the network block subnet/VPC deletion.
        let leaked_interfaces_deleted = match &vpc {
            Some(vpc) => self.delete_leaked_interfaces(vpc).await,
            None => 0,
        };

        // Network, in reverse of assembly order.
        for record in self.walk(ResourceKind::InternetGateway, &mut outcomes) {
            if let Some(vpc) = &vpc {
                if let Err(e) = self
                    .provider
                    .detach_internet_gateway(vpc, &record.identifier)
                    .await
                {
                    if !e.is_not_found() {
                        warn!(gateway = %record.identifier, error = %e, "gateway detach failed");
                    }
                }
            }
            let fut = self.provider.delete_internet_gateway(&record.identifier);
            Self::attempt(&mut outcomes, &record, fut).await;
        }
        for record in self.walk(ResourceKind::Subnet, &mut outcomes) {
            let fut = self.provider.delete_subnet(&record.identifier);
            Self::attempt(&mut outcomes, &record, fut).await;
        }
        for record in self.walk(ResourceKind::RouteTable, &mut outcomes) {
            let fut = self.provider.delete_route_table(&record.identifier);
            Self::attempt(&mut outcomes, &record, fut).await;
        }
        for record in self.walk(ResourceKind::SecurityGroup, &mut outcomes) {
            let fut = self.provider.delete_security_group(&record.identifier);
            Self::attempt(&mut outcomes, &record, fut).await;
        }
        for record in self.walk(ResourceKind::Vpc, &mut outcomes) {
            let fut = self.provider.delete_vpc(&record.identifier);
            Self::attempt(&mut outcomes, &record, fut).await;
        }

        // Function topology, reverse of creation.
        for record in self.walk(ResourceKind::InvokePermission, &mut outcomes) {
            let fut = self.provider.revoke_invoke(&record.identifier);
            Self::attempt(&mut outcomes, &record, fut).await;
        }
        for record in self.walk(ResourceKind::HttpRoute, &mut outcomes) {
            let fut = self.provider.delete_http_route(&record.identifier);
            Self::attempt(&mut outcomes, &record, fut).await;
        }
        for record in self.walk(ResourceKind::Function, &mut outcomes) {
            let fut = self.provider.delete_function(&record.identifier);
            Self::attempt(&mut outcomes, &record, fut).await;
        }

        // Shared pipeline resources last.
        for kind in [ResourceKind::FunctionRole, ResourceKind::ServiceRole] {
            for record in self.walk(kind, &mut outcomes) {
                if let Err(e) = self
                    .provider
                    .detach_execution_policy(&record.identifier)
                    .await
                {
                    if !e.is_not_found() {
                        warn!(role = %record.identifier, error = %e, "policy detach failed");
                    }
                }
                let fut = self.provider.delete_execution_role(&record.identifier);
                Self::attempt(&mut outcomes, &record, fut).await;
            }
        }
        for kind in [ResourceKind::FunctionLogGroup, ResourceKind::ServiceLogGroup] {
            for record in self.walk(kind, &mut outcomes) {
                let fut = self.provider.delete_log_group(&record.identifier);
                Self::attempt(&mut outcomes, &record, fut).await;
            }
        }
        for kind in [
            ResourceKind::FunctionRepository,
            ResourceKind::ServiceRepository,
        ] {
            for record in self.walk(kind, &mut outcomes) {
                let fut = self.provider.delete_repository(&record.identifier);
                Self::attempt(&mut outcomes, &record, fut).await;
            }
        }

        let report = DecommissionReport {
            outcomes,
            leaked_interfaces_deleted,
        };
        info!(
            deleted = report.deleted(),
            skipped = report.skipped(),
            failed = report.failed(),
            "decommission complete"
        );
        report
    }

    /// Idempotent sweep for resources created as side effects outside the
    /// provisioner's control: leaked interfaces and unattached addresses
    /// in the owned network. Queries the provider directly, re-querying
    /// with a delay because detachment is asynchronous.
    pub async fn sweep_orphans(&self) -> SweepReport {
        let mut report = SweepReport {
            interfaces_deleted: 0,
            addresses_released: 0,
        };

        let Some(vpc) = self.identifier(ResourceKind::Vpc) else {
            return report;
        };

        for pass in 0..self.config.metrics.retry_attempts {
            if pass > 0 {
                tokio::time::sleep(self.config.metrics.retry_base_delay).await;
            }

            let interfaces = match self.provider.list_network_interfaces(&vpc).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, "interface listing failed");
                    Vec::new()
                }
            };
            let addresses = match self.provider.list_unattached_addresses(&vpc).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, "address listing failed");
                    Vec::new()
                }
            };

            if interfaces.is_empty() && addresses.is_empty() {
                break;
            }

            for id in interfaces {
                match self.provider.delete_network_interface(&id).await {
                    Ok(()) => report.interfaces_deleted += 1,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => warn!(interface = %id, error = %e, "interface delete failed"),
                }
            }
            for id in addresses {
                match self.provider.release_address(&id).await {
                    Ok(()) => report.addresses_released += 1,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => warn!(address = %id, error = %e, "address release failed"),
                }
            }
        }

        info!(
            interfaces = report.interfaces_deleted,
            addresses = report.addresses_released,
            "orphan sweep complete"
        );
        report
    }

    /// Scale to zero, wait for tasks to drain, then delete the service.
    async fn teardown_service(&self, outcomes: &mut Vec<ResourceOutcome>, cluster: Option<&str>) {
        for record in self.walk(ResourceKind::Service, outcomes) {
            let Some(cluster) = cluster else {
                outcomes.push(ResourceOutcome {
                    kind: record.kind,
                    identifier: record.identifier.clone(),
                    outcome: Outcome::Skipped,
                    detail: Some("no cluster entry".to_string()),
                });
                continue;
            };

            if let Err(e) = self
                .provider
                .scale_service(cluster, &record.identifier, 0)
                .await
            {
                if !e.is_not_found() {
                    warn!(service = %record.identifier, error = %e, "scale to zero failed");
                }
            }
            let drained = poll_until(
                "service tasks drained",
                self.config.waits.task_drain_timeout,
                self.config.waits.poll_interval,
                || async {
                    matches!(
                        self.provider
                            .running_task_count(cluster, &record.identifier)
                            .await,
                        Ok(0)
                    )
                },
            )
            .await;
            if drained.is_err() {
                warn!(service = %record.identifier, "tasks did not drain in time; deleting anyway");
            }

            let fut = self.provider.delete_service(cluster, &record.identifier);
            Self::attempt(outcomes, &record, fut).await;
        }
    }

    /// Delete the load balancer and wait for the deletion to finalize so
    /// dependent listeners and target groups can be removed.
    async fn teardown_load_balancer(
        &self,
        outcomes: &mut Vec<ResourceOutcome>,
        record: &ResourceRecord,
    ) {
        let fut = self.provider.delete_load_balancer(&record.identifier);
        Self::attempt(outcomes, record, fut).await;

        if matches!(outcomes.last().map(|o| o.outcome), Some(Outcome::Deleted)) {
            let finalized = poll_until(
                "load balancer deletion finalized",
                self.config.waits.lb_active_timeout,
                self.config.waits.poll_interval,
                || self.provider.load_balancer_is_deleted(&record.identifier),
            )
            .await;
            if finalized.is_err() {
                warn!(load_balancer = %record.identifier, "deletion did not finalize in time");
            }
        }
    }

    async fn delete_leaked_interfaces(&self, vpc: &str) -> usize {
        let interfaces = match self.provider.list_network_interfaces(vpc).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "interface listing failed");
                return 0;
            }
        };

        let mut deleted = 0;
        for id in interfaces {
            match self.provider.delete_network_interface(&id).await {
                Ok(()) => deleted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(interface = %id, error = %e, "interface delete failed"),
            }
        }
        deleted
    }

    /// Ledger records for a kind. A kind with nothing recorded still shows
    /// up in the report, as a single skipped entry, so the report always
    /// enumerates everything the teardown covers.
    fn walk(&self, kind: ResourceKind, outcomes: &mut Vec<ResourceOutcome>) -> Vec<ResourceRecord> {
        let records = self.records(kind);
        if records.is_empty() {
            outcomes.push(ResourceOutcome {
                kind,
                identifier: "(absent)".to_string(),
                outcome: Outcome::Skipped,
                detail: Some("no ledger entry".to_string()),
            });
        }
        records
    }

    fn records(&self, kind: ResourceKind) -> Vec<ResourceRecord> {
        match self.ledger.get_all(kind) {
            Ok(records) => records,
            Err(e) => {
                warn!(kind = %kind, error = %e, "ledger read failed; skipping kind");
                Vec::new()
            }
        }
    }

    fn identifier(&self, kind: ResourceKind) -> Option<String> {
        match self.ledger.get(kind) {
            Ok(record) => record.map(|r| r.identifier),
            Err(e) => {
                warn!(kind = %kind, error = %e, "ledger read failed");
                None
            }
        }
    }

    async fn attempt<Fut>(outcomes: &mut Vec<ResourceOutcome>, record: &ResourceRecord, fut: Fut)
    where
        Fut: std::future::Future<Output = Result<(), ProviderError>>,
    {
        let (outcome, detail) = match fut.await {
            Ok(()) => (Outcome::Deleted, None),
            Err(e) if e.is_not_found() => (Outcome::Skipped, Some("not found".to_string())),
            Err(e) => {
                warn!(kind = %record.kind, identifier = %record.identifier, error = %e, "deletion failed");
                (Outcome::Failed, Some(e.to_string()))
            }
        };
        outcomes.push(ResourceOutcome {
            kind: record.kind,
            identifier: record.identifier.clone(),
            outcome,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BenchConfig, ConfigLoader, EnvSettings};
    use crate::provider::InMemoryProvider;
    use crate::provision::Provisioner;
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
metrics:
  retry_attempts: 2
  retry_base_delay_secs: 0
"#;
        let env = EnvSettings {
            datastore_url: "postgres://bench@db/records".to_string(),
            region_override: None,
        };
        ConfigLoader::load_string(yaml, env).unwrap()
    }

    async fn provisioned(
        provider: &InMemoryProvider,
        ledger: &Ledger,
        config: &BenchConfig,
    ) {
        Provisioner::new(provider, ledger, config)
            .provision_all()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_full_teardown_is_clean() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let provider = InMemoryProvider::new();
        let config = test_config();
        provisioned(&provider, &ledger, &config).await;

        let decommissioner = Decommissioner::new(&provider, &ledger, &config);
        let report = decommissioner.decommission().await;

        assert!(report.is_clean());
        assert_eq!(report.failed(), 0);
        assert!(report.deleted() > 0);
        assert_eq!(report.leaked_interfaces_deleted, 2);

        // The unattached address outlives the teardown; the sweep gets it.
        assert_eq!(provider.resource_count(), 1);
        let sweep = decommissioner.sweep_orphans().await;
        assert_eq!(sweep.addresses_released, 1);
        assert_eq!(provider.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_second_run_skips_everything() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let provider = InMemoryProvider::new();
        let config = test_config();
        provisioned(&provider, &ledger, &config).await;

        let decommissioner = Decommissioner::new(&provider, &ledger, &config);
        let first = decommissioner.decommission().await;
        assert!(first.is_clean());

        let second = decommissioner.decommission().await;
        assert!(second.is_clean());
        assert_eq!(second.deleted(), 0);
        assert_eq!(second.skipped(), second.outcomes.len());
    }

    #[tokio::test]
    async fn test_missing_load_balancer_does_not_block_cleanup() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let provider = InMemoryProvider::new();
        provider.fail_operation("create_load_balancer", "quota exceeded");
        let config = test_config();

        let provision = Provisioner::new(&provider, &ledger, &config)
            .provision_all()
            .await;
        assert!(provision.is_err());
        provider.clear_failure("create_load_balancer");

        let report = Decommissioner::new(&provider, &ledger, &config)
            .decommission()
            .await;

        assert!(report.is_clean());
        let vpc_outcome = report
            .outcomes
            .iter()
            .find(|o| o.kind == ResourceKind::Vpc)
            .unwrap();
        assert_eq!(vpc_outcome.outcome, Outcome::Deleted);
        let role_outcome = report
            .outcomes
            .iter()
            .find(|o| o.kind == ResourceKind::ServiceRole)
            .unwrap();
        assert_eq!(role_outcome.outcome, Outcome::Deleted);
        // The load balancer never existed, but it still appears in the
        // report as skipped rather than vanishing from it.
        let lb_outcome = report
            .outcomes
            .iter()
            .find(|o| o.kind == ResourceKind::LoadBalancer)
            .expect("load balancer reported even without a ledger entry");
        assert_eq!(lb_outcome.outcome, Outcome::Skipped);
        assert_eq!(lb_outcome.detail.as_deref(), Some("no ledger entry"));
    }

    #[tokio::test]
    async fn test_failed_deletion_recorded_but_sequence_continues() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let provider = InMemoryProvider::new();
        let config = test_config();
        provisioned(&provider, &ledger, &config).await;

        provider.fail_operation("delete_subnet", "dependency violation");
        let report = Decommissioner::new(&provider, &ledger, &config)
            .decommission()
            .await;

        assert!(!report.is_clean());
        assert_eq!(report.failed(), 2); // both subnets
        // Later steps still ran.
        let repo_outcome = report
            .outcomes
            .iter()
            .find(|o| o.kind == ResourceKind::FunctionRepository)
            .unwrap();
        assert_eq!(repo_outcome.outcome, Outcome::Deleted);
    }

    #[tokio::test]
    async fn test_sweep_without_vpc_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        let provider = InMemoryProvider::new();
        let config = test_config();

        let sweep = Decommissioner::new(&provider, &ledger, &config)
            .sweep_orphans()
            .await;
        assert_eq!(sweep.interfaces_deleted, 0);
        assert_eq!(sweep.addresses_released, 0);
    }
}

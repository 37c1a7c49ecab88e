// SPDX-License-Identifier: Apache-2.0

//! Collection stage: time-correlated metrics and costs.
//!
//! Performance metrics are queried over the persisted [`TestWindow`] at
//! per-minute granularity. Cost rows come from a fixed trailing 30-day
//! window anchored at today's UTC date - billing lags and is reported
//! daily, so the two windows are deliberately different and must never be
//! conflated. Every query is independent: a failure is recorded and the
//! remaining queries still run.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::fmt;
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::config::BenchConfig;
use crate::error::MetricsQueryError;
use crate::ledger::Ledger;
use crate::provider::{CloudProvider, CostQuery, MetricQuery, MetricSeries, Statistic};
use crate::types::{ResourceKind, TestWindow, Topology};
use crate::wait::retry_backoff;

/// Billing granularity is daily and lags by up to two days, so cost
/// queries always cover the trailing 30 days, never the test window.
pub const COST_WINDOW_DAYS: i64 = 30;

struct MetricSpec {
    topology: Topology,
    metric: &'static str,
    slug: &'static str,
    statistic: Statistic,
}

const METRIC_SPECS: &[MetricSpec] = &[
    MetricSpec {
        topology: Topology::Function,
        metric: "Duration",
        slug: "duration",
        statistic: Statistic::Average,
    },
    MetricSpec {
        topology: Topology::Function,
        metric: "Invocations",
        slug: "invocations",
        statistic: Statistic::Sum,
    },
    MetricSpec {
        topology: Topology::Function,
        metric: "Errors",
        slug: "errors",
        statistic: Statistic::Sum,
    },
    MetricSpec {
        topology: Topology::Function,
        metric: "Throttles",
        slug: "throttles",
        statistic: Statistic::Sum,
    },
    MetricSpec {
        topology: Topology::Function,
        metric: "ConcurrentExecutions",
        slug: "concurrent_executions",
        statistic: Statistic::Maximum,
    },
    MetricSpec {
        topology: Topology::Service,
        metric: "CPUUtilization",
        slug: "cpu_utilization",
        statistic: Statistic::Average,
    },
    MetricSpec {
        topology: Topology::Service,
        metric: "MemoryUtilization",
        slug: "memory_utilization",
        statistic: Statistic::Average,
    },
    MetricSpec {
        topology: Topology::Service,
        metric: "RunningTaskCount",
        slug: "running_task_count",
        statistic: Statistic::Maximum,
    },
];

/// What the stage accomplished. Failed queries are carried in the error,
/// not here.
#[derive(Debug)]
pub struct CollectionSummary {
    pub metric_queries: usize,
    pub empty_series: usize,
    pub cost_rows: usize,
}

enum QueryAttempt {
    /// Non-empty response.
    Series(MetricSeries),
    /// Still empty; retried, may be a genuinely quiet metric.
    Empty(MetricSeries),
}

enum AttemptError {
    Empty(MetricSeries),
    Provider(String),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Empty(_) => write!(f, "empty response"),
            AttemptError::Provider(message) => write!(f, "{}", message),
        }
    }
}

/// Queries the monitoring and cost backends and persists raw responses.
pub struct MetricsCollector<'a, P: CloudProvider> {
    provider: &'a P,
    ledger: &'a Ledger,
    artifacts: &'a ArtifactStore,
    config: &'a BenchConfig,
}

impl<'a, P: CloudProvider> MetricsCollector<'a, P> {
    pub fn new(
        provider: &'a P,
        ledger: &'a Ledger,
        artifacts: &'a ArtifactStore,
        config: &'a BenchConfig,
    ) -> Self {
        Self {
            provider,
            ledger,
            artifacts,
            config,
        }
    }

    /// Run every metric and cost query. Raises only after all have been
    /// attempted, naming the ones that failed.
    pub async fn collect(&self) -> Result<CollectionSummary, MetricsQueryError> {
        let window = self
            .ledger
            .load_window()?
            .ok_or(MetricsQueryError::WindowMissing)?;

        let mut attempted = 0usize;
        let mut empty_series = 0usize;
        let mut failed: Vec<String> = Vec::new();

        for spec in METRIC_SPECS {
            attempted += 1;
            let label = format!("{}/{}", spec.topology, spec.metric);
            match self.query_metric(spec, &window).await {
                Ok(outcome) => {
                    let (series, is_empty) = match outcome {
                        QueryAttempt::Series(series) => (series, false),
                        QueryAttempt::Empty(series) => (series, true),
                    };
                    if is_empty {
                        warn!(query = %label, "metric still empty after retries");
                        empty_series += 1;
                    }
                    let name = format!("{}_{}.json", spec.topology, spec.slug);
                    if let Err(e) = self.artifacts.save_json(&name, &series) {
                        warn!(query = %label, error = %e, "failed to persist metric artifact");
                        failed.push(label);
                    }
                }
                Err(message) => {
                    warn!(query = %label, error = %message, "metric query failed");
                    failed.push(label);
                }
            }
        }

        let mut cost_rows = 0usize;
        for topology in [Topology::Function, Topology::Service] {
            attempted += 1;
            let label = format!("{}/costs", topology);
            match self.query_costs(topology).await {
                Ok(rows) => {
                    cost_rows += rows.len();
                    let name = format!("{}_costs.json", topology);
                    if let Err(e) = self.artifacts.save_json(&name, &rows) {
                        warn!(query = %label, error = %e, "failed to persist cost artifact");
                        failed.push(label);
                    }
                }
                Err(message) => {
                    warn!(query = %label, error = %message, "cost query failed");
                    failed.push(label);
                }
            }
        }

        if !failed.is_empty() {
            return Err(MetricsQueryError::QueriesFailed { attempted, failed });
        }

        info!(
            metric_queries = METRIC_SPECS.len(),
            empty_series = empty_series,
            cost_rows = cost_rows,
            "collection complete"
        );
        Ok(CollectionSummary {
            metric_queries: METRIC_SPECS.len(),
            empty_series,
            cost_rows,
        })
    }

    /// One metric query, retried with backoff while the backend returns an
    /// empty series. A final empty result after the retries is accepted.
    async fn query_metric(
        &self,
        spec: &MetricSpec,
        window: &TestWindow,
    ) -> Result<QueryAttempt, String> {
        let query = MetricQuery {
            namespace: spec.topology.metric_namespace().to_string(),
            metric: spec.metric.to_string(),
            dimensions: self.dimensions(spec.topology),
            start: window.start,
            end: window.end,
            period_seconds: self.config.metrics.period_seconds,
            statistic: spec.statistic,
        };
        let label = format!("{}/{}", query.namespace, query.metric);

        let result = retry_backoff(
            &label,
            self.config.metrics.retry_attempts,
            self.config.metrics.retry_base_delay,
            || async {
                match self.provider.query_metrics(&query).await {
                    Ok(series) if series.datapoints.is_empty() => Err(AttemptError::Empty(series)),
                    Ok(series) => Ok(series),
                    Err(e) => Err(AttemptError::Provider(e.to_string())),
                }
            },
        )
        .await;

        match result {
            Ok(series) => Ok(QueryAttempt::Series(series)),
            Err(AttemptError::Empty(series)) => Ok(QueryAttempt::Empty(series)),
            Err(AttemptError::Provider(message)) => Err(message),
        }
    }

    async fn query_costs(&self, topology: Topology) -> Result<Vec<crate::provider::CostRow>, String> {
        let (start_date, end_date) = cost_window(Utc::now().date_naive());
        let query = CostQuery {
            start_date,
            end_date,
            service_filter: topology.cost_service_name().to_string(),
        };
        let label = format!("costs/{}", topology);

        retry_backoff(
            &label,
            self.config.metrics.retry_attempts,
            self.config.metrics.retry_base_delay,
            || async {
                self.provider
                    .query_costs(&query)
                    .await
                    .map_err(|e| e.to_string())
            },
        )
        .await
    }

    /// Dimension pairs scoping a topology's metrics to the provisioned
    /// resources. Absent ledger entries simply yield an unscoped query.
    fn dimensions(&self, topology: Topology) -> Vec<(String, String)> {
        let kinds: &[(&str, ResourceKind)] = match topology {
            Topology::Function => &[("function", ResourceKind::Function)],
            Topology::Service => &[
                ("cluster", ResourceKind::Cluster),
                ("service", ResourceKind::Service),
            ],
        };

        let mut dims = Vec::new();
        for (key, kind) in kinds {
            if let Ok(Some(record)) = self.ledger.get(*kind) {
                dims.push((key.to_string(), record.identifier));
            }
        }
        dims
    }
}

/// The trailing cost window anchored at `today`: `[today - 30d, today)`.
/// Depends only on the calendar date, never on the test window.
pub fn cost_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today - ChronoDuration::days(COST_WINDOW_DAYS), today)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigLoader, EnvSettings};
    use crate::provider::InMemoryProvider;
    use crate::types::ResourceRecord;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn test_config() -> BenchConfig {
        let yaml = r#"
name_prefix: bench
metrics:
  period_seconds: 60
  retry_attempts: 2
  retry_base_delay_secs: 0
"#;
        let env = EnvSettings {
            datastore_url: "postgres://bench@db/records".to_string(),
            region_override: None,
        };
        ConfigLoader::load_string(yaml, env).unwrap()
    }

    fn seed_window(ledger: &Ledger) -> TestWindow {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 1, 10, 10, 0).unwrap();
        let window = TestWindow::new(start, end).unwrap();
        ledger.save_window(&window).unwrap();
        window
    }

    #[tokio::test]
    async fn test_collects_all_metrics_and_costs() {
        let ledger_dir = TempDir::new().unwrap();
        let artifact_dir = TempDir::new().unwrap();
        let ledger = Ledger::open(ledger_dir.path()).unwrap();
        let artifacts = ArtifactStore::new(artifact_dir.path()).unwrap();
        let provider = InMemoryProvider::new();
        let config = test_config();
        seed_window(&ledger);
        ledger
            .record(ResourceRecord::new(ResourceKind::Cluster, "cluster-1"))
            .unwrap();
        ledger
            .record(ResourceRecord::new(ResourceKind::Service, "service-1"))
            .unwrap();

        let collector = MetricsCollector::new(&provider, &ledger, &artifacts, &config);
        let summary = collector.collect().await.unwrap();

        assert_eq!(summary.metric_queries, 8);
        assert_eq!(summary.empty_series, 0);
        assert_eq!(summary.cost_rows, 60); // 30 days x 2 topologies

        let duration: MetricSeries = artifacts.load_json("function_duration.json").unwrap();
        assert_eq!(duration.datapoints.len(), 10);
        let tasks: MetricSeries = artifacts.load_json("service_running_task_count.json").unwrap();
        assert_eq!(tasks.statistic, Statistic::Maximum);
    }

    #[tokio::test]
    async fn test_empty_series_retried_before_accepted() {
        let ledger_dir = TempDir::new().unwrap();
        let artifact_dir = TempDir::new().unwrap();
        let ledger = Ledger::open(ledger_dir.path()).unwrap();
        let artifacts = ArtifactStore::new(artifact_dir.path()).unwrap();
        let provider = InMemoryProvider::new().with_empty_metric_responses(1);
        let config = test_config();
        seed_window(&ledger);

        let collector = MetricsCollector::new(&provider, &ledger, &artifacts, &config);
        let summary = collector.collect().await.unwrap();

        assert_eq!(summary.empty_series, 0);
        // First response was empty, so each metric was queried again.
        assert!(provider.metric_query_count("compute/function", "Duration") >= 2);
    }

    #[tokio::test]
    async fn test_permanently_empty_series_is_not_a_failure() {
        let ledger_dir = TempDir::new().unwrap();
        let artifact_dir = TempDir::new().unwrap();
        let ledger = Ledger::open(ledger_dir.path()).unwrap();
        let artifacts = ArtifactStore::new(artifact_dir.path()).unwrap();
        let provider = InMemoryProvider::new().with_empty_metric_responses(u32::MAX);
        let config = test_config();
        seed_window(&ledger);

        let collector = MetricsCollector::new(&provider, &ledger, &artifacts, &config);
        let summary = collector.collect().await.unwrap();

        assert_eq!(summary.empty_series, 8);
        let duration: MetricSeries = artifacts.load_json("function_duration.json").unwrap();
        assert!(duration.datapoints.is_empty());
    }

    #[tokio::test]
    async fn test_empty_series_accepted_only_after_a_retry() {
        let ledger_dir = TempDir::new().unwrap();
        let artifact_dir = TempDir::new().unwrap();
        let ledger = Ledger::open(ledger_dir.path()).unwrap();
        let artifacts = ArtifactStore::new(artifact_dir.path()).unwrap();
        let provider = InMemoryProvider::new().with_empty_metric_responses(u32::MAX);
        let config = test_config();
        seed_window(&ledger);

        let collector = MetricsCollector::new(&provider, &ledger, &artifacts, &config);
        collector.collect().await.unwrap();

        // retry_attempts: 2 means one query plus one retry; an empty
        // series is never final on the first response alone.
        assert_eq!(provider.metric_query_count("compute/function", "Duration"), 2);
    }

    #[tokio::test]
    async fn test_missing_window_rejected() {
        let ledger_dir = TempDir::new().unwrap();
        let artifact_dir = TempDir::new().unwrap();
        let ledger = Ledger::open(ledger_dir.path()).unwrap();
        let artifacts = ArtifactStore::new(artifact_dir.path()).unwrap();
        let provider = InMemoryProvider::new();
        let config = test_config();

        let collector = MetricsCollector::new(&provider, &ledger, &artifacts, &config);
        let err = collector.collect().await.unwrap_err();
        assert!(matches!(err, MetricsQueryError::WindowMissing));
    }

    #[tokio::test]
    async fn test_failed_queries_reported_after_all_attempted() {
        let ledger_dir = TempDir::new().unwrap();
        let artifact_dir = TempDir::new().unwrap();
        let ledger = Ledger::open(ledger_dir.path()).unwrap();
        let artifacts = ArtifactStore::new(artifact_dir.path()).unwrap();
        let provider = InMemoryProvider::new();
        provider.fail_operation("query_metrics", "backend unavailable");
        let config = test_config();
        seed_window(&ledger);

        let collector = MetricsCollector::new(&provider, &ledger, &artifacts, &config);
        let err = collector.collect().await.unwrap_err();
        match err {
            MetricsQueryError::QueriesFailed { attempted, failed } => {
                assert_eq!(attempted, 10); // 8 metrics + 2 cost queries
                assert_eq!(failed.len(), 8); // cost backend still answered
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_cost_window_is_thirty_days_regardless_of_test_window() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 23).unwrap();
        let (start, end) = cost_window(today);
        assert_eq!(end, today);
        assert_eq!((end - start).num_days(), COST_WINDOW_DAYS);
    }
}

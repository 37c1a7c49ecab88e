// SPDX-License-Identifier: Apache-2.0

//! Test stage: the standardized benchmark protocol.
//!
//! Strictly sequential to keep the two topologies from contending for
//! anything while being measured: cold-start iterations, warm iterations,
//! sustained load against the function endpoint, a cool-down, sustained
//! load against the service endpoint. The resulting [`TestWindow`] brackets
//! the whole protocol and is persisted for the metrics collector. Partial
//! artifacts survive a mid-protocol failure.

use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::artifacts::ArtifactStore;
use crate::config::BenchConfig;
use crate::error::TestExecutionError;
use crate::ledger::Ledger;
use crate::stats::LatencyStats;
use crate::types::{ResourceKind, TestWindow, Topology};
use crate::wait::poll_until;

/// Latency samples for one measured phase, with their summary.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct InvocationReport {
    pub topology: Topology,
    pub phase: String,
    pub samples_ms: Vec<f64>,
    pub stats: LatencyStats,
}

/// Summary of one sustained-load run. The per-request rows live in the
/// companion CSV artifact.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct LoadSummary {
    pub topology: Topology,
    pub concurrency: u32,
    pub duration_secs: u64,
    pub total_requests: usize,
    pub successes: usize,
    pub failures: usize,
    pub stats: LatencyStats,
}

#[derive(Debug, Clone)]
struct RequestRow {
    offset_ms: u64,
    elapsed_ms: f64,
    status: u16,
    success: bool,
}

/// Runs the benchmark protocol against both provisioned endpoints.
pub struct TestRunner<'a> {
    config: &'a BenchConfig,
    ledger: &'a Ledger,
    artifacts: &'a ArtifactStore,
    client: reqwest::Client,
}

impl<'a> TestRunner<'a> {
    pub fn new(config: &'a BenchConfig, ledger: &'a Ledger, artifacts: &'a ArtifactStore) -> Self {
        Self {
            config,
            ledger,
            artifacts,
            client: reqwest::Client::new(),
        }
    }

    /// Execute the full protocol. Returns the window bracketing it.
    pub async fn run(&self) -> Result<TestWindow, TestExecutionError> {
        let function_endpoint = self.endpoint(Topology::Function)?;
        let service_endpoint = self.endpoint(Topology::Service)?;

        info!(settle_secs = self.config.protocol.settle_delay.as_secs(), "settling before first probe");
        tokio::time::sleep(self.config.protocol.settle_delay).await;

        self.health_gate(Topology::Function, &function_endpoint).await?;
        self.health_gate(Topology::Service, &service_endpoint).await?;

        let start = Utc::now();

        let cold = self.measure_cold(&function_endpoint).await?;
        self.save_report(Topology::Function, "cold_start", cold)?;

        let warm = self.measure_warm(&function_endpoint).await?;
        self.save_report(Topology::Function, "warm_start", warm)?;

        self.run_load(Topology::Function, &function_endpoint).await?;

        info!(cooldown_secs = self.config.protocol.cooldown.as_secs(), "cooling down between load tests");
        tokio::time::sleep(self.config.protocol.cooldown).await;

        self.run_load(Topology::Service, &service_endpoint).await?;

        let end = Utc::now();
        let window = TestWindow::new(start, end).map_err(TestExecutionError::Window)?;
        self.ledger.save_window(&window)?;

        info!(start = %window.start, end = %window.end, "test protocol complete");
        Ok(window)
    }

    fn endpoint(&self, topology: Topology) -> Result<String, TestExecutionError> {
        let kind = match topology {
            Topology::Function => ResourceKind::FunctionEndpoint,
            Topology::Service => ResourceKind::ServiceEndpoint,
        };
        self.ledger
            .get(kind)?
            .map(|record| record.identifier)
            .ok_or(TestExecutionError::MissingEndpoint { topology })
    }

    /// Poll the health endpoint until it answers success. A single failed
    /// probe is not a failure; only timeout is.
    async fn health_gate(&self, topology: Topology, base: &str) -> Result<(), TestExecutionError> {
        let url = format!("{}{}", base, self.config.workload.health_path);
        info!(topology = %topology, url = %url, "health gate");

        poll_until(
            "workload healthy",
            self.config.waits.lb_active_timeout,
            self.config.waits.poll_interval,
            || async {
                match self
                    .client
                    .get(&url)
                    .timeout(self.config.protocol.request_timeout)
                    .send()
                    .await
                {
                    Ok(resp) => resp.status().is_success(),
                    Err(_) => false,
                }
            },
        )
        .await
        .map_err(|e| TestExecutionError::HealthCheck {
            topology,
            source: e,
        })
    }

    /// Cold-start iterations: force the platform idle for the configured
    /// window, then measure one invocation, repeated.
    async fn measure_cold(&self, base: &str) -> Result<InvocationReport, TestExecutionError> {
        let url = format!("{}{}", base, self.config.workload.load_path);
        let mut samples = Vec::with_capacity(self.config.protocol.cold_iterations as usize);

        for iteration in 0..self.config.protocol.cold_iterations {
            tokio::time::sleep(self.config.protocol.idle_window).await;
            let elapsed = self.invoke_once(&url, "cold_start", Topology::Function).await?;
            info!(iteration = iteration + 1, elapsed_ms = elapsed, "cold invocation");
            samples.push(elapsed);
        }

        Ok(report(Topology::Function, "cold_start", samples))
    }

    /// Warm iterations: one unmeasured priming call, then short-delay
    /// measured invocations against the already-warm instance.
    async fn measure_warm(&self, base: &str) -> Result<InvocationReport, TestExecutionError> {
        let url = format!("{}{}", base, self.config.workload.load_path);

        self.invoke_once(&url, "warm_priming", Topology::Function).await?;

        let mut samples = Vec::with_capacity(self.config.protocol.warm_iterations as usize);
        for iteration in 0..self.config.protocol.warm_iterations {
            tokio::time::sleep(self.config.protocol.warm_delay).await;
            let elapsed = self.invoke_once(&url, "warm_start", Topology::Function).await?;
            info!(iteration = iteration + 1, elapsed_ms = elapsed, "warm invocation");
            samples.push(elapsed);
        }

        Ok(report(Topology::Function, "warm_start", samples))
    }

    async fn invoke_once(
        &self,
        url: &str,
        phase: &'static str,
        topology: Topology,
    ) -> Result<f64, TestExecutionError> {
        let started = std::time::Instant::now();
        self.client
            .get(url)
            .timeout(self.config.protocol.request_timeout)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| TestExecutionError::Invocation {
                phase,
                topology,
                source: e,
            })?;
        Ok(started.elapsed().as_secs_f64() * 1000.0)
    }

    /// Sustained load: `concurrency` workers hammering the endpoint for
    /// `duration`, every request logged as one CSV row.
    async fn run_load(
        &self,
        topology: Topology,
        base: &str,
    ) -> Result<LoadSummary, TestExecutionError> {
        let url = format!("{}{}", base, self.config.workload.load_path);
        let concurrency = self.config.protocol.load_concurrency;
        let duration = self.config.protocol.load_duration;
        info!(topology = %topology, concurrency = concurrency, duration_secs = duration.as_secs(), "sustained load");

        let started = std::time::Instant::now();
        let deadline = tokio::time::Instant::now() + duration;

        let mut workers = Vec::with_capacity(concurrency as usize);
        for _ in 0..concurrency {
            let client = self.client.clone();
            let url = url.clone();
            let timeout = self.config.protocol.request_timeout;
            workers.push(tokio::spawn(async move {
                let mut rows = Vec::new();
                while tokio::time::Instant::now() < deadline {
                    let request_started = std::time::Instant::now();
                    let outcome = client.get(&url).timeout(timeout).send().await;
                    let elapsed_ms = request_started.elapsed().as_secs_f64() * 1000.0;
                    let (status, success) = match outcome {
                        Ok(resp) => (resp.status().as_u16(), resp.status().is_success()),
                        Err(_) => (0, false),
                    };
                    rows.push(RequestRow {
                        offset_ms: started.elapsed().as_millis() as u64,
                        elapsed_ms,
                        status,
                        success,
                    });
                }
                rows
            }));
        }

        let mut rows = Vec::new();
        for worker in workers {
            match worker.await {
                Ok(worker_rows) => rows.extend(worker_rows),
                // A panicked worker loses its rows but the run continues.
                Err(join_err) => tracing::warn!(error = %join_err, "load worker panicked"),
            }
        }
        rows.sort_by_key(|row| row.offset_ms);

        let summary = LoadSummary {
            topology,
            concurrency,
            duration_secs: duration.as_secs(),
            total_requests: rows.len(),
            successes: rows.iter().filter(|r| r.success).count(),
            failures: rows.iter().filter(|r| !r.success).count(),
            stats: LatencyStats::from_samples(rows.iter().map(|r| r.elapsed_ms).collect()),
        };

        self.artifacts
            .save_raw(&format!("{}_load.csv", topology), &render_csv(&rows))?;
        self.artifacts
            .save_json(&format!("{}_load_summary.json", topology), &summary)?;

        info!(
            topology = %topology,
            requests = summary.total_requests,
            failures = summary.failures,
            mean_ms = summary.stats.mean_ms,
            "load complete"
        );
        Ok(summary)
    }

    fn save_report(
        &self,
        topology: Topology,
        phase: &str,
        report: InvocationReport,
    ) -> Result<(), TestExecutionError> {
        self.artifacts
            .save_json(&format!("{}_{}.json", topology, phase), &report)?;
        Ok(())
    }
}

fn report(topology: Topology, phase: &str, samples_ms: Vec<f64>) -> InvocationReport {
    InvocationReport {
        topology,
        phase: phase.to_string(),
        stats: LatencyStats::from_samples(samples_ms.clone()),
        samples_ms,
    }
}

fn render_csv(rows: &[RequestRow]) -> String {
    let mut out = String::with_capacity(rows.len() * 32 + 40);
    out.push_str("offset_ms,elapsed_ms,status,success\n");
    for row in rows {
        out.push_str(&format!(
            "{},{:.3},{},{}\n",
            row.offset_ms, row.elapsed_ms, row.status, row.success
        ));
    }
    out
}

/// Fixed delays only apply where nothing is observable; exposed so the CLI
/// can report what it is waiting on.
pub fn protocol_duration_lower_bound(config: &BenchConfig) -> Duration {
    let p = &config.protocol;
    p.settle_delay
        + p.idle_window * p.cold_iterations
        + p.warm_delay * p.warm_iterations
        + p.load_duration * 2
        + p.cooldown
}

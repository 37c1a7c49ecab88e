// SPDX-License-Identifier: Apache-2.0

//! Latency statistics for benchmark samples.

use serde::{Deserialize, Serialize};

/// Percentile summary over a set of latency samples (milliseconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub std_dev_ms: f64,
}

impl LatencyStats {
    /// Calculate statistics from raw samples. Empty input yields zeroed
    /// stats rather than NaNs.
    pub fn from_samples(mut samples: Vec<f64>) -> Self {
        if samples.is_empty() {
            return Self {
                count: 0,
                min_ms: 0.0,
                max_ms: 0.0,
                mean_ms: 0.0,
                median_ms: 0.0,
                p95_ms: 0.0,
                p99_ms: 0.0,
                std_dev_ms: 0.0,
            };
        }

        samples.sort_unstable_by(|a, b| a.total_cmp(b));
        let len = samples.len();

        let min_ms = samples[0];
        let max_ms = samples[len - 1];
        let mean_ms = samples.iter().sum::<f64>() / len as f64;
        let median_ms = samples[len / 2];
        let p95_ms = samples[((len as f64 * 0.95) as usize).min(len - 1)];
        let p99_ms = samples[((len as f64 * 0.99) as usize).min(len - 1)];

        let variance = samples
            .iter()
            .map(|&x| {
                let diff = x - mean_ms;
                diff * diff
            })
            .sum::<f64>()
            / len as f64;

        Self {
            count: len,
            min_ms,
            max_ms,
            mean_ms,
            median_ms,
            p95_ms,
            p99_ms,
            std_dev_ms: variance.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_from_samples() {
        let samples: Vec<f64> = (1..=10).map(|n| n as f64 * 100.0).collect();
        let stats = LatencyStats::from_samples(samples);

        assert_eq!(stats.count, 10);
        assert_eq!(stats.min_ms, 100.0);
        assert_eq!(stats.max_ms, 1000.0);
        assert!((stats.mean_ms - 550.0).abs() < 0.01);
        assert_eq!(stats.median_ms, 600.0);
    }

    #[test]
    fn test_empty_samples_are_zeroed() {
        let stats = LatencyStats::from_samples(Vec::new());
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean_ms, 0.0);
        assert!(!stats.std_dev_ms.is_nan());
    }

    #[test]
    fn test_single_sample() {
        let stats = LatencyStats::from_samples(vec![42.0]);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.min_ms, 42.0);
        assert_eq!(stats.p99_ms, 42.0);
        assert_eq!(stats.std_dev_ms, 0.0);
    }
}

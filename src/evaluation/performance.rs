use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::time::Instant;

/// One timed call
#[derive(Debug, Clone, Serialize)]
pub struct CallMetric {
    pub function: String,
    pub timestamp: DateTime<Utc>,
    pub latency_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub total_calls: usize,
    pub latency: LatencyStats,
}

/// Records latencies of monitored calls
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    metrics: Vec<CallMetric>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f`, recording how long it took under `name`
    pub fn measure<R>(&mut self, name: &str, f: impl FnOnce() -> R) -> R {
        let timestamp = Utc::now();
        let start = Instant::now();
        let result = f();
        self.record(name, timestamp, start.elapsed().as_secs_f64());
        result
    }

    pub fn record(&mut self, name: &str, timestamp: DateTime<Utc>, latency_seconds: f64) {
        self.metrics.push(CallMetric {
            function: name.to_string(),
            timestamp,
            latency_seconds,
        });
    }

    pub fn metrics(&self) -> &[CallMetric] {
        &self.metrics
    }

    /// Latency statistics, `None` before any call was measured
    pub fn statistics(&self) -> Option<PerformanceStats> {
        if self.metrics.is_empty() {
            return None;
        }

        let mut latencies: Vec<f64> = self.metrics.iter().map(|m| m.latency_seconds).collect();
        latencies.sort_by(f64::total_cmp);
        let n = latencies.len();
        let max = latencies[n - 1];

        Some(PerformanceStats {
            total_calls: n,
            latency: LatencyStats {
                mean: latencies.iter().sum::<f64>() / n as f64,
                min: latencies[0],
                max,
                p50: latencies[n / 2],
                p95: if n > 20 { latencies[(n as f64 * 0.95) as usize] } else { max },
            },
        })
    }

    /// Write the raw metrics and their statistics as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let report = json!({
            "metrics": self.metrics,
            "statistics": self.statistics(),
        });
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_over_recorded_calls() {
        let mut monitor = PerformanceMonitor::new();
        assert!(monitor.statistics().is_none());

        for latency in [0.3, 0.1, 0.2] {
            monitor.record("search", Utc::now(), latency);
        }
        let stats = monitor.statistics().unwrap();
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.latency.min, 0.1);
        assert_eq!(stats.latency.p50, 0.2);
        assert_eq!(stats.latency.p95, 0.3);
        assert!((stats.latency.mean - 0.2).abs() < 1e-9);
    }

    #[test]
    fn p95_uses_rank_for_large_samples() {
        let mut monitor = PerformanceMonitor::new();
        for i in 1..=40 {
            monitor.record("search", Utc::now(), f64::from(i));
        }
        assert_eq!(monitor.statistics().unwrap().latency.p95, 39.0);
    }

    #[test]
    fn measure_returns_result() {
        let mut monitor = PerformanceMonitor::new();
        assert_eq!(monitor.measure("add", || 2 + 2), 4);
        assert_eq!(monitor.metrics()[0].function, "add");
    }
}

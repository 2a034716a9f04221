// src/stats.rs
//
// Metrics sink: the Prometheus exporter every worker serves on its metrics
// port, plus the local per-test counters the BenchmarkResult is computed
// from. The exporter mirrors what dashboards scrape; the local state exists
// so a worker never has to scrape itself.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use hdrhistogram::Histogram;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Duration;

/// Latency buckets in milliseconds: exponential, base 2, starting at 2 ms.
pub const LATENCY_BUCKETS_MS: [f64; 12] = [
    2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0, 512.0, 1024.0, 2048.0, 4096.0,
];

/// The S3 method an operation maps to, used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    List,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::List => "LIST",
            Method::Delete => "DELETE",
        }
    }
}

/// Starts the Prometheus exporter serving `GET /metrics` on the given port.
pub fn install_exporter(port: u16) -> Result<()> {
    let address = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(address)
        .set_buckets_for_metric(
            Matcher::Full("gosbench_ops_latency".to_string()),
            &LATENCY_BUCKETS_MS,
        )
        .context("configuring latency buckets")?
        .add_global_label("version", env!("CARGO_PKG_VERSION"))
        .install()
        .context("starting the Prometheus exporter")?;
    info!("Prometheus exporter listening on http://{address}/metrics");
    Ok(())
}

/// Per-worker result of one finished test, sent to the coordinator inside
/// `work done` and aggregated there across the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub test_name: String,
    pub operations: f64,
    pub bytes: f64,
    /// Bytes per second of runtime.
    pub bandwidth: f64,
    /// Mean operation latency in milliseconds.
    pub latency_avg: f64,
    pub duration: Duration,
}

/// Concurrency-safe per-test accounting. Every parallel client records into
/// the same instance; `to_result` folds it into a BenchmarkResult at the end.
pub struct TestStats {
    test_name: String,
    finished_ops: AtomicU64,
    failed_ops: AtomicU64,
    uploaded_bytes: AtomicU64,
    downloaded_bytes: AtomicU64,
    latency_us: Mutex<Histogram<u64>>,
}

impl TestStats {
    pub fn new(test_name: &str) -> Self {
        TestStats {
            test_name: test_name.to_string(),
            finished_ops: AtomicU64::new(0),
            failed_ops: AtomicU64::new(0),
            uploaded_bytes: AtomicU64::new(0),
            downloaded_bytes: AtomicU64::new(0),
            latency_us: Mutex::new(
                Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3)
                    .expect("failed to allocate histogram"),
            ),
        }
    }

    /// Marks the test start for Grafana annotations.
    pub fn test_started(&self) {
        gauge!("gosbench_test_start", "testName" => self.test_name.clone()).set(epoch_ms());
    }

    pub fn test_ended(&self) {
        gauge!("gosbench_test_end", "testName" => self.test_name.clone()).set(epoch_ms());
    }

    pub fn record_success(
        &self,
        method: Method,
        latency: std::time::Duration,
        uploaded: u64,
        downloaded: u64,
    ) {
        self.finished_ops.fetch_add(1, Ordering::Relaxed);
        self.uploaded_bytes.fetch_add(uploaded, Ordering::Relaxed);
        self.downloaded_bytes.fetch_add(downloaded, Ordering::Relaxed);
        self.observe_latency(latency);

        counter!(
            "gosbench_finished_ops",
            "testName" => self.test_name.clone(),
            "method" => method.as_str()
        )
        .increment(1);
        if uploaded > 0 {
            counter!(
                "gosbench_uploaded_bytes",
                "testName" => self.test_name.clone(),
                "method" => method.as_str()
            )
            .increment(uploaded);
        }
        if downloaded > 0 {
            counter!(
                "gosbench_downloaded_bytes",
                "testName" => self.test_name.clone(),
                "method" => method.as_str()
            )
            .increment(downloaded);
        }
        histogram!(
            "gosbench_ops_latency",
            "testName" => self.test_name.clone(),
            "method" => method.as_str()
        )
        .record(latency.as_secs_f64() * 1000.0);
    }

    pub fn record_failure(&self, method: Method, latency: std::time::Duration) {
        self.failed_ops.fetch_add(1, Ordering::Relaxed);
        self.observe_latency(latency);

        counter!(
            "gosbench_failed_ops",
            "testName" => self.test_name.clone(),
            "method" => method.as_str()
        )
        .increment(1);
        histogram!(
            "gosbench_ops_latency",
            "testName" => self.test_name.clone(),
            "method" => method.as_str()
        )
        .record(latency.as_secs_f64() * 1000.0);
    }

    fn observe_latency(&self, latency: std::time::Duration) {
        if let Ok(mut histogram) = self.latency_us.lock() {
            let _ = histogram.record((latency.as_micros() as u64).max(1));
        }
    }

    pub fn finished_ops(&self) -> u64 {
        self.finished_ops.load(Ordering::Relaxed)
    }

    pub fn failed_ops(&self) -> u64 {
        self.failed_ops.load(Ordering::Relaxed)
    }

    pub fn to_result(&self, elapsed: std::time::Duration) -> BenchmarkResult {
        let bytes = (self.uploaded_bytes.load(Ordering::Relaxed)
            + self.downloaded_bytes.load(Ordering::Relaxed)) as f64;
        let latency_avg = self
            .latency_us
            .lock()
            .map(|histogram| histogram.mean() / 1000.0)
            .unwrap_or(0.0);
        let bandwidth = if elapsed.is_zero() {
            0.0
        } else {
            bytes / elapsed.as_secs_f64()
        };
        BenchmarkResult {
            test_name: self.test_name.clone(),
            operations: self.finished_ops.load(Ordering::Relaxed) as f64,
            bytes,
            bandwidth,
            latency_avg,
            duration: Duration(elapsed),
        }
    }
}

fn epoch_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as f64
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for metrics backends. Implementations can forward to Prometheus,
/// StatsD, or simply log metrics.
pub trait MetricsBackend: Send + Sync {
    fn record_counter(&self, name: &str, value: u64);
    fn record_histogram(&self, name: &str, value: f64);
}

/// In-memory build counters.
/// Thread-safe, so one instance can be shared by concurrent invocations.
pub struct BuildMetrics {
    pub builds_started: AtomicU64,
    pub builds_completed: AtomicU64,
    pub builds_failed: AtomicU64,
    pub transpile_recoveries: AtomicU64,
    pub caches_prepared: AtomicU64,
    pub cached_files: AtomicU64,
    backend: Option<Arc<dyn MetricsBackend>>,
}

impl std::fmt::Debug for BuildMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildMetrics")
            .field("builds_started", &self.builds_started)
            .field("builds_completed", &self.builds_completed)
            .field("builds_failed", &self.builds_failed)
            .field("transpile_recoveries", &self.transpile_recoveries)
            .field("caches_prepared", &self.caches_prepared)
            .field("cached_files", &self.cached_files)
            .finish()
    }
}

impl Default for BuildMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildMetrics {
    pub fn new() -> Self {
        Self {
            builds_started: AtomicU64::new(0),
            builds_completed: AtomicU64::new(0),
            builds_failed: AtomicU64::new(0),
            transpile_recoveries: AtomicU64::new(0),
            caches_prepared: AtomicU64::new(0),
            cached_files: AtomicU64::new(0),
            backend: None,
        }
    }

    pub fn with_backend(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new()
        }
    }

    pub fn record_build_started(&self) {
        let val = self.builds_started.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(backend) = &self.backend {
            backend.record_counter("percolate.builds_started", val);
        }
    }

    pub fn record_build_completed(&self, lambda_bytes: u64) {
        let val = self.builds_completed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(backend) = &self.backend {
            backend.record_counter("percolate.builds_completed", val);
            backend.record_histogram("percolate.lambda_bytes", lambda_bytes as f64);
        }
    }

    pub fn record_build_failed(&self) {
        let val = self.builds_failed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(backend) = &self.backend {
            backend.record_counter("percolate.builds_failed", val);
        }
    }

    pub fn record_transpile_recovered(&self) {
        let val = self.transpile_recoveries.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(backend) = &self.backend {
            backend.record_counter("percolate.transpile_recoveries", val);
        }
    }

    pub fn record_cache_prepared(&self, files: usize) {
        let val = self.caches_prepared.fetch_add(1, Ordering::Relaxed) + 1;
        self.cached_files.fetch_add(files as u64, Ordering::Relaxed);
        if let Some(backend) = &self.backend {
            backend.record_counter("percolate.caches_prepared", val);
            backend.record_histogram("percolate.cached_files", files as f64);
        }
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            builds_started: self.builds_started.load(Ordering::Relaxed),
            builds_completed: self.builds_completed.load(Ordering::Relaxed),
            builds_failed: self.builds_failed.load(Ordering::Relaxed),
            transpile_recoveries: self.transpile_recoveries.load(Ordering::Relaxed),
            caches_prepared: self.caches_prepared.load(Ordering::Relaxed),
            cached_files: self.cached_files.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of build metrics.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub builds_started: u64,
    pub builds_completed: u64,
    pub builds_failed: u64,
    pub transpile_recoveries: u64,
    pub caches_prepared: u64,
    pub cached_files: u64,
}

/// Logging-based metrics backend. Emits metrics as structured log events.
pub struct LoggingMetricsBackend;

impl MetricsBackend for LoggingMetricsBackend {
    fn record_counter(&self, name: &str, value: u64) {
        tracing::debug!(metric = name, value = value, kind = "counter", "metric");
    }

    fn record_histogram(&self, name: &str, value: f64) {
        tracing::debug!(metric = name, value = value, kind = "histogram", "metric");
    }
}

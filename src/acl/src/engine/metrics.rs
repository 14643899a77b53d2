//! Metrics collection for ACL engine observability

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Engine counters and access-check latency
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Access checks answered
    pub total_checks: u64,

    /// Checks that allowed access
    pub allowed_checks: u64,

    /// Checks that denied access
    pub denied_checks: u64,

    /// Roles granted
    pub grants: u64,

    /// Roles revoked
    pub revokes: u64,

    /// Derived authorizations created by cascading
    pub cascaded_authorizations: u64,

    /// Cascades skipped because the derived authorization already existed
    pub duplicate_cascades_skipped: u64,

    /// `resource_created` / `resource_deleted` hook invocations
    pub resource_events: u64,

    /// Cache hits
    pub cache_hits: u64,

    /// Cache misses
    pub cache_misses: u64,

    /// Check latency percentiles
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,

    /// Average check latency
    pub avg_latency_ms: f64,

    /// Failed operations
    pub error_count: u64,
}

impl EngineMetrics {
    /// Calculate cache hit rate
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Calculate allow rate
    pub fn allow_rate(&self) -> f64 {
        if self.total_checks == 0 {
            0.0
        } else {
            self.allowed_checks as f64 / self.total_checks as f64
        }
    }
}

/// Metrics collector with Prometheus text export
pub struct MetricsCollector {
    metrics: Arc<RwLock<EngineMetrics>>,

    /// Latency samples for percentile calculation
    latency_samples: Arc<RwLock<Vec<f64>>>,

    max_samples: usize,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(10_000))),
            max_samples: 10_000,
        }
    }

    /// Record an access check
    pub async fn record_check(&self, allowed: bool) {
        let mut metrics = self.metrics.write().await;
        metrics.total_checks += 1;
        if allowed {
            metrics.allowed_checks += 1;
        } else {
            metrics.denied_checks += 1;
        }
    }

    /// Record a grant and the authorizations it cascaded
    pub async fn record_grant(&self, cascaded: usize) {
        let mut metrics = self.metrics.write().await;
        metrics.grants += 1;
        metrics.cascaded_authorizations += cascaded as u64;
    }

    /// Record a revoke
    pub async fn record_revoke(&self) {
        self.metrics.write().await.revokes += 1;
    }

    /// Record a resource hook and its cascade outcome
    pub async fn record_resource_event(&self, cascaded: usize, skipped: usize) {
        let mut metrics = self.metrics.write().await;
        metrics.resource_events += 1;
        metrics.cascaded_authorizations += cascaded as u64;
        metrics.duplicate_cascades_skipped += skipped as u64;
    }

    /// Record a cache hit
    pub async fn record_cache_hit(&self) {
        self.metrics.write().await.cache_hits += 1;
    }

    /// Record a cache miss
    pub async fn record_cache_miss(&self) {
        self.metrics.write().await.cache_misses += 1;
    }

    /// Record a failed operation
    pub async fn record_error(&self) {
        self.metrics.write().await.error_count += 1;
    }

    /// Record check latency
    pub async fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write().await;
        samples.push(latency_ms);

        // Keep only recent samples
        if samples.len() > self.max_samples {
            samples.drain(0..1_000);
        }

        let mut metrics = self.metrics.write().await;

        let sum: f64 = samples.iter().sum();
        metrics.avg_latency_ms = sum / samples.len() as f64;

        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.latency_p90_ms = Self::percentile(&sorted, 0.90);
        metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
    }

    /// Get current metrics snapshot
    pub async fn get_metrics(&self) -> EngineMetrics {
        self.metrics.read().await.clone()
    }

    /// Reset all metrics
    pub async fn reset(&self) {
        *self.metrics.write().await = EngineMetrics::default();
        self.latency_samples.write().await.clear();
    }

    /// Export metrics in Prometheus format
    pub async fn export_prometheus(&self) -> String {
        let metrics = self.metrics.read().await;

        format!(
            r#"# HELP acl_checks_total Access checks answered
# TYPE acl_checks_total counter
acl_checks_total {}

# HELP acl_checks_allowed_total Access checks that allowed access
# TYPE acl_checks_allowed_total counter
acl_checks_allowed_total {}

# HELP acl_checks_denied_total Access checks that denied access
# TYPE acl_checks_denied_total counter
acl_checks_denied_total {}

# HELP acl_grants_total Roles granted
# TYPE acl_grants_total counter
acl_grants_total {}

# HELP acl_revokes_total Roles revoked
# TYPE acl_revokes_total counter
acl_revokes_total {}

# HELP acl_cascaded_authorizations_total Derived authorizations created
# TYPE acl_cascaded_authorizations_total counter
acl_cascaded_authorizations_total {}

# HELP acl_duplicate_cascades_total Cascades skipped as already present
# TYPE acl_duplicate_cascades_total counter
acl_duplicate_cascades_total {}

# HELP acl_resource_events_total Resource created / deleted hook invocations
# TYPE acl_resource_events_total counter
acl_resource_events_total {}

# HELP acl_cache_hits_total Cache hits
# TYPE acl_cache_hits_total counter
acl_cache_hits_total {}

# HELP acl_cache_misses_total Cache misses
# TYPE acl_cache_misses_total counter
acl_cache_misses_total {}

# HELP acl_check_latency_seconds Access check latency percentiles
# TYPE acl_check_latency_seconds summary
acl_check_latency_seconds{{quantile="0.5"}} {}
acl_check_latency_seconds{{quantile="0.9"}} {}
acl_check_latency_seconds{{quantile="0.99"}} {}

# HELP acl_errors_total Failed operations
# TYPE acl_errors_total counter
acl_errors_total {}
"#,
            metrics.total_checks,
            metrics.allowed_checks,
            metrics.denied_checks,
            metrics.grants,
            metrics.revokes,
            metrics.cascaded_authorizations,
            metrics.duplicate_cascades_skipped,
            metrics.resource_events,
            metrics.cache_hits,
            metrics.cache_misses,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p90_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
            metrics.error_count,
        )
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

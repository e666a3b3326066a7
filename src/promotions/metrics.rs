// Performance Metrics for the Promotion Engine
//
// Tracks catalog cache hit rates, evaluation and commit timings, and the outcome
// of every application attempt.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use utoipa::ToSchema;

/// Performance threshold for slow operations (100ms)
const SLOW_OPERATION_THRESHOLD_MS: u64 = 100;

/// Shared counters for the promotion engine
#[derive(Debug, Clone, Default)]
pub struct PromotionMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    // Catalog cache
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,

    // Operation counts
    evaluations: AtomicU64,
    commits: AtomicU64,

    // Timing (microseconds)
    total_evaluation_time_us: AtomicU64,
    total_commit_time_us: AtomicU64,

    slow_evaluations: AtomicU64,
    slow_commits: AtomicU64,

    // Application outcomes
    applications_committed: AtomicU64,
    applications_declined: AtomicU64,
    limit_rejections: AtomicU64,
}

impl PromotionMetrics {
    /// Create a new PromotionMetrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Get cache hit rate (0.0 to 1.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn record_application_committed(&self) {
        self.inner.applications_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a declined selection; `limit` marks declines caused by a usage cap
    pub fn record_application_declined(&self, limit: bool) {
        self.inner.applications_declined.fetch_add(1, Ordering::Relaxed);
        if limit {
            self.inner.limit_rejections.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Start timing an order evaluation
    pub fn start_evaluation(&self) -> OperationTimer {
        OperationTimer::new(OperationType::Evaluation, self.clone())
    }

    /// Start timing an apply/commit pass
    pub fn start_commit(&self) -> OperationTimer {
        OperationTimer::new(OperationType::Commit, self.clone())
    }

    fn record(&self, operation_type: OperationType, duration: Duration) {
        let (count, total, slow) = match operation_type {
            OperationType::Evaluation => (
                &self.inner.evaluations,
                &self.inner.total_evaluation_time_us,
                &self.inner.slow_evaluations,
            ),
            OperationType::Commit => (
                &self.inner.commits,
                &self.inner.total_commit_time_us,
                &self.inner.slow_commits,
            ),
        };

        count.fetch_add(1, Ordering::Relaxed);
        total.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        if duration.as_millis() as u64 > SLOW_OPERATION_THRESHOLD_MS {
            slow.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Slow promotion {}: {}ms", operation_type.label(), duration.as_millis());
        }
    }

    fn average_ms(count: &AtomicU64, total_us: &AtomicU64) -> f64 {
        let count = count.load(Ordering::Relaxed);
        let total_us = total_us.load(Ordering::Relaxed);

        if count == 0 {
            0.0
        } else {
            (total_us as f64 / count as f64) / 1000.0
        }
    }

    /// Get metrics summary
    pub fn summary(&self) -> MetricsSummary {
        let inner = &self.inner;
        MetricsSummary {
            cache_hit_rate: self.cache_hit_rate(),
            cache_hits: inner.cache_hits.load(Ordering::Relaxed),
            cache_misses: inner.cache_misses.load(Ordering::Relaxed),
            evaluations: inner.evaluations.load(Ordering::Relaxed),
            avg_evaluation_time_ms: Self::average_ms(&inner.evaluations, &inner.total_evaluation_time_us),
            slow_evaluations: inner.slow_evaluations.load(Ordering::Relaxed),
            commits: inner.commits.load(Ordering::Relaxed),
            avg_commit_time_ms: Self::average_ms(&inner.commits, &inner.total_commit_time_us),
            slow_commits: inner.slow_commits.load(Ordering::Relaxed),
            applications_committed: inner.applications_committed.load(Ordering::Relaxed),
            applications_declined: inner.applications_declined.load(Ordering::Relaxed),
            limit_rejections: inner.limit_rejections.load(Ordering::Relaxed),
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        let summary = self.summary();
        tracing::info!(
            "Promotion Engine Metrics:\n\
             Cache: {:.1}% hit rate ({} hits, {} misses)\n\
             Evaluations: {}, avg {:.2}ms, {} slow\n\
             Commits: {}, avg {:.2}ms, {} slow\n\
             Applications: {} committed, {} declined ({} at usage limit)",
            summary.cache_hit_rate * 100.0,
            summary.cache_hits,
            summary.cache_misses,
            summary.evaluations,
            summary.avg_evaluation_time_ms,
            summary.slow_evaluations,
            summary.commits,
            summary.avg_commit_time_ms,
            summary.slow_commits,
            summary.applications_committed,
            summary.applications_declined,
            summary.limit_rejections,
        );
    }
}

#[derive(Debug, Clone, Copy)]
enum OperationType {
    Evaluation,
    Commit,
}

impl OperationType {
    fn label(&self) -> &'static str {
        match self {
            OperationType::Evaluation => "evaluation",
            OperationType::Commit => "commit",
        }
    }
}

/// Records the elapsed time when dropped
pub struct OperationTimer {
    start: Instant,
    operation_type: OperationType,
    metrics: PromotionMetrics,
}

impl OperationTimer {
    fn new(operation_type: OperationType, metrics: PromotionMetrics) -> Self {
        Self {
            start: Instant::now(),
            operation_type,
            metrics,
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        self.metrics.record(self.operation_type, self.start.elapsed());
    }
}

/// Summary of promotion engine metrics
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MetricsSummary {
    pub cache_hit_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evaluations: u64,
    pub avg_evaluation_time_ms: f64,
    pub slow_evaluations: u64,
    pub commits: u64,
    pub avg_commit_time_ms: f64,
    pub slow_commits: u64,
    pub applications_committed: u64,
    pub applications_declined: u64,
    pub limit_rejections: u64,
}

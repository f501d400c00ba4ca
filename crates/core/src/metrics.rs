//! Prometheus metrics for the orchestrator.
//!
//! Collectors are process-wide statics; register them with
//! [`all_metrics`] on whatever registry the host exposes.

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts};

// =============================================================================
// Intake
// =============================================================================

/// Jobs created by content type.
pub static JOBS_SUBMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("chapterforge_jobs_submitted_total", "Total jobs submitted"),
        &["content_type"],
    )
    .unwrap()
});

/// Batches created.
pub static BATCHES_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "chapterforge_batches_submitted_total",
        "Total batches submitted",
    )
    .unwrap()
});

// =============================================================================
// Attempts
// =============================================================================

/// Adapter attempts by content type and outcome.
pub static ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "chapterforge_attempts_total",
            "Total generation attempts",
        ),
        &["content_type", "outcome"], // "success", "timeout", "rate_limited", ...
    )
    .unwrap()
});

/// Attempt duration in seconds.
pub static GENERATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "chapterforge_generation_duration_seconds",
            "Duration of a single generation attempt",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["content_type"],
    )
    .unwrap()
});

/// Retries scheduled after a transient error.
pub static RETRIES_SCHEDULED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "chapterforge_retries_scheduled_total",
            "Total retries scheduled after a retryable error",
        ),
        &["content_type"],
    )
    .unwrap()
});

/// Completions that arrived for a job no longer running (cancelled meanwhile).
pub static DISCARDED_RESULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "chapterforge_discarded_results_total",
            "Adapter results discarded because the job had left Running",
        ),
        &["content_type"],
    )
    .unwrap()
});

/// Jobs satisfied from an existing artifact instead of a new generation.
pub static ARTIFACTS_REUSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "chapterforge_artifacts_reused_total",
            "Jobs completed by reusing an artifact with the same generation key",
        ),
        &["content_type"],
    )
    .unwrap()
});

// =============================================================================
// Outcomes & slots
// =============================================================================

/// Jobs reaching a terminal state.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("chapterforge_jobs_finished_total", "Total jobs finished"),
        &["content_type", "state"],
    )
    .unwrap()
});

/// Occupied slots per capability.
pub static SLOTS_IN_USE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("chapterforge_slots_in_use", "Slots currently occupied"),
        &["content_type"],
    )
    .unwrap()
});

/// Jobs waiting in a ready queue per capability.
pub static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("chapterforge_queue_depth", "Ready jobs waiting for a slot"),
        &["content_type"],
    )
    .unwrap()
});

/// Returns every collector for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Intake
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(BATCHES_SUBMITTED.clone()),
        // Attempts
        Box::new(ATTEMPTS.clone()),
        Box::new(GENERATION_DURATION.clone()),
        Box::new(RETRIES_SCHEDULED.clone()),
        Box::new(DISCARDED_RESULTS.clone()),
        Box::new(ARTIFACTS_REUSED.clone()),
        // Outcomes & slots
        Box::new(JOBS_FINISHED.clone()),
        Box::new(SLOTS_IN_USE.clone()),
        Box::new(QUEUE_DEPTH.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }

        JOBS_SUBMITTED.with_label_values(&["audio"]).inc();
        SLOTS_IN_USE.with_label_values(&["video"]).set(2);

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "chapterforge_jobs_submitted_total"));
    }
}

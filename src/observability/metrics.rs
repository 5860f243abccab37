//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `configsync_cycles_total{kind,outcome}` - Finished sync cycles and drift scans by outcome
//! - `configsync_cycle_duration_seconds` - Duration of sync cycles
//! - `configsync_objects_applied_total{result}` - Per-object apply results
//! - `configsync_validation_failures_total` - Cycles rejected by the validator
//! - `configsync_drift_detected_total` - Drifted objects found by drift scans
//! - `configsync_remediations_total{result}` - Remediation applies
//! - `configsync_active_targets` - Targets with a running task
//! - `configsync_limiter_wait_seconds` - Time spent waiting for a concurrency permit
//! - `configsync_requeues_total{trigger_source}` - Scheduled follow-up cycles
//! - `configsync_duration_parsing_errors_total` - Unparseable interval strings
//! - `configsync_watch_restarts_total{reason}` - Restarts of the resource watch
//! - `configsync_kustomize_builds_total{result}` - `kustomize build` runs
//! - `configsync_kustomize_build_duration_seconds` - Duration of `kustomize build`

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static CYCLES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "configsync_cycles_total",
            "Total number of finished cycles by kind and outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("Failed to create CYCLES_TOTAL metric - this should never happen")
});

static CYCLE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "configsync_cycle_duration_seconds",
            "Duration of sync cycles in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
    )
    .expect("Failed to create CYCLE_DURATION metric - this should never happen")
});

static OBJECTS_APPLIED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "configsync_objects_applied_total",
            "Total number of object apply attempts by result",
        ),
        &["result"],
    )
    .expect("Failed to create OBJECTS_APPLIED_TOTAL metric - this should never happen")
});

static VALIDATION_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "configsync_validation_failures_total",
        "Total number of cycles rejected by validation",
    )
    .expect("Failed to create VALIDATION_FAILURES_TOTAL metric - this should never happen")
});

static DRIFT_DETECTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "configsync_drift_detected_total",
        "Total number of drifted objects found",
    )
    .expect("Failed to create DRIFT_DETECTED_TOTAL metric - this should never happen")
});

static REMEDIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "configsync_remediations_total",
            "Total number of drift remediation applies by result",
        ),
        &["result"],
    )
    .expect("Failed to create REMEDIATIONS_TOTAL metric - this should never happen")
});

static ACTIVE_TARGETS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("configsync_active_targets", "Number of scheduled targets")
        .expect("Failed to create ACTIVE_TARGETS metric - this should never happen")
});

static LIMITER_WAIT: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "configsync_limiter_wait_seconds",
            "Time spent waiting for a concurrency permit in seconds",
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
    )
    .expect("Failed to create LIMITER_WAIT metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "configsync_requeues_total",
            "Total number of scheduled follow-up cycles by trigger source",
        ),
        &["trigger_source"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static DURATION_PARSING_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "configsync_duration_parsing_errors_total",
        "Total number of interval parsing errors (syncInterval, driftScanInterval)",
    )
    .expect("Failed to create DURATION_PARSING_ERRORS_TOTAL metric - this should never happen")
});

static WATCH_RESTARTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "configsync_watch_restarts_total",
            "Total number of watch restarts by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create WATCH_RESTARTS_TOTAL metric - this should never happen")
});

static KUSTOMIZE_BUILDS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "configsync_kustomize_builds_total",
            "Total number of kustomize build runs by result",
        ),
        &["result"],
    )
    .expect("Failed to create KUSTOMIZE_BUILDS_TOTAL metric - this should never happen")
});

static KUSTOMIZE_BUILD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "configsync_kustomize_build_duration_seconds",
            "Duration of kustomize build runs in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create KUSTOMIZE_BUILD_DURATION metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(CYCLES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CYCLE_DURATION.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_APPLIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VALIDATION_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DRIFT_DETECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REMEDIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_TARGETS.clone()))?;
    REGISTRY.register(Box::new(LIMITER_WAIT.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DURATION_PARSING_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATCH_RESTARTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(KUSTOMIZE_BUILDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(KUSTOMIZE_BUILD_DURATION.clone()))?;

    Ok(())
}

pub fn increment_cycles(kind: &str, outcome: &str) {
    CYCLES_TOTAL.with_label_values(&[kind, outcome]).inc();
}

pub fn observe_cycle_duration(duration: f64) {
    CYCLE_DURATION.observe(duration);
}

pub fn increment_objects_applied(result: &str) {
    OBJECTS_APPLIED_TOTAL.with_label_values(&[result]).inc();
}

pub fn increment_validation_failures() {
    VALIDATION_FAILURES_TOTAL.inc();
}

pub fn increment_drift_detected(count: u64) {
    DRIFT_DETECTED_TOTAL.inc_by(count);
}

pub fn increment_remediations(result: &str) {
    REMEDIATIONS_TOTAL.with_label_values(&[result]).inc();
}

pub fn set_active_targets(count: usize) {
    #[allow(clippy::cast_possible_wrap, reason = "target counts stay far below i64::MAX")]
    ACTIVE_TARGETS.set(count as i64);
}

pub fn observe_limiter_wait(duration: f64) {
    LIMITER_WAIT.observe(duration);
}

pub fn increment_requeues_total(trigger_source: &str) {
    REQUEUES_TOTAL.with_label_values(&[trigger_source]).inc();
}

pub fn increment_duration_parsing_errors() {
    DURATION_PARSING_ERRORS_TOTAL.inc();
}

pub fn increment_watch_restarts(reason: &str) {
    WATCH_RESTARTS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_kustomize_builds(result: &str) {
    KUSTOMIZE_BUILDS_TOTAL.with_label_values(&[result]).inc();
}

pub fn observe_kustomize_build_duration(duration: f64) {
    KUSTOMIZE_BUILD_DURATION.observe(duration);
}

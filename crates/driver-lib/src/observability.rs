//! Observability infrastructure for the tuning driver
//!
//! Provides:
//! - Prometheus metrics (cycle and read latency, patch and failure counters)
//! - Structured JSON logging with tracing
//!
//! The driver runs once per optimizer request, so metrics are exported by
//! rendering the text exposition format rather than serving it.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for orchestrator round trips and whole cycles (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once). `None` if registration failed,
/// in which case recording is a no-op.
static GLOBAL_METRICS: OnceLock<Option<DriverMetricsInner>> = OnceLock::new();

struct DriverMetricsInner {
    registry: Registry,
    cycle_duration_seconds: HistogramVec,
    read_duration_seconds: Histogram,
    patches_applied: IntCounter,
    patch_failures: IntCounter,
    component_failures: IntCounterVec,
    components_excluded: IntCounter,
    cycles_disabled: IntCounter,
}

impl DriverMetricsInner {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let cycle_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "k8s_driver_cycle_duration_seconds",
                "Wall time of one describe or adjust cycle",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["operation"],
        )?;
        let read_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "k8s_driver_read_duration_seconds",
                "Time spent reading one workload, retries included",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let patches_applied = IntCounter::new(
            "k8s_driver_patches_applied_total",
            "Workload patches accepted by the orchestrator",
        )?;
        let patch_failures = IntCounter::new(
            "k8s_driver_patch_failures_total",
            "Workload patches that were rejected or could not be sent",
        )?;
        let component_failures = IntCounterVec::new(
            Opts::new(
                "k8s_driver_component_failures_total",
                "Per-component failures by error kind",
            ),
            &["kind"],
        )?;
        let components_excluded = IntCounter::new(
            "k8s_driver_components_excluded_total",
            "Components skipped because their workload carries the exclusion label",
        )?;
        let cycles_disabled = IntCounter::new(
            "k8s_driver_cycles_disabled_total",
            "Adjust cycles where the enablement condition did not hold",
        )?;

        registry.register(Box::new(cycle_duration_seconds.clone()))?;
        registry.register(Box::new(read_duration_seconds.clone()))?;
        registry.register(Box::new(patches_applied.clone()))?;
        registry.register(Box::new(patch_failures.clone()))?;
        registry.register(Box::new(component_failures.clone()))?;
        registry.register(Box::new(components_excluded.clone()))?;
        registry.register(Box::new(cycles_disabled.clone()))?;

        Ok(Self {
            registry,
            cycle_duration_seconds,
            read_duration_seconds,
            patches_applied,
            patch_failures,
            component_failures,
            components_excluded,
            cycles_disabled,
        })
    }
}

/// Driver metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct DriverMetrics {
    _private: (),
}

impl Default for DriverMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match DriverMetricsInner::new() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register metrics, recording disabled");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&DriverMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    pub fn observe_cycle_duration(&self, operation: &str, duration_secs: f64) {
        if let Some(inner) = self.inner() {
            inner
                .cycle_duration_seconds
                .with_label_values(&[operation])
                .observe(duration_secs);
        }
    }

    pub fn observe_read_duration(&self, duration_secs: f64) {
        if let Some(inner) = self.inner() {
            inner.read_duration_seconds.observe(duration_secs);
        }
    }

    pub fn inc_patches_applied(&self) {
        if let Some(inner) = self.inner() {
            inner.patches_applied.inc();
        }
    }

    pub fn inc_patch_failures(&self) {
        if let Some(inner) = self.inner() {
            inner.patch_failures.inc();
        }
    }

    /// Count a component failure under its error kind
    pub fn inc_component_failures(&self, kind: &str) {
        if let Some(inner) = self.inner() {
            inner.component_failures.with_label_values(&[kind]).inc();
        }
    }

    pub fn inc_components_excluded(&self) {
        if let Some(inner) = self.inner() {
            inner.components_excluded.inc();
        }
    }

    pub fn inc_cycles_disabled(&self) {
        if let Some(inner) = self.inner() {
            inner.cycles_disabled.inc();
        }
    }

    /// Render every driver metric in the Prometheus text format
    pub fn encode_text(&self) -> String {
        let Some(inner) = self.inner() else {
            return String::new();
        };
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&inner.registry.gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Structured logger for cycle events
///
/// Provides consistent JSON-formatted logging of what each cycle did to
/// which workload.
#[derive(Clone)]
pub struct StructuredLogger {
    namespace: String,
}

impl StructuredLogger {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn log_cycle_started(&self, operation: &str, components: usize, workloads: usize) {
        info!(
            event = "cycle_started",
            namespace = %self.namespace,
            operation = %operation,
            components = components,
            workloads = workloads,
            "Tuning cycle started"
        );
    }

    pub fn log_component_excluded(&self, component: &str, workload: &str) {
        info!(
            event = "component_excluded",
            namespace = %self.namespace,
            component = %component,
            workload = %workload,
            "Workload carries the exclusion label, component skipped"
        );
    }

    pub fn log_patch_applied(&self, workload: &str, changes: usize, dry_run: bool) {
        info!(
            event = "patch_applied",
            namespace = %self.namespace,
            workload = %workload,
            changes = changes,
            dry_run = dry_run,
            "Workload patch applied"
        );
    }

    pub fn log_patch_failed(&self, workload: &str, kind: &str, error: &str) {
        warn!(
            event = "patch_failed",
            namespace = %self.namespace,
            workload = %workload,
            kind = %kind,
            error = %error,
            "Workload patch failed"
        );
    }

    pub fn log_cycle_completed(
        &self,
        operation: &str,
        enabled: bool,
        failures: usize,
        duration_secs: f64,
    ) {
        if failures == 0 {
            info!(
                event = "cycle_completed",
                namespace = %self.namespace,
                operation = %operation,
                enabled = enabled,
                failures = failures,
                duration_secs = duration_secs,
                "Tuning cycle completed"
            );
        } else {
            warn!(
                event = "cycle_completed",
                namespace = %self.namespace,
                operation = %operation,
                enabled = enabled,
                failures = failures,
                duration_secs = duration_secs,
                "Tuning cycle completed with failures"
            );
        }
    }
}

//! Cycle orchestration
//!
//! One invocation runs one cycle:
//! 1. evaluate the enablement gate (adjust only)
//! 2. read every declared workload once, concurrently
//! 3. extract component state and translate targets into patches
//! 4. apply one patch per workload, concurrently across workloads
//!
//! Failures are attributed to the component or workload they concern and
//! collected into the [`CycleReport`]; only an unusable input or a cycle
//! where no component could be resolved fails as a whole.

mod report;


pub use report::{
    ComponentReport, ComponentStatus, CycleReport, FailureReport, WorkloadOutcome, WorkloadReport,
};

use crate::applier::{ApplyOutcome, PatchApplier};
use crate::config::Application;
use crate::enablement::EnablementEvaluator;
use crate::error::{Result, TuningError};
use crate::models::{ComponentSpec, TargetConfiguration, WorkloadSnapshot};
use crate::observability::{DriverMetrics, StructuredLogger};
use crate::orchestrator::{Orchestrator, RetryPolicy};
use crate::reader::{extract_state, ComponentState, ReadOutcome, StateReader};
use crate::translator::{PatchTranslator, Translation, WorkloadPatch};
use chrono::Utc;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

/// Workload and cycle scoped failures are counted by their own metrics
fn is_component_failure(error: &TuningError, component: Option<&str>) -> bool {
    component.is_some() || error.component().is_some()
}

/// Components whose state was read, plus the partial report so far
struct ReadPhase<'a> {
    states: Vec<(&'a ComponentSpec, ComponentState)>,
    components: BTreeMap<String, ComponentReport>,
    failures: Vec<FailureReport>,
}

pub struct TuningCycle<'a> {
    application: &'a Application,
    orchestrator: &'a dyn Orchestrator,
    read_retry: RetryPolicy,
    write_retry: RetryPolicy,
    metrics: DriverMetrics,
    logger: StructuredLogger,
}

impl<'a> TuningCycle<'a> {
    pub fn new(application: &'a Application, orchestrator: &'a dyn Orchestrator) -> Self {
        Self {
            application,
            orchestrator,
            read_retry: RetryPolicy::default(),
            write_retry: RetryPolicy::default(),
            metrics: DriverMetrics::new(),
            logger: StructuredLogger::new(application.namespace.clone()),
        }
    }

    pub fn with_retry(mut self, read: RetryPolicy, write: RetryPolicy) -> Self {
        self.read_retry = read;
        self.write_retry = write;
        self
    }

    /// Read every component and report its settings. Never writes.
    pub async fn describe(&self) -> Result<CycleReport> {
        let started = Instant::now();
        self.start("describe");

        let read = self.read_components().await?;
        let translation = self.translate(&read, &TargetConfiguration::new(), false);
        let report = self.finish("describe", false, false, read, translation, BTreeMap::new());

        self.complete(&report, started);
        Ok(report)
    }

    /// Run an adjustment cycle for the optimizer input `input`.
    ///
    /// With `dry_run` the patches are computed and reported but not sent.
    pub async fn adjust(&self, input: &serde_json::Value, dry_run: bool) -> Result<CycleReport> {
        let started = Instant::now();
        self.start("adjust");

        let target = TargetConfiguration::from_input(input)?;
        let gate = EnablementEvaluator::new(self.application.adjust_on.clone()).evaluate(input);
        if !gate.enabled {
            self.metrics.inc_cycles_disabled();
        }

        let mut read = self.read_components().await?;
        if let Some(error) = &gate.error {
            self.record_failure(&mut read.failures, error, None);
        }

        let translation = self.translate(&read, &target, gate.enabled);
        let workloads = self
            .apply_patches(&translation, gate.enabled, dry_run, &mut read.failures)
            .await;
        let report = self.finish("adjust", gate.enabled, dry_run, read, translation, workloads);

        self.complete(&report, started);
        Ok(report)
    }

    fn start(&self, operation: &str) {
        self.logger.log_cycle_started(
            operation,
            self.application.components.len(),
            self.application.workloads().len(),
        );
    }

    fn complete(&self, report: &CycleReport, started: Instant) {
        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.observe_cycle_duration(report.operation, elapsed);
        self.logger.log_cycle_completed(
            report.operation,
            report.enabled,
            report.failures.len(),
            elapsed,
        );
    }

    fn record_failure(
        &self,
        failures: &mut Vec<FailureReport>,
        error: &TuningError,
        component: Option<&str>,
    ) {
        if is_component_failure(error, component) {
            self.metrics.inc_component_failures(error.kind());
        }
        failures.push(FailureReport::new(error, component));
    }

    /// Read each workload once, then extract the state of every component
    /// mapped to it
    async fn read_components(&self) -> Result<ReadPhase<'a>> {
        let namespace = self.application.namespace.as_str();
        let reader = StateReader::new(self.orchestrator, self.read_retry);
        let workloads = self.application.workloads();

        let reads = join_all(workloads.iter().map(|workload| {
            let reader = &reader;
            async move {
                let started = Instant::now();
                let result = reader.read_workload(namespace, workload).await;
                self.metrics
                    .observe_read_duration(started.elapsed().as_secs_f64());
                result
            }
        }))
        .await;
        let snapshots: BTreeMap<&str, Result<Option<WorkloadSnapshot>>> =
            workloads.into_iter().zip(reads).collect();

        let application: &'a Application = self.application;
        let mut phase = ReadPhase {
            states: Vec::new(),
            components: BTreeMap::new(),
            failures: Vec::new(),
        };

        for component in &application.components {
            let outcome = match snapshots.get(component.workload.as_str()) {
                Some(Ok(Some(snapshot))) => extract_state(component, snapshot),
                Some(Ok(None)) | None => Err(TuningError::ComponentNotFound {
                    component: component.name.clone(),
                    workload: component.workload.clone(),
                }),
                Some(Err(e)) => Err(e.clone()),
            };

            let status = match outcome {
                Ok(ReadOutcome::State(state)) => {
                    for error in &state.env_failures {
                        self.record_failure(&mut phase.failures, error, Some(&component.name));
                    }
                    phase.states.push((component, state));
                    ComponentStatus::Ok
                }
                Ok(ReadOutcome::Excluded) => {
                    self.metrics.inc_components_excluded();
                    self.logger
                        .log_component_excluded(&component.name, &component.workload);
                    ComponentStatus::Excluded
                }
                Err(e) => {
                    self.record_failure(&mut phase.failures, &e, Some(&component.name));
                    ComponentStatus::Failed
                }
            };

            phase.components.insert(
                component.name.clone(),
                ComponentReport {
                    workload: component.workload.clone(),
                    container: component.container.clone(),
                    status,
                    settings: BTreeMap::new(),
                },
            );
        }

        let excluded = phase
            .components
            .values()
            .any(|c| c.status == ComponentStatus::Excluded);
        if phase.states.is_empty() && !excluded {
            return Err(TuningError::NoComponentResolved);
        }

        Ok(phase)
    }

    fn translate(
        &self,
        read: &ReadPhase<'a>,
        target: &TargetConfiguration,
        enabled: bool,
    ) -> Translation {
        let resolved: Vec<(&ComponentSpec, &ComponentState)> = read
            .states
            .iter()
            .map(|(component, state)| (*component, state))
            .collect();
        PatchTranslator::new(target, enabled).translate(&resolved)
    }

    async fn apply_patches(
        &self,
        translation: &Translation,
        enabled: bool,
        dry_run: bool,
        failures: &mut Vec<FailureReport>,
    ) -> BTreeMap<String, WorkloadReport> {
        let mut workloads = BTreeMap::new();
        let mut pending: Vec<(&str, &WorkloadPatch)> = Vec::new();

        for workload in self.application.workloads() {
            let report = match translation.patches.get(workload) {
                _ if !enabled => WorkloadReport {
                    outcome: WorkloadOutcome::Disabled,
                    changes: 0,
                    patch: None,
                },
                None => WorkloadReport {
                    outcome: WorkloadOutcome::Skipped,
                    changes: 0,
                    patch: None,
                },
                Some(Err(e)) => {
                    self.record_failure(failures, e, None);
                    self.metrics.inc_patch_failures();
                    self.logger.log_patch_failed(workload, e.kind(), &e.to_string());
                    WorkloadReport {
                        outcome: WorkloadOutcome::Failed,
                        changes: 0,
                        patch: None,
                    }
                }
                Some(Ok(patch)) if patch.is_empty() => WorkloadReport {
                    outcome: WorkloadOutcome::Unchanged,
                    changes: 0,
                    patch: None,
                },
                Some(Ok(patch)) => {
                    if dry_run {
                        self.logger
                            .log_patch_applied(workload, patch.change_count(), true);
                    } else {
                        pending.push((workload, patch));
                    }
                    WorkloadReport {
                        outcome: WorkloadOutcome::DryRun,
                        changes: patch.change_count(),
                        patch: Some(patch.to_strategic_merge()),
                    }
                }
            };
            workloads.insert(workload.to_string(), report);
        }

        if pending.is_empty() {
            return workloads;
        }

        let namespace = self.application.namespace.as_str();
        let applier = PatchApplier::new(self.orchestrator, self.write_retry);
        let results = join_all(
            pending
                .iter()
                .map(|(workload, patch)| applier.apply(namespace, workload, patch)),
        )
        .await;

        for ((workload, patch), result) in pending.into_iter().zip(results) {
            let Some(report) = workloads.get_mut(workload) else {
                continue;
            };
            match result {
                Ok(ApplyOutcome::Applied) => {
                    self.metrics.inc_patches_applied();
                    self.logger
                        .log_patch_applied(workload, patch.change_count(), false);
                    report.outcome = WorkloadOutcome::Applied;
                }
                Ok(ApplyOutcome::Unchanged) => {
                    report.outcome = WorkloadOutcome::Unchanged;
                    report.patch = None;
                }
                Err(e) => {
                    self.record_failure(failures, &e, None);
                    self.metrics.inc_patch_failures();
                    self.logger.log_patch_failed(workload, e.kind(), &e.to_string());
                    report.outcome = WorkloadOutcome::Failed;
                }
            }
        }

        workloads
    }

    fn finish(
        &self,
        operation: &'static str,
        enabled: bool,
        dry_run: bool,
        read: ReadPhase<'a>,
        translation: Translation,
        workloads: BTreeMap<String, WorkloadReport>,
    ) -> CycleReport {
        let ReadPhase {
            mut components,
            mut failures,
            ..
        } = read;

        for (name, result) in translation.components {
            for error in &result.failures {
                self.record_failure(&mut failures, error, Some(&name));
            }
            if let Some(report) = components.get_mut(&name) {
                report.settings = result.settings;
            }
        }
        debug!(
            operation = %operation,
            failures = failures.len(),
            "Cycle report assembled"
        );

        CycleReport {
            operation,
            namespace: self.application.namespace.clone(),
            enabled,
            dry_run,
            components,
            workloads,
            failures,
            completed_at: Utc::now(),
        }
    }
}

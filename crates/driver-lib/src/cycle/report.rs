//! Partial-success summary of one cycle

use crate::error::TuningError;
use crate::translator::SettingReport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Ok,
    /// The workload carries the exclusion label
    Excluded,
    /// The component's state could not be read
    Failed,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Excluded => "excluded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadOutcome {
    Applied,
    /// Nothing to change, no request was made
    Unchanged,
    /// The enablement condition did not hold
    Disabled,
    /// Patch computed but not sent
    DryRun,
    Failed,
    /// No component of the workload could be read, or all were excluded
    Skipped,
}

impl WorkloadOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::Disabled => "disabled",
            Self::DryRun => "dry_run",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentReport {
    pub workload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    pub status: ComponentStatus,
    pub settings: BTreeMap<String, SettingReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadReport {
    pub outcome: WorkloadOutcome,
    pub changes: usize,
    /// Strategic-merge body that was (or, in a dry run, would be) sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Value>,
}

/// One attributed failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setting: Option<String>,
    pub message: String,
}

impl FailureReport {
    /// Attribute `error`, falling back to `component` when the error itself
    /// only names a workload
    pub fn new(error: &TuningError, component: Option<&str>) -> Self {
        Self {
            kind: error.kind(),
            component: error.component().or(component).map(String::from),
            workload: error.workload().map(String::from),
            setting: error.setting().map(String::from),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub operation: &'static str,
    pub namespace: String,
    pub enabled: bool,
    pub dry_run: bool,
    pub components: BTreeMap<String, ComponentReport>,
    pub workloads: BTreeMap<String, WorkloadReport>,
    pub failures: Vec<FailureReport>,
    pub completed_at: DateTime<Utc>,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn components_with(&self, status: ComponentStatus) -> impl Iterator<Item = &str> {
        self.components
            .iter()
            .filter(move |(_, c)| c.status == status)
            .map(|(name, _)| name.as_str())
    }

    /// The optimizer-facing description: current value and search space of
    /// every declared setting of every component that was read
    pub fn description(&self) -> Value {
        let components: Map<String, Value> = self
            .components
            .iter()
            .filter(|(_, c)| c.status == ComponentStatus::Ok)
            .map(|(name, c)| (name.clone(), json!({ "settings": c.settings })))
            .collect();

        json!({
            "application": {
                "components": components
            }
        })
    }
}

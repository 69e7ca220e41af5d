//! State reader
//!
//! Fetches a Deployment through the orchestrator and extracts the current
//! value of every setting a component declares.

use crate::error::{Result, TuningError};
use crate::models::{
    ComponentSpec, ContainerSnapshot, EnvSetting, EnvSource, SettingName, WorkloadSnapshot,
};
use crate::orchestrator::{Orchestrator, OrchestratorError, RetryPolicy};
use crate::quantity;
use std::collections::BTreeMap;
use tracing::debug;

/// Current values of one component's declared settings
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentState {
    pub component: String,
    pub workload: String,
    /// Name of the resolved container
    pub container: String,
    /// Cores
    pub cpu: Option<f64>,
    /// GiB
    pub mem: Option<f64>,
    pub replicas: i32,
    /// Declared env settings that could be read; `None` means no live value
    pub env: BTreeMap<String, Option<String>>,
    /// Env failures for this component; when non-empty `env` is empty
    pub env_failures: Vec<TuningError>,
}

impl ComponentState {
    /// Current value of a resource setting
    pub fn value(&self, name: SettingName) -> Option<f64> {
        match name {
            SettingName::Cpu => self.cpu,
            SettingName::Mem => self.mem,
            SettingName::Replicas => Some(f64::from(self.replicas)),
        }
    }
}

/// Result of reading a component
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    State(ComponentState),
    /// The workload carries the exclusion label; skip it entirely
    Excluded,
}

/// Pick the container a component maps to: the named one, or the first
/// declared container when the component name has no container part.
pub fn resolve_container<'a>(
    snapshot: &'a WorkloadSnapshot,
    container: Option<&str>,
) -> Option<&'a ContainerSnapshot> {
    match container {
        Some(name) => snapshot.containers.iter().find(|c| c.name == name),
        None => snapshot.containers.first(),
    }
}

/// Live quantity of one resource: the limit, or the request when the
/// container sets no limit for that resource. Writes always set both, but a
/// write of one resource leaves the other resource's request-only value alone.
pub fn resource_quantity<'a>(container: &'a ContainerSnapshot, key: &str) -> Option<&'a str> {
    let lookup = |map: &'a Option<BTreeMap<String, String>>| {
        map.as_ref().and_then(|m| m.get(key)).map(String::as_str)
    };
    lookup(&container.limits).or_else(|| lookup(&container.requests))
}

/// Strip a declared unit suffix from a live env value
pub fn strip_unit<'a>(value: &'a str, unit: Option<&str>) -> &'a str {
    match unit {
        Some(unit) if !unit.is_empty() => value.strip_suffix(unit).unwrap_or(value),
        _ => value,
    }
}

/// Extract a component's current state from a workload snapshot
pub fn extract_state(component: &ComponentSpec, snapshot: &WorkloadSnapshot) -> Result<ReadOutcome> {
    if snapshot.is_excluded() {
        return Ok(ReadOutcome::Excluded);
    }

    let container = resolve_container(snapshot, component.container.as_deref()).ok_or_else(
        || TuningError::ContainerNotFound {
            component: component.name.clone(),
            workload: component.workload.clone(),
            container: component
                .container
                .clone()
                .unwrap_or_else(|| "<first>".to_string()),
        },
    )?;

    let resource = |name: SettingName, parse: fn(&str) -> Option<f64>| {
        let key = name.resource_key()?;
        resource_quantity(container, key).and_then(parse)
    };

    let (env, env_failures) = match read_env(component, container) {
        Ok(env) => (env, Vec::new()),
        Err(failures) => (BTreeMap::new(), failures),
    };

    Ok(ReadOutcome::State(ComponentState {
        component: component.name.clone(),
        workload: component.workload.clone(),
        container: container.name.clone(),
        cpu: resource(SettingName::Cpu, quantity::parse_cpu),
        mem: resource(SettingName::Mem, quantity::parse_memory_gib),
        replicas: snapshot.replicas,
        env,
        env_failures,
    }))
}

/// Read every declared env setting. Any failure disables env handling for
/// the whole component.
fn read_env(
    component: &ComponentSpec,
    container: &ContainerSnapshot,
) -> std::result::Result<BTreeMap<String, Option<String>>, Vec<TuningError>> {
    let mut values = BTreeMap::new();
    let mut failures = Vec::new();

    for setting in &component.env {
        match read_env_value(component, setting, container) {
            Ok(value) => {
                values.insert(setting.name.clone(), value);
            }
            Err(e) => failures.push(e),
        }
    }

    if failures.is_empty() {
        Ok(values)
    } else {
        Err(failures)
    }
}

fn read_env_value(
    component: &ComponentSpec,
    setting: &EnvSetting,
    container: &ContainerSnapshot,
) -> Result<Option<String>> {
    match container.env.get(&setting.name) {
        Some(EnvSource::Literal(value)) => {
            Ok(Some(strip_unit(value, setting.unit.as_deref()).to_string()))
        }
        Some(EnvSource::Indirect) => Err(TuningError::UnsupportedEnvSource {
            component: component.name.clone(),
            variable: setting.name.clone(),
        }),
        None if setting.required && setting.default.is_none() => {
            Err(TuningError::MissingEnvValue {
                component: component.name.clone(),
                variable: setting.name.clone(),
            })
        }
        None => Ok(None),
    }
}

/// Reads workload state through the orchestrator with bounded retries
pub struct StateReader<'a> {
    orchestrator: &'a dyn Orchestrator,
    retry: RetryPolicy,
}

impl<'a> StateReader<'a> {
    pub fn new(orchestrator: &'a dyn Orchestrator, retry: RetryPolicy) -> Self {
        Self {
            orchestrator,
            retry,
        }
    }

    /// Fetch a workload; `None` when it does not exist
    pub async fn read_workload(
        &self,
        namespace: &str,
        workload: &str,
    ) -> Result<Option<WorkloadSnapshot>> {
        debug!(namespace = %namespace, workload = %workload, "Reading deployment");
        self.retry
            .run("get_workload", || self.orchestrator.get_workload(namespace, workload))
            .await
            .map_err(|e| match e {
                OrchestratorError::Rejected(detail) | OrchestratorError::Transport(detail) => {
                    TuningError::Transport {
                        workload: workload.to_string(),
                        detail,
                    }
                }
            })
    }

    /// Read one component: its workload, then its declared settings
    pub async fn read_component(
        &self,
        namespace: &str,
        component: &ComponentSpec,
    ) -> Result<ReadOutcome> {
        let snapshot = self
            .read_workload(namespace, &component.workload)
            .await?
            .ok_or_else(|| TuningError::ComponentNotFound {
                component: component.name.clone(),
                workload: component.workload.clone(),
            })?;
        extract_state(component, &snapshot)
    }
}

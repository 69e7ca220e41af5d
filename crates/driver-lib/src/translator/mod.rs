//! Patch translation
//!
//! Turns declared settings, current component state and the optimizer's
//! target configuration into:
//! - a read-back report for every declared setting (always, pinned or not)
//! - one patch per workload (only when the cycle is enabled)
//!
//! Rules applied while building patches:
//! - pinned settings are never written
//! - targets equal to the current value produce no change
//! - values outside `[min, max]` are rejected, not clamped; `step` is not checked
//! - `cpu`/`mem` writes set the limit and the request to the same quantity
//! - all `replicas` targets within a workload must agree, otherwise the whole
//!   workload's patch is rejected
//! - two components writing different values to the same container field
//!   reject the whole workload's patch the same way
//! - an env setting with no live value gets its `default` when the target
//!   omits it

mod patch;

#[cfg(test)]
mod tests;

pub use patch::{limits_and_requests, ContainerPatch, WorkloadPatch};

use crate::error::TuningError;
use crate::models::{
    ComponentSpec, EnvKind, EnvSetting, Setting, SettingName, TargetConfiguration, VALUE_EPSILON,
};
use crate::quantity;
use crate::reader::ComponentState;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Reported current value and search space of one setting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingReport {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub pinned: bool,
    /// `null` when there is no current value
    pub value: Value,
}

/// Read-back and write failures of one component
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentTranslation {
    pub settings: BTreeMap<String, SettingReport>,
    pub failures: Vec<TuningError>,
}

/// Output of one translation pass
#[derive(Debug, Clone, Default)]
pub struct Translation {
    pub components: BTreeMap<String, ComponentTranslation>,
    /// Workload name to its patch, or the conflict that rejected it.
    /// Empty when the cycle is disabled.
    pub patches: BTreeMap<String, Result<WorkloadPatch, TuningError>>,
}

/// Build the read-back report for every declared setting of a component
pub fn report_settings(
    component: &ComponentSpec,
    state: &ComponentState,
) -> BTreeMap<String, SettingReport> {
    let mut reports = BTreeMap::new();

    for setting in &component.settings {
        let value = match setting.name {
            SettingName::Replicas => json!(state.replicas),
            name => state.value(name).map(|v| json!(v)).unwrap_or(Value::Null),
        };
        reports.insert(
            setting.name.to_string(),
            SettingReport {
                kind: "range",
                min: Some(setting.bounds.min),
                max: Some(setting.bounds.max),
                step: Some(setting.bounds.step),
                values: None,
                unit: None,
                pinned: setting.pinned,
                value,
            },
        );
    }

    for env in &component.env {
        // Env handling failed for this component
        let Some(current) = state.env.get(&env.name) else {
            continue;
        };
        let (min, max, step, values) = match &env.kind {
            EnvKind::Range(b) => (Some(b.min), Some(b.max), Some(b.step), None),
            EnvKind::Enum(values) => (None, None, None, Some(values.clone())),
        };
        let value = match (current, &env.kind) {
            (None, _) => Value::Null,
            (Some(v), EnvKind::Range(_)) => v
                .trim()
                .parse::<f64>()
                .map(|n| json!(n))
                .unwrap_or_else(|_| json!(v)),
            (Some(v), EnvKind::Enum(_)) => json!(v),
        };
        reports.insert(
            env.name.clone(),
            SettingReport {
                kind: env.kind.type_name(),
                min,
                max,
                step,
                values,
                unit: env.unit.clone(),
                pinned: env.pinned,
                value,
            },
        );
    }

    reports
}

/// Translates targets into per-workload patches
pub struct PatchTranslator<'a> {
    target: &'a TargetConfiguration,
    enabled: bool,
}

/// Container field a component writes to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Field {
    Resource(&'static str),
    Env(String),
}

impl Field {
    fn name(&self) -> &str {
        match self {
            Self::Resource(key) => key,
            Self::Env(name) => name,
        }
    }
}

/// Patch under construction for one workload
#[derive(Default)]
struct WorkloadDraft {
    current_replicas: Option<i32>,
    replica_proposals: Vec<(String, i32)>,
    /// (container, field) to every (component, value) written there
    writes: BTreeMap<(String, Field), Vec<(String, String)>>,
}

impl WorkloadDraft {
    fn write(&mut self, component: &str, container: &str, field: Field, value: String) {
        self.writes
            .entry((container.to_string(), field))
            .or_default()
            .push((component.to_string(), value));
    }
}

impl<'a> PatchTranslator<'a> {
    pub fn new(target: &'a TargetConfiguration, enabled: bool) -> Self {
        Self { target, enabled }
    }

    /// Translate every resolved component.
    ///
    /// All components of a workload must be passed together so the replica
    /// consistency check sees every sibling.
    pub fn translate(&self, resolved: &[(&ComponentSpec, &ComponentState)]) -> Translation {
        let mut translation = Translation::default();
        let mut drafts: BTreeMap<String, WorkloadDraft> = BTreeMap::new();

        for (component, state) in resolved {
            let mut result = ComponentTranslation {
                settings: report_settings(component, state),
                failures: Vec::new(),
            };

            if self.enabled {
                let draft = drafts.entry(component.workload.clone()).or_default();
                draft.current_replicas = Some(state.replicas);
                self.translate_component(component, state, draft, &mut result.failures);
            }

            translation.components.insert(component.name.clone(), result);
        }

        for (workload, draft) in drafts {
            let patch = finish_workload(&workload, draft);
            translation.patches.insert(workload, patch);
        }

        translation
    }

    fn translate_component(
        &self,
        component: &ComponentSpec,
        state: &ComponentState,
        draft: &mut WorkloadDraft,
        failures: &mut Vec<TuningError>,
    ) {
        for setting in &component.settings {
            if setting.pinned {
                continue;
            }
            let Some(raw) = self.target.get(&component.name, setting.name.as_str()) else {
                continue;
            };
            if let Err(e) = self.translate_setting(component, state, setting, raw, draft) {
                failures.push(e);
            }
        }

        for env in &component.env {
            if env.pinned {
                continue;
            }
            // Env handling failed while reading
            let Some(current) = state.env.get(&env.name) else {
                continue;
            };
            let raw = self.target.get(&component.name, &env.name);
            match env_write(component, env, current.as_deref(), raw) {
                Ok(Some(literal)) => {
                    debug!(component = %component.name, variable = %env.name, value = %literal, "Env write");
                    draft.write(&component.name, &state.container, Field::Env(env.name.clone()), literal);
                }
                Ok(None) => {}
                Err(e) => failures.push(e),
            }
        }
    }

    fn translate_setting(
        &self,
        component: &ComponentSpec,
        state: &ComponentState,
        setting: &Setting,
        raw: &Value,
        draft: &mut WorkloadDraft,
    ) -> Result<(), TuningError> {
        let value = target_number(component, setting.name.as_str(), raw)?;

        if setting.name == SettingName::Replicas {
            let replicas = integral(component, raw, value)?;
            // An unchanged replica count still takes part in the consistency check
            if replicas != state.replicas {
                check_bounds(component, setting, value)?;
            }
            draft
                .replica_proposals
                .push((component.name.clone(), replicas));
            return Ok(());
        }

        if let Some(current) = state.value(setting.name) {
            if (current - value).abs() < VALUE_EPSILON {
                return Ok(());
            }
        }
        check_bounds(component, setting, value)?;

        let formatted = match setting.name {
            SettingName::Cpu => quantity::format_cpu(value),
            _ => quantity::format_memory_gib(value),
        };
        if let Some(key) = setting.name.resource_key() {
            draft.write(&component.name, &state.container, Field::Resource(key), formatted);
        }
        Ok(())
    }
}

fn finish_workload(workload: &str, draft: WorkloadDraft) -> Result<WorkloadPatch, TuningError> {
    let WorkloadDraft {
        current_replicas,
        replica_proposals,
        writes,
    } = draft;
    let mut patch = WorkloadPatch::new();

    let mut distinct: Vec<i32> = replica_proposals.iter().map(|(_, r)| *r).collect();
    distinct.sort_unstable();
    distinct.dedup();

    match distinct.as_slice() {
        [] => {}
        [replicas] => {
            if current_replicas != Some(*replicas) {
                patch.replicas = Some(*replicas);
            }
        }
        _ => {
            return Err(TuningError::ReplicaConflict {
                workload: workload.to_string(),
                proposals: replica_proposals,
            })
        }
    }

    for ((container, field), proposals) in writes {
        let agreed = match proposals.as_slice() {
            [(_, first), rest @ ..] if rest.iter().all(|(_, v)| v == first) => Some(first.clone()),
            _ => None,
        };
        let Some(value) = agreed else {
            return Err(TuningError::WriteConflict {
                workload: workload.to_string(),
                container,
                setting: field.name().to_string(),
                proposals,
            });
        };
        match field {
            Field::Resource(key) => patch.set_resource(&container, key, value),
            Field::Env(name) => patch.set_env(&container, &name, value),
        }
    }

    Ok(patch)
}

fn check_bounds(component: &ComponentSpec, setting: &Setting, value: f64) -> Result<(), TuningError> {
    if setting.bounds.contains(value) {
        Ok(())
    } else {
        Err(TuningError::OutOfRange {
            component: component.name.clone(),
            setting: setting.name.to_string(),
            value: quantity::format_number(value),
            allowed: setting.bounds.describe(),
        })
    }
}

fn target_number(component: &ComponentSpec, setting: &str, raw: &Value) -> Result<f64, TuningError> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| TuningError::InvalidTargetValue {
            component: component.name.clone(),
            setting: setting.to_string(),
            reason: format!("expected a number, got {}", raw),
        })
}

fn integral(component: &ComponentSpec, raw: &Value, value: f64) -> Result<i32, TuningError> {
    if value.fract().abs() > VALUE_EPSILON || value < 0.0 || value > f64::from(i32::MAX) {
        return Err(TuningError::InvalidTargetValue {
            component: component.name.clone(),
            setting: SettingName::Replicas.to_string(),
            reason: format!("expected a non-negative whole number, got {}", raw),
        });
    }
    Ok(value.round() as i32)
}

/// Decide the literal (unit appended) to write for one env setting, or
/// `None` when nothing should be written
fn env_write(
    component: &ComponentSpec,
    env: &EnvSetting,
    current: Option<&str>,
    raw: Option<&Value>,
) -> Result<Option<String>, TuningError> {
    let value = match raw {
        Some(raw) => {
            if let (Some(current), Some(target)) = (current, env_literal(raw)) {
                if env_values_equal(&env.kind, current, &target) {
                    return Ok(None);
                }
            }
            env_target(component, env, raw)?
        }
        None => match (current, &env.default) {
            // First adjustment: fill in the declared default
            (None, Some(default)) => default.clone(),
            _ => return Ok(None),
        },
    };

    if let Some(current) = current {
        if env_values_equal(&env.kind, current, &value) {
            return Ok(None);
        }
    }

    let literal = match env.unit.as_deref() {
        Some(unit) => format!("{}{}", value, unit),
        None => value,
    };
    Ok(Some(literal))
}

/// Validate an env target and render it without its unit
fn env_target(component: &ComponentSpec, env: &EnvSetting, raw: &Value) -> Result<String, TuningError> {
    match &env.kind {
        EnvKind::Range(bounds) => {
            let value = target_number(component, &env.name, raw)?;
            if !bounds.contains(value) {
                return Err(TuningError::OutOfRange {
                    component: component.name.clone(),
                    setting: env.name.clone(),
                    value: quantity::format_number(value),
                    allowed: bounds.describe(),
                });
            }
            Ok(quantity::format_number(value))
        }
        EnvKind::Enum(values) => {
            let value = match raw {
                Value::String(s) => s.clone(),
                Value::Number(_) | Value::Bool(_) => raw.to_string(),
                _ => {
                    return Err(TuningError::InvalidTargetValue {
                        component: component.name.clone(),
                        setting: env.name.clone(),
                        reason: format!("expected a string, got {}", raw),
                    })
                }
            };
            if !values.contains(&value) {
                return Err(TuningError::OutOfRange {
                    component: component.name.clone(),
                    setting: env.name.clone(),
                    value,
                    allowed: format!("one of [{}]", values.join(", ")),
                });
            }
            Ok(value)
        }
    }
}

fn env_literal(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(_) | Value::Bool(_) => Some(raw.to_string()),
        _ => None,
    }
}

fn env_values_equal(kind: &EnvKind, current: &str, value: &str) -> bool {
    match kind {
        EnvKind::Range(_) => match (current.trim().parse::<f64>(), value.parse::<f64>()) {
            (Ok(a), Ok(b)) => (a - b).abs() < VALUE_EPSILON,
            _ => current == value,
        },
        EnvKind::Enum(_) => current == value,
    }
}

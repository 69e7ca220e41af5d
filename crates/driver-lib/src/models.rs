//! Core data models for the tuning driver
//!
//! Declared settings (validated at construction), the orchestrator's view of
//! a Deployment, and the optimizer's target configuration for one cycle.

use crate::error::{Result, TuningError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tunable resource dimension of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingName {
    Cpu,
    Mem,
    Replicas,
}

impl SettingName {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "cpu" => Some(Self::Cpu),
            "mem" => Some(Self::Mem),
            "replicas" => Some(Self::Replicas),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Mem => "mem",
            Self::Replicas => "replicas",
        }
    }

    /// Key of the matching entry in a container's resource limits/requests
    pub fn resource_key(&self) -> Option<&'static str> {
        match self {
            Self::Cpu => Some("cpu"),
            Self::Mem => Some("memory"),
            Self::Replicas => None,
        }
    }
}

impl std::fmt::Display for SettingName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric search range shared by resource settings and range env settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeBounds {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

/// Tolerance used when comparing float settings
pub const VALUE_EPSILON: f64 = 1e-9;

impl RangeBounds {
    /// Validate `min <= max` and `step > 0`; `reason` on failure
    pub fn new(min: f64, max: f64, step: f64) -> std::result::Result<Self, String> {
        if !min.is_finite() || !max.is_finite() || !step.is_finite() {
            return Err("min, max and step must be finite numbers".to_string());
        }
        if min > max {
            return Err(format!("min {} is greater than max {}", min, max));
        }
        if step <= 0.0 {
            return Err(format!("step must be positive, got {}", step));
        }
        Ok(Self { min, max, step })
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min - VALUE_EPSILON && value <= self.max + VALUE_EPSILON
    }

    pub fn describe(&self) -> String {
        format!("min {}, max {}", self.min, self.max)
    }
}

/// One declared resource setting (`cpu`, `mem` or `replicas`)
#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    pub name: SettingName,
    pub bounds: RangeBounds,
    /// Reported but never written
    pub pinned: bool,
}

/// Kind of a tunable environment variable
#[derive(Debug, Clone, PartialEq)]
pub enum EnvKind {
    Range(RangeBounds),
    Enum(Vec<String>),
}

impl EnvKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Range(_) => "range",
            Self::Enum(_) => "enum",
        }
    }
}

/// One declared environment variable setting
#[derive(Debug, Clone, PartialEq)]
pub struct EnvSetting {
    pub name: String,
    pub kind: EnvKind,
    /// Suffix appended on write and stripped on read
    pub unit: Option<String>,
    /// Literal written on the first adjustment when no live value exists
    pub default: Option<String>,
    pub pinned: bool,
    /// A missing live value with no default is an error instead of "absent"
    pub required: bool,
}

impl EnvSetting {
    /// Build a validated env setting.
    ///
    /// `kind` must be `range` or `enum`; a range needs `min`, `max` and
    /// `step`, an enum needs a non-empty `values` list. A declared default
    /// must itself be an acceptable value.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        component: &str,
        name: &str,
        kind: &str,
        min: Option<f64>,
        max: Option<f64>,
        step: Option<f64>,
        values: Option<Vec<String>>,
        unit: Option<String>,
        default: Option<String>,
        pinned: bool,
        required: bool,
    ) -> Result<Self> {
        let invalid = |reason: String| TuningError::InvalidSettingSpec {
            component: component.to_string(),
            setting: name.to_string(),
            reason,
        };

        let kind = match kind {
            "range" => {
                let (min, max, step) = match (min, max, step) {
                    (Some(min), Some(max), Some(step)) => (min, max, step),
                    _ => {
                        return Err(invalid(
                            "range setting requires min, max and step".to_string(),
                        ))
                    }
                };
                EnvKind::Range(RangeBounds::new(min, max, step).map_err(invalid)?)
            }
            "enum" => match values {
                Some(values) if !values.is_empty() => EnvKind::Enum(values),
                _ => return Err(invalid("enum setting requires a non-empty values list".to_string())),
            },
            other => {
                return Err(invalid(format!(
                    "unknown type '{}', expected 'range' or 'enum'",
                    other
                )))
            }
        };

        if let Some(default) = &default {
            match &kind {
                EnvKind::Range(bounds) => {
                    let parsed: f64 = default
                        .parse()
                        .map_err(|_| invalid(format!("default '{}' is not a number", default)))?;
                    if !bounds.contains(parsed) {
                        return Err(invalid(format!(
                            "default {} is outside {}",
                            default,
                            bounds.describe()
                        )));
                    }
                }
                EnvKind::Enum(values) => {
                    if !values.contains(default) {
                        return Err(invalid(format!(
                            "default '{}' is not one of the allowed values",
                            default
                        )));
                    }
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            kind,
            unit,
            default,
            pinned,
            required,
        })
    }
}

/// A tunable unit: one Deployment and one of its containers
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSpec {
    /// `<workload>` or `<workload>/<container>`
    pub name: String,
    pub workload: String,
    /// `None` selects the first declared container
    pub container: Option<String>,
    pub settings: Vec<Setting>,
    pub env: Vec<EnvSetting>,
}

impl ComponentSpec {
    /// Split a component name into workload and optional container
    pub fn parse_name(name: &str) -> Result<(String, Option<String>)> {
        let invalid = || TuningError::Config(format!("invalid component name '{}'", name));
        match name.split_once('/') {
            Some((workload, container)) => {
                if workload.is_empty() || container.is_empty() || container.contains('/') {
                    return Err(invalid());
                }
                Ok((workload.to_string(), Some(container.to_string())))
            }
            None if name.is_empty() => Err(invalid()),
            None => Ok((name.to_string(), None)),
        }
    }

    pub fn setting(&self, name: SettingName) -> Option<&Setting> {
        self.settings.iter().find(|s| s.name == name)
    }
}

/// Source of an environment variable on a live container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvSource {
    /// Plain `value`
    Literal(String),
    /// `valueFrom` (secret, config map, field or resource reference)
    Indirect,
}

/// One container of a Deployment's pod template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub name: String,
    /// `None` when the container declares no limits at all
    pub limits: Option<BTreeMap<String, String>>,
    pub requests: Option<BTreeMap<String, String>>,
    pub env: BTreeMap<String, EnvSource>,
}

/// The orchestrator's current view of a Deployment, read fresh every cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSnapshot {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub replicas: i32,
    pub containers: Vec<ContainerSnapshot>,
}

/// Label that excludes a Deployment from tuning
pub const EXCLUDE_LABEL: &str = "optune.ai/exclude";

impl WorkloadSnapshot {
    /// True when the exclusion label is present with a truthy value
    pub fn is_excluded(&self) -> bool {
        self.labels
            .get(EXCLUDE_LABEL)
            .map(|value| {
                matches!(
                    value.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes"
                )
            })
            .unwrap_or(false)
    }
}

/// Optimizer-proposed values for one cycle, keyed by component then setting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetConfiguration {
    components: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl TargetConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the optimizer input document.
    ///
    /// Accepts `{"application": {"components": {<name>: {"settings":
    /// {<setting>: {"value": v}}}}}}`; a bare `v` in place of `{"value": v}`
    /// is accepted too. Components or settings without a value are ignored.
    pub fn from_input(input: &serde_json::Value) -> Result<Self> {
        let mut target = Self::new();
        let components = match input
            .get("application")
            .and_then(|app| app.get("components"))
        {
            Some(serde_json::Value::Object(components)) => components,
            Some(_) => {
                return Err(TuningError::Config(
                    "input 'application.components' must be an object".to_string(),
                ))
            }
            None => return Ok(target),
        };

        for (component, body) in components {
            let Some(settings) = body.get("settings").and_then(|s| s.as_object()) else {
                continue;
            };
            for (setting, entry) in settings {
                let value = match entry {
                    serde_json::Value::Object(map) => match map.get("value") {
                        Some(value) => value.clone(),
                        None => continue,
                    },
                    other => other.clone(),
                };
                if value.is_null() {
                    continue;
                }
                target.set(component, setting, value);
            }
        }

        Ok(target)
    }

    pub fn set(&mut self, component: &str, setting: &str, value: serde_json::Value) {
        self.components
            .entry(component.to_string())
            .or_default()
            .insert(setting.to_string(), value);
    }

    pub fn get(&self, component: &str, setting: &str) -> Option<&serde_json::Value> {
        self.components.get(component)?.get(setting)
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_range_bounds_validation() {
        assert!(RangeBounds::new(0.1, 2.0, 0.1).is_ok());
        assert!(RangeBounds::new(1.0, 1.0, 1.0).is_ok());
        assert!(RangeBounds::new(2.0, 1.0, 0.1).is_err());
        assert!(RangeBounds::new(0.1, 2.0, 0.0).is_err());
        assert!(RangeBounds::new(0.1, 2.0, -1.0).is_err());
    }

    #[test]
    fn test_env_setting_range_requires_bounds() {
        let err = EnvSetting::new(
            "web", "DELAY", "range", Some(1.0), None, Some(1.0), None, None, None, false, false,
        )
        .unwrap_err();
        assert!(matches!(err, TuningError::InvalidSettingSpec { ref setting, .. } if setting == "DELAY"));
    }

    #[test]
    fn test_env_setting_rejects_unknown_kind() {
        let err = EnvSetting::new(
            "web", "DELAY", "list", None, None, None, None, None, None, false, false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown type 'list'"));
    }

    #[test]
    fn test_env_setting_enum_requires_values() {
        let result = EnvSetting::new(
            "web",
            "GC",
            "enum",
            None,
            None,
            None,
            Some(vec![]),
            None,
            None,
            false,
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_env_setting_default_must_be_allowed() {
        let result = EnvSetting::new(
            "web",
            "GC",
            "enum",
            None,
            None,
            None,
            Some(vec!["G1GC".to_string(), "ParallelGC".to_string()]),
            None,
            Some("SerialGC".to_string()),
            false,
            false,
        );
        assert!(result.is_err());

        let result = EnvSetting::new(
            "web",
            "DELAY",
            "range",
            Some(1.0),
            Some(10.0),
            Some(1.0),
            None,
            None,
            Some("20".to_string()),
            false,
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_component_name_parsing() {
        assert_eq!(
            ComponentSpec::parse_name("web").unwrap(),
            ("web".to_string(), None)
        );
        assert_eq!(
            ComponentSpec::parse_name("web/nginx").unwrap(),
            ("web".to_string(), Some("nginx".to_string()))
        );
        assert!(ComponentSpec::parse_name("web/").is_err());
        assert!(ComponentSpec::parse_name("/nginx").is_err());
        assert!(ComponentSpec::parse_name("a/b/c").is_err());
        assert!(ComponentSpec::parse_name("").is_err());
    }

    #[test]
    fn test_exclusion_label_truthiness() {
        let mut snapshot = WorkloadSnapshot::default();
        assert!(!snapshot.is_excluded());

        snapshot
            .labels
            .insert(EXCLUDE_LABEL.to_string(), "1".to_string());
        assert!(snapshot.is_excluded());

        snapshot
            .labels
            .insert(EXCLUDE_LABEL.to_string(), "True".to_string());
        assert!(snapshot.is_excluded());

        snapshot
            .labels
            .insert(EXCLUDE_LABEL.to_string(), "0".to_string());
        assert!(!snapshot.is_excluded());
    }

    #[test]
    fn test_target_configuration_from_input() {
        let input = json!({
            "application": {
                "components": {
                    "web": {"settings": {"cpu": {"value": 0.5}, "replicas": 3}},
                    "db": {"settings": {"mem": {"min": 1}}},
                    "cache": {}
                }
            },
            "user_data": {"deploy": true}
        });

        let target = TargetConfiguration::from_input(&input).unwrap();
        assert_eq!(target.get("web", "cpu"), Some(&json!(0.5)));
        assert_eq!(target.get("web", "replicas"), Some(&json!(3)));
        assert_eq!(target.get("db", "mem"), None);
        assert_eq!(target.get("cache", "cpu"), None);
    }

    #[test]
    fn test_target_configuration_missing_application() {
        let target = TargetConfiguration::from_input(&json!({})).unwrap();
        assert!(target.is_empty());

        let err = TargetConfiguration::from_input(&json!({"application": {"components": []}}));
        assert!(err.is_err());
    }
}

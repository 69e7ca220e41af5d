//! Tuning declaration and application resolution
//!
//! The declaration is a YAML document with one section per driver. The
//! section is looked up under `k8s`, or under the driver's executable name
//! when driver-name-keyed lookup is enabled:
//!
//! ```yaml
//! k8s:
//!   application:
//!     components:
//!       web/main:
//!         settings:
//!           cpu: {min: 0.1, max: 2, step: 0.1}
//!           mem: {min: 0.125, max: 4, step: 0.125, pinned: true}
//!           replicas: {min: 1, max: 8, step: 1}
//!         env:
//!           GC_PAUSE: {type: range, min: 5, max: 200, step: 5, unit: ms, default: 20}
//!           LOG_LEVEL: {type: enum, values: [info, debug]}
//!   adjust_on: data.user_data.deploy_to == "canary"
//! ```

use crate::enablement::Expression;
use crate::error::{Result, TuningError};
use crate::models::{ComponentSpec, EnvSetting, RangeBounds, Setting, SettingName};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Section name used unless driver-name-keyed lookup is enabled
pub const DEFAULT_CONFIG_KEY: &str = "k8s";

/// Process-wide flags that shape application resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppFlags {
    /// Tune `default_namespace` instead of the namespace named by the app id
    pub use_default_namespace: bool,
    pub default_namespace: String,
    /// Declaration section to read
    pub config_key: String,
}

impl Default for AppFlags {
    fn default() -> Self {
        Self {
            use_default_namespace: false,
            default_namespace: "default".to_string(),
            config_key: DEFAULT_CONFIG_KEY.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSection {
    application: RawApplication,
    #[serde(default)]
    adjust_on: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawApplication {
    #[serde(default)]
    components: BTreeMap<String, RawComponent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawComponent {
    #[serde(default)]
    settings: BTreeMap<String, RawSetting>,
    #[serde(default)]
    env: BTreeMap<String, RawEnvSetting>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSetting {
    min: Option<f64>,
    max: Option<f64>,
    step: Option<f64>,
    #[serde(default)]
    pinned: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnvSetting {
    #[serde(rename = "type", default = "default_env_type")]
    kind: String,
    min: Option<f64>,
    max: Option<f64>,
    step: Option<f64>,
    values: Option<Vec<serde_yaml::Value>>,
    unit: Option<String>,
    default: Option<serde_yaml::Value>,
    #[serde(default)]
    pinned: bool,
    #[serde(default)]
    required: bool,
}

fn default_env_type() -> String {
    "range".to_string()
}

/// A parsed declaration document, possibly holding sections for several drivers
#[derive(Debug, Clone)]
pub struct Declaration {
    document: serde_yaml::Mapping,
}

impl Declaration {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| TuningError::Config(format!("invalid YAML: {}", e)))?;
        match document {
            serde_yaml::Value::Mapping(document) => Ok(Self { document }),
            serde_yaml::Value::Null => Ok(Self {
                document: serde_yaml::Mapping::new(),
            }),
            _ => Err(TuningError::Config(
                "declaration must be a mapping of driver sections".to_string(),
            )),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TuningError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded tuning declaration");
        Self::from_yaml_str(&text)
    }

    fn section(&self, key: &str) -> Result<RawSection> {
        let section = self
            .document
            .get(key)
            .ok_or_else(|| TuningError::Config(format!("no '{}' section in declaration", key)))?;
        serde_yaml::from_value(section.clone())
            .map_err(|e| TuningError::Config(format!("invalid '{}' section: {}", key, e)))
    }
}

/// The tuning scope: a namespace, its components and the enablement gate
#[derive(Debug, Clone)]
pub struct Application {
    pub namespace: String,
    pub components: Vec<ComponentSpec>,
    pub adjust_on: Option<Expression>,
}

impl Application {
    /// Resolve the application from the supplied id, process flags and
    /// declaration. In default-namespace mode the id is ignored.
    pub fn resolve(
        app_id: Option<&str>,
        flags: &AppFlags,
        declaration: &Declaration,
    ) -> Result<Self> {
        let namespace = if flags.use_default_namespace {
            flags.default_namespace.clone()
        } else {
            match app_id.map(str::trim) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => {
                    return Err(TuningError::Config(
                        "an application id is required unless the default namespace is used"
                            .to_string(),
                    ))
                }
            }
        };

        let section = declaration.section(&flags.config_key)?;
        let components = section
            .application
            .components
            .into_iter()
            .map(|(name, raw)| build_component(&name, raw))
            .collect::<Result<Vec<_>>>()?;

        let adjust_on = section
            .adjust_on
            .as_deref()
            .filter(|source| !source.trim().is_empty())
            .map(|source| {
                Expression::parse(source).map_err(|e| {
                    TuningError::Config(format!("invalid adjust_on expression: {}", e))
                })
            })
            .transpose()?;

        Ok(Self {
            namespace,
            components,
            adjust_on,
        })
    }

    /// Distinct workload names in declaration order
    pub fn workloads(&self) -> Vec<&str> {
        let mut workloads: Vec<&str> = Vec::new();
        for component in &self.components {
            if !workloads.contains(&component.workload.as_str()) {
                workloads.push(&component.workload);
            }
        }
        workloads
    }
}

fn build_component(name: &str, raw: RawComponent) -> Result<ComponentSpec> {
    let (workload, container) = ComponentSpec::parse_name(name)?;

    let settings = raw
        .settings
        .into_iter()
        .map(|(key, setting)| build_setting(name, &key, setting))
        .collect::<Result<Vec<_>>>()?;

    let env = raw
        .env
        .into_iter()
        .map(|(var, setting)| {
            EnvSetting::new(
                name,
                &var,
                &setting.kind,
                setting.min,
                setting.max,
                setting.step,
                setting
                    .values
                    .map(|values| values.iter().map(scalar_string).collect::<Result<_>>())
                    .transpose()
                    .map_err(|e| invalid_env(name, &var, e))?,
                setting.unit,
                setting
                    .default
                    .as_ref()
                    .map(scalar_string)
                    .transpose()
                    .map_err(|e| invalid_env(name, &var, e))?,
                setting.pinned,
                setting.required,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ComponentSpec {
        name: name.to_string(),
        workload,
        container,
        settings,
        env,
    })
}

fn build_setting(component: &str, key: &str, raw: RawSetting) -> Result<Setting> {
    let invalid = |reason: String| TuningError::InvalidSettingSpec {
        component: component.to_string(),
        setting: key.to_string(),
        reason,
    };

    let name = SettingName::parse(key).ok_or_else(|| {
        invalid("unknown setting, expected one of cpu, mem, replicas".to_string())
    })?;
    let (min, max, step) = match (raw.min, raw.max, raw.step) {
        (Some(min), Some(max), Some(step)) => (min, max, step),
        _ => return Err(invalid("min, max and step are required".to_string())),
    };
    let bounds = RangeBounds::new(min, max, step).map_err(invalid)?;

    Ok(Setting {
        name,
        bounds,
        pinned: raw.pinned,
    })
}

/// Env values and defaults may be written as YAML numbers or strings
fn scalar_string(value: &serde_yaml::Value) -> Result<String> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(TuningError::Config(format!(
            "expected a scalar, got {:?}",
            other
        ))),
    }
}

fn invalid_env(component: &str, var: &str, error: TuningError) -> TuningError {
    TuningError::InvalidSettingSpec {
        component: component.to_string(),
        setting: var.to_string(),
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnvKind;
    use std::io::Write;

    const DECLARATION: &str = r#"
k8s:
  application:
    components:
      web:
        settings:
          cpu: {min: 0.1, max: 2, step: 0.1}
          mem: {min: 0.125, max: 4, step: 0.125, pinned: true}
          replicas: {min: 1, max: 8, step: 1}
      web/sidecar:
        env:
          GC_PAUSE: {type: range, min: 5, max: 200, step: 5, unit: ms, default: 20}
          LOG_LEVEL: {type: enum, values: [info, debug], default: info}
  adjust_on: data.user_data.deploy_to == "canary"
k8s-canary:
  application:
    components:
      api:
        settings:
          replicas: {min: 1, max: 3, step: 1}
"#;

    fn declaration() -> Declaration {
        Declaration::from_yaml_str(DECLARATION).unwrap()
    }

    fn section_with(component: &str) -> Declaration {
        Declaration::from_yaml_str(&format!(
            "k8s:\n  application:\n    components:\n{}",
            component
        ))
        .unwrap()
    }

    #[test]
    fn test_resolve_uses_app_id_as_namespace() {
        let app = Application::resolve(Some("shop"), &AppFlags::default(), &declaration()).unwrap();

        assert_eq!(app.namespace, "shop");
        assert_eq!(app.components.len(), 2);
        assert!(app.adjust_on.is_some());
        assert_eq!(app.workloads(), vec!["web"]);

        let web = &app.components[0];
        assert_eq!(web.name, "web");
        assert_eq!(web.container, None);
        assert!(web.setting(SettingName::Mem).unwrap().pinned);
        assert_eq!(web.setting(SettingName::Cpu).unwrap().bounds.max, 2.0);

        let sidecar = &app.components[1];
        assert_eq!(sidecar.workload, "web");
        assert_eq!(sidecar.container.as_deref(), Some("sidecar"));
        let pause = sidecar.env.iter().find(|e| e.name == "GC_PAUSE").unwrap();
        assert_eq!(pause.default.as_deref(), Some("20"));
        assert_eq!(pause.unit.as_deref(), Some("ms"));
        let level = sidecar.env.iter().find(|e| e.name == "LOG_LEVEL").unwrap();
        assert_eq!(
            level.kind,
            EnvKind::Enum(vec!["info".to_string(), "debug".to_string()])
        );
    }

    #[test]
    fn test_default_namespace_mode_ignores_app_id() {
        let flags = AppFlags {
            use_default_namespace: true,
            default_namespace: "tuning".to_string(),
            ..AppFlags::default()
        };
        let app = Application::resolve(None, &flags, &declaration()).unwrap();
        assert_eq!(app.namespace, "tuning");
    }

    #[test]
    fn test_missing_app_id_is_config_error() {
        let err = Application::resolve(Some("  "), &AppFlags::default(), &declaration()).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_driver_name_keyed_section() {
        let flags = AppFlags {
            config_key: "k8s-canary".to_string(),
            ..AppFlags::default()
        };
        let app = Application::resolve(Some("shop"), &flags, &declaration()).unwrap();
        assert_eq!(app.components.len(), 1);
        assert_eq!(app.components[0].name, "api");
        assert!(app.adjust_on.is_none());

        let flags = AppFlags {
            config_key: "missing".to_string(),
            ..AppFlags::default()
        };
        assert!(matches!(
            Application::resolve(Some("shop"), &flags, &declaration()),
            Err(TuningError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_setting_name_is_invalid_spec() {
        let declaration = section_with("      web:\n        settings:\n          disk: {min: 1, max: 2, step: 1}\n");
        let err = Application::resolve(Some("shop"), &AppFlags::default(), &declaration).unwrap_err();
        assert_eq!(err.kind(), "invalid_setting_spec");
        assert_eq!(err.setting(), Some("disk"));
    }

    #[test]
    fn test_invalid_bounds_are_rejected() {
        for setting in [
            "cpu: {min: 2, max: 1, step: 0.1}",
            "cpu: {min: 0.1, max: 1, step: 0}",
            "cpu: {min: 0.1, max: 1}",
        ] {
            let declaration =
                section_with(&format!("      web:\n        settings:\n          {}\n", setting));
            let err =
                Application::resolve(Some("shop"), &AppFlags::default(), &declaration).unwrap_err();
            assert_eq!(err.kind(), "invalid_setting_spec", "{}", setting);
        }
    }

    #[test]
    fn test_invalid_env_declarations() {
        for env in [
            "X: {type: list, values: [a]}",
            "X: {type: enum, values: []}",
            "X: {type: range, min: 1, max: 5}",
            "X: {type: range, min: 1, max: 5, step: 1, default: 9}",
        ] {
            let declaration =
                section_with(&format!("      web:\n        env:\n          {}\n", env));
            let err =
                Application::resolve(Some("shop"), &AppFlags::default(), &declaration).unwrap_err();
            assert_eq!(err.kind(), "invalid_setting_spec", "{}", env);
            assert_eq!(err.component(), Some("web"));
        }
    }

    #[test]
    fn test_invalid_expression_is_config_error() {
        let text = "k8s:\n  application:\n    components: {}\n  adjust_on: data.x ==\n";
        let declaration = Declaration::from_yaml_str(text).unwrap();
        let err = Application::resolve(Some("shop"), &AppFlags::default(), &declaration).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DECLARATION.as_bytes()).unwrap();

        let declaration = Declaration::load(file.path()).unwrap();
        let app = Application::resolve(Some("shop"), &AppFlags::default(), &declaration).unwrap();
        assert_eq!(app.components.len(), 2);

        assert!(matches!(
            Declaration::load("/nonexistent/config.yaml"),
            Err(TuningError::Config(_))
        ));
    }

    #[test]
    fn test_non_mapping_document_is_rejected() {
        assert!(Declaration::from_yaml_str("- a\n- b\n").is_err());
    }
}

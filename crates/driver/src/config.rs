//! Driver process configuration
//!
//! Process-wide flags come from `OPTUNE_*` environment variables and are
//! turned into explicit structs for the library.

use anyhow::{Context, Result};
use driver_lib::config::DEFAULT_CONFIG_KEY;
use driver_lib::{AppFlags, RetryPolicy};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "OPTUNE";

/// Driver configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    /// Tune `default_namespace` instead of the namespace named by the app id
    #[serde(default)]
    pub use_default_namespace: bool,

    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    /// Look up the declaration section under the executable name instead of `k8s`
    #[serde(default)]
    pub use_driver_name: bool,

    /// Path to the YAML tuning declaration
    #[serde(default = "default_config_path")]
    pub config_path: String,

    #[serde(default = "default_attempts")]
    pub read_attempts: u32,

    #[serde(default = "default_attempts")]
    pub write_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_config_path() -> String {
    "./config.yaml".to_string()
}

fn default_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl DriverConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_source(None)
    }

    /// Load from an explicit variable map instead of the process environment
    pub fn from_source(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(vars),
            )
            .build()
            .context("Failed to read driver environment")?;

        config
            .try_deserialize()
            .context("Invalid OPTUNE_* driver settings")
    }

    /// Flags for application resolution. `executable` is the driver's
    /// invocation path, used as the declaration key when requested.
    pub fn app_flags(&self, executable: Option<&str>) -> AppFlags {
        let config_key = if self.use_driver_name {
            executable
                .and_then(|exe| Path::new(exe).file_stem())
                .and_then(|stem| stem.to_str())
                .filter(|stem| !stem.is_empty())
                .unwrap_or(DEFAULT_CONFIG_KEY)
                .to_string()
        } else {
            DEFAULT_CONFIG_KEY.to_string()
        };

        AppFlags {
            use_default_namespace: self.use_default_namespace,
            default_namespace: self.default_namespace.clone(),
            config_key,
        }
    }

    pub fn read_retry(&self) -> RetryPolicy {
        self.retry(self.read_attempts)
    }

    pub fn write_retry(&self) -> RetryPolicy {
        self.retry(self.write_attempts)
    }

    fn retry(&self, attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let config = DriverConfig::from_source(vars(&[])).unwrap();

        assert!(!config.use_default_namespace);
        assert_eq!(config.default_namespace, "default");
        assert_eq!(config.config_path, "./config.yaml");
        assert_eq!(config.read_retry(), RetryPolicy::default());
        assert_eq!(config.app_flags(Some("/usr/bin/k8s-canary")).config_key, "k8s");
    }

    #[test]
    fn test_environment_overrides() {
        let config = DriverConfig::from_source(vars(&[
            ("OPTUNE_USE_DEFAULT_NAMESPACE", "true"),
            ("OPTUNE_DEFAULT_NAMESPACE", "tuning"),
            ("OPTUNE_USE_DRIVER_NAME", "true"),
            ("OPTUNE_CONFIG_PATH", "/etc/optune/config.yaml"),
            ("OPTUNE_WRITE_ATTEMPTS", "1"),
            ("OPTUNE_INITIAL_BACKOFF_MS", "100"),
        ]))
        .unwrap();

        let flags = config.app_flags(Some("/usr/local/bin/k8s-canary"));
        assert!(flags.use_default_namespace);
        assert_eq!(flags.default_namespace, "tuning");
        assert_eq!(flags.config_key, "k8s-canary");
        assert_eq!(config.config_path, "/etc/optune/config.yaml");

        let write = config.write_retry();
        assert_eq!(write.max_attempts, 1);
        assert_eq!(write.initial_backoff, Duration::from_millis(100));
        assert_eq!(config.read_retry().max_attempts, 3);
    }

    #[test]
    fn test_driver_name_falls_back_to_default_key() {
        let config = DriverConfig::from_source(vars(&[("OPTUNE_USE_DRIVER_NAME", "true")])).unwrap();
        assert_eq!(config.app_flags(None).config_key, "k8s");
    }
}

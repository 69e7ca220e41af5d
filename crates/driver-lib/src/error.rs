//! Error taxonomy for the tuning driver
//!
//! Failures are scoped to the smallest unit possible: one setting of one
//! component, one component, or one workload's patch. Each variant carries
//! the names needed to attribute it in the cycle summary.

use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, TuningError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TuningError {
    #[error("invalid setting '{setting}' for component '{component}': {reason}")]
    InvalidSettingSpec {
        component: String,
        setting: String,
        reason: String,
    },

    #[error("component '{component}': deployment '{workload}' not found")]
    ComponentNotFound { component: String, workload: String },

    #[error("component '{component}': container '{container}' not found in deployment '{workload}'")]
    ContainerNotFound {
        component: String,
        workload: String,
        container: String,
    },

    #[error("component '{component}': environment variable '{variable}' is not a literal value (valueFrom is not supported)")]
    UnsupportedEnvSource { component: String, variable: String },

    #[error("component '{component}': environment variable '{variable}' has no value and no default")]
    MissingEnvValue { component: String, variable: String },

    #[error("component '{component}': value {value} for '{setting}' is out of range ({allowed})")]
    OutOfRange {
        component: String,
        setting: String,
        value: String,
        allowed: String,
    },

    #[error("component '{component}': invalid target value for '{setting}': {reason}")]
    InvalidTargetValue {
        component: String,
        setting: String,
        reason: String,
    },

    #[error("deployment '{workload}': conflicting replica targets ({})", format_proposals(.proposals))]
    ReplicaConflict {
        workload: String,
        proposals: Vec<(String, i32)>,
    },

    #[error("deployment '{workload}': conflicting targets for '{setting}' in container '{container}' ({})", format_proposals(.proposals))]
    WriteConflict {
        workload: String,
        container: String,
        setting: String,
        proposals: Vec<(String, String)>,
    },

    #[error("enablement expression failed to evaluate: {0}")]
    EnablementEvaluation(String),

    #[error("deployment '{workload}': patch rejected: {detail}")]
    PatchRejected { workload: String, detail: String },

    #[error("deployment '{workload}': transport error: {detail}")]
    Transport { workload: String, detail: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no component could be resolved")]
    NoComponentResolved,
}

impl TuningError {
    /// Component the failure belongs to, if it is component scoped
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::InvalidSettingSpec { component, .. }
            | Self::ComponentNotFound { component, .. }
            | Self::ContainerNotFound { component, .. }
            | Self::UnsupportedEnvSource { component, .. }
            | Self::MissingEnvValue { component, .. }
            | Self::OutOfRange { component, .. }
            | Self::InvalidTargetValue { component, .. } => Some(component),
            _ => None,
        }
    }

    /// Workload the failure belongs to, if it is workload scoped
    pub fn workload(&self) -> Option<&str> {
        match self {
            Self::ComponentNotFound { workload, .. }
            | Self::ContainerNotFound { workload, .. }
            | Self::ReplicaConflict { workload, .. }
            | Self::WriteConflict { workload, .. }
            | Self::PatchRejected { workload, .. }
            | Self::Transport { workload, .. } => Some(workload),
            _ => None,
        }
    }

    /// Setting (or environment variable) the failure concerns
    pub fn setting(&self) -> Option<&str> {
        match self {
            Self::InvalidSettingSpec { setting, .. }
            | Self::OutOfRange { setting, .. }
            | Self::InvalidTargetValue { setting, .. }
            | Self::WriteConflict { setting, .. } => Some(setting),
            Self::UnsupportedEnvSource { variable, .. } | Self::MissingEnvValue { variable, .. } => {
                Some(variable)
            }
            _ => None,
        }
    }

    /// Short machine-readable kind, used for metric labels and summaries
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSettingSpec { .. } => "invalid_setting_spec",
            Self::ComponentNotFound { .. } => "component_not_found",
            Self::ContainerNotFound { .. } => "container_not_found",
            Self::UnsupportedEnvSource { .. } => "unsupported_env_source",
            Self::MissingEnvValue { .. } => "missing_env_value",
            Self::OutOfRange { .. } => "out_of_range",
            Self::InvalidTargetValue { .. } => "invalid_target_value",
            Self::ReplicaConflict { .. } => "replica_conflict",
            Self::WriteConflict { .. } => "write_conflict",
            Self::EnablementEvaluation(_) => "enablement_evaluation",
            Self::PatchRejected { .. } => "patch_rejected",
            Self::Transport { .. } => "transport",
            Self::Config(_) => "config",
            Self::NoComponentResolved => "no_component_resolved",
        }
    }
}

fn format_proposals<T: std::fmt::Display>(proposals: &[(String, T)]) -> String {
    proposals
        .iter()
        .map(|(component, value)| format!("{}={}", component, value))
        .collect::<Vec<_>>()
        .join(", ")
}

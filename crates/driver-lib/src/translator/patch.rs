//! Per-workload patch

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Changes to one container
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContainerPatch {
    /// Resource key (`cpu`, `memory`) to quantity; written as limit and request
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, String>,
    /// Literal env values
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl ContainerPatch {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.env.is_empty()
    }
}

/// The combined mutation for one workload: at most one replica count and
/// any number of container changes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkloadPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub containers: BTreeMap<String, ContainerPatch>,
}

impl WorkloadPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when applying the patch would change nothing
    pub fn is_empty(&self) -> bool {
        self.replicas.is_none() && self.containers.values().all(ContainerPatch::is_empty)
    }

    pub fn set_resource(&mut self, container: &str, key: &str, quantity: String) {
        self.container_mut(container)
            .resources
            .insert(key.to_string(), quantity);
    }

    pub fn set_env(&mut self, container: &str, name: &str, value: String) {
        self.container_mut(container)
            .env
            .insert(name.to_string(), value);
    }

    fn container_mut(&mut self, container: &str) -> &mut ContainerPatch {
        self.containers.entry(container.to_string()).or_default()
    }

    /// Number of individual field changes carried by the patch
    pub fn change_count(&self) -> usize {
        usize::from(self.replicas.is_some())
            + self
                .containers
                .values()
                .map(|c| c.resources.len() + c.env.len())
                .sum::<usize>()
    }

    /// Render as a Deployment strategic-merge patch body. Containers and env
    /// entries merge by name, so undeclared fields are left untouched.
    pub fn to_strategic_merge(&self) -> Value {
        let mut spec = Map::new();
        if let Some(replicas) = self.replicas {
            spec.insert("replicas".to_string(), json!(replicas));
        }

        let containers: Vec<Value> = self
            .containers
            .iter()
            .filter(|(_, c)| !c.is_empty())
            .map(|(name, c)| {
                let mut container = Map::new();
                container.insert("name".to_string(), json!(name));
                if !c.resources.is_empty() {
                    container.insert("resources".to_string(), limits_and_requests(&c.resources));
                }
                if !c.env.is_empty() {
                    let env: Vec<Value> = c
                        .env
                        .iter()
                        .map(|(name, value)| json!({ "name": name, "value": value }))
                        .collect();
                    container.insert("env".to_string(), Value::Array(env));
                }
                Value::Object(container)
            })
            .collect();

        if !containers.is_empty() {
            spec.insert(
                "template".to_string(),
                json!({ "spec": { "containers": containers } }),
            );
        }

        json!({ "spec": Value::Object(spec) })
    }
}

/// Resource block that sets limits and requests to identical values
pub fn limits_and_requests(resources: &BTreeMap<String, String>) -> Value {
    json!({
        "limits": resources,
        "requests": resources,
    })
}

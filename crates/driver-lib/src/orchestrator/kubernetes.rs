//! Kubernetes implementation of the orchestrator transport
//!
//! Reads `apps/v1` Deployments and applies strategic-merge patches. Containers
//! and env entries merge by name, so one request carries every change for a
//! workload without touching undeclared fields.

use super::{async_trait, Orchestrator, OrchestratorError};
use crate::models::{ContainerSnapshot, EnvSource, WorkloadSnapshot};
use crate::translator::WorkloadPatch;
use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::debug;

/// Orchestrator backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
    field_manager: String,
}

impl KubeOrchestrator {
    /// Create from an existing client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            field_manager: "k8s-driver".to_string(),
        }
    }

    /// Create using the in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        Ok(Self::new(client))
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadSnapshot>, OrchestratorError> {
        let deployment = self
            .deployments(namespace)
            .get_opt(name)
            .await
            .map_err(classify_error)?;

        Ok(deployment.map(|d| snapshot_from_deployment(name, d)))
    }

    async fn apply_patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &WorkloadPatch,
    ) -> Result<(), OrchestratorError> {
        let body = patch.to_strategic_merge();
        debug!(namespace = %namespace, deployment = %name, patch = %body, "Patching deployment");

        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..PatchParams::default()
        };
        self.deployments(namespace)
            .patch(name, &params, &Patch::Strategic(&body))
            .await
            .map_err(classify_error)?;

        Ok(())
    }
}

/// Map a client error onto rejected (not retried) or transport (retried)
fn classify_error(err: kube::Error) -> OrchestratorError {
    match err {
        kube::Error::Api(response) => {
            let detail = format!("{} ({}): {}", response.reason, response.code, response.message);
            if is_rejection(response.code) {
                OrchestratorError::Rejected(detail)
            } else {
                OrchestratorError::Transport(detail)
            }
        }
        other => OrchestratorError::Transport(other.to_string()),
    }
}

/// 4xx responses are final, except request timeout and throttling
fn is_rejection(code: u16) -> bool {
    (400..500).contains(&code) && code != 408 && code != 429
}

fn snapshot_from_deployment(name: &str, deployment: Deployment) -> WorkloadSnapshot {
    let labels = deployment.metadata.labels.unwrap_or_default();
    let spec = deployment.spec.unwrap_or_default();
    // Kubernetes defaults an unset replica count to 1
    let replicas = spec.replicas.unwrap_or(1);
    let containers = spec
        .template
        .spec
        .map(|pod| pod.containers.into_iter().map(snapshot_from_container).collect())
        .unwrap_or_default();

    WorkloadSnapshot {
        name: name.to_string(),
        labels,
        replicas,
        containers,
    }
}

fn snapshot_from_container(container: Container) -> ContainerSnapshot {
    let quantities = |map: Option<BTreeMap<String, k8s_openapi::apimachinery::pkg::api::resource::Quantity>>| {
        map.map(|m| m.into_iter().map(|(k, v)| (k, v.0)).collect::<BTreeMap<_, _>>())
    };
    let resources = container.resources.unwrap_or_default();

    let env = container
        .env
        .unwrap_or_default()
        .into_iter()
        .map(|var| {
            let source = match (var.value, var.value_from) {
                (_, Some(_)) => EnvSource::Indirect,
                (Some(value), None) => EnvSource::Literal(value),
                // `value` omitted without `valueFrom` means the empty string
                (None, None) => EnvSource::Literal(String::new()),
            };
            (var.name, source)
        })
        .collect();

    ContainerSnapshot {
        name: container.name,
        limits: quantities(resources.limits),
        requests: quantities(resources.requests),
        env,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::{
        EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, ResourceRequirements, SecretKeySelector,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use kube::api::ObjectMeta;

    fn deployment() -> Deployment {
        let container = Container {
            name: "main".to_string(),
            resources: Some(ResourceRequirements {
                limits: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity("300m".to_string())),
                    ("memory".to_string(), Quantity("256Mi".to_string())),
                ])),
                ..ResourceRequirements::default()
            }),
            env: Some(vec![
                EnvVar {
                    name: "DELAY".to_string(),
                    value: Some("20".to_string()),
                    value_from: None,
                },
                EnvVar {
                    name: "TOKEN".to_string(),
                    value: None,
                    value_from: Some(EnvVarSource {
                        secret_key_ref: Some(SecretKeySelector {
                            key: "token".to_string(),
                            name: Some("creds".to_string()),
                            optional: None,
                        }),
                        ..EnvVarSource::default()
                    }),
                },
            ]),
            ..Container::default()
        };

        Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                labels: Some(BTreeMap::from([(
                    "optune.ai/exclude".to_string(),
                    "0".to_string(),
                )])),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec {
                replicas: None,
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![container],
                        ..PodSpec::default()
                    }),
                },
                ..DeploymentSpec::default()
            }),
            status: None,
        }
    }

    #[test]
    fn test_snapshot_from_deployment() {
        let snapshot = snapshot_from_deployment("web", deployment());

        assert_eq!(snapshot.name, "web");
        assert_eq!(snapshot.replicas, 1);
        assert!(!snapshot.is_excluded());
        assert_eq!(snapshot.containers.len(), 1);

        let container = &snapshot.containers[0];
        assert_eq!(container.name, "main");
        assert_eq!(
            container.limits.as_ref().unwrap().get("cpu"),
            Some(&"300m".to_string())
        );
        assert!(container.requests.is_none());
        assert_eq!(
            container.env.get("DELAY"),
            Some(&EnvSource::Literal("20".to_string()))
        );
        assert_eq!(container.env.get("TOKEN"), Some(&EnvSource::Indirect));
    }

    #[test]
    fn test_rejection_classification() {
        assert!(is_rejection(400));
        assert!(is_rejection(422));
        assert!(is_rejection(403));
        assert!(!is_rejection(408));
        assert!(!is_rejection(429));
        assert!(!is_rejection(500));
        assert!(!is_rejection(503));
    }
}

//! In-memory orchestrator used by cycle tests

use super::{async_trait, Orchestrator, OrchestratorError};
use crate::models::{EnvSource, WorkloadSnapshot};
use crate::translator::WorkloadPatch;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
pub(crate) struct InMemoryOrchestrator {
    workloads: Mutex<BTreeMap<(String, String), WorkloadSnapshot>>,
    applied: Mutex<Vec<(String, WorkloadPatch)>>,
    reads: Mutex<Vec<String>>,
    read_failures: Mutex<VecDeque<OrchestratorError>>,
    patch_failures: Mutex<BTreeMap<String, OrchestratorError>>,
    patch_attempts: Mutex<Vec<String>>,
}

impl InMemoryOrchestrator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, namespace: &str, snapshot: WorkloadSnapshot) {
        self.workloads
            .lock()
            .unwrap()
            .insert((namespace.to_string(), snapshot.name.clone()), snapshot);
    }

    pub(crate) fn workload(&self, namespace: &str, name: &str) -> Option<WorkloadSnapshot> {
        self.workloads
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Queue transport failures returned by the next reads
    pub(crate) fn fail_next_reads(&self, error: OrchestratorError, count: usize) {
        let mut failures = self.read_failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back(error.clone());
        }
    }

    /// Every patch to `name` fails with `error`
    pub(crate) fn fail_patches(&self, name: &str, error: OrchestratorError) {
        self.patch_failures
            .lock()
            .unwrap()
            .insert(name.to_string(), error);
    }

    pub(crate) fn applied(&self) -> Vec<(String, WorkloadPatch)> {
        self.applied.lock().unwrap().clone()
    }

    pub(crate) fn reads(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }

    /// Patch calls made for `name`, failed ones included
    pub(crate) fn patch_attempts(&self, name: &str) -> usize {
        self.patch_attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|attempt| *attempt == name)
            .count()
    }
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadSnapshot>, OrchestratorError> {
        self.reads.lock().unwrap().push(name.to_string());
        if let Some(err) = self.read_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.workload(namespace, name))
    }

    async fn apply_patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &WorkloadPatch,
    ) -> Result<(), OrchestratorError> {
        self.patch_attempts.lock().unwrap().push(name.to_string());
        if let Some(err) = self.patch_failures.lock().unwrap().get(name) {
            return Err(err.clone());
        }

        let mut workloads = self.workloads.lock().unwrap();
        let snapshot = workloads
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| OrchestratorError::Rejected(format!("deployment {} not found", name)))?;

        if let Some(replicas) = patch.replicas {
            snapshot.replicas = replicas;
        }
        for (container_name, changes) in &patch.containers {
            let container = snapshot
                .containers
                .iter_mut()
                .find(|c| &c.name == container_name)
                .ok_or_else(|| {
                    OrchestratorError::Rejected(format!("container {} not found", container_name))
                })?;
            for (key, quantity) in &changes.resources {
                container
                    .limits
                    .get_or_insert_with(BTreeMap::new)
                    .insert(key.clone(), quantity.clone());
                container
                    .requests
                    .get_or_insert_with(BTreeMap::new)
                    .insert(key.clone(), quantity.clone());
            }
            for (var, value) in &changes.env {
                container
                    .env
                    .insert(var.clone(), EnvSource::Literal(value.clone()));
            }
        }

        self.applied
            .lock()
            .unwrap()
            .push((name.to_string(), patch.clone()));
        Ok(())
    }
}

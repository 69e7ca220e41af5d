//! Patch application
//!
//! Sends one combined patch per workload. Empty patches are never sent.

use crate::error::{Result, TuningError};
use crate::orchestrator::{Orchestrator, OrchestratorError, RetryPolicy};
use crate::translator::WorkloadPatch;
use tracing::{debug, info};

/// What happened to one workload's patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Nothing to change, no request was made
    Unchanged,
}

pub struct PatchApplier<'a> {
    orchestrator: &'a dyn Orchestrator,
    retry: RetryPolicy,
}

impl<'a> PatchApplier<'a> {
    pub fn new(orchestrator: &'a dyn Orchestrator, retry: RetryPolicy) -> Self {
        Self {
            orchestrator,
            retry,
        }
    }

    /// Apply `patch` to `workload` as a single request.
    ///
    /// Transport failures are retried per the retry policy since the patch
    /// only carries absolute values. Rejections surface immediately as
    /// [`TuningError::PatchRejected`].
    pub async fn apply(
        &self,
        namespace: &str,
        workload: &str,
        patch: &WorkloadPatch,
    ) -> Result<ApplyOutcome> {
        if patch.is_empty() {
            debug!(workload = %workload, "No changes, skipping patch");
            return Ok(ApplyOutcome::Unchanged);
        }

        self.retry
            .run("apply_patch", || {
                self.orchestrator.apply_patch(namespace, workload, patch)
            })
            .await
            .map_err(|e| match e {
                OrchestratorError::Rejected(detail) => TuningError::PatchRejected {
                    workload: workload.to_string(),
                    detail,
                },
                OrchestratorError::Transport(detail) => TuningError::Transport {
                    workload: workload.to_string(),
                    detail,
                },
            })?;

        info!(
            namespace = %namespace,
            workload = %workload,
            changes = patch.change_count(),
            "Patch applied"
        );
        Ok(ApplyOutcome::Applied)
    }
}

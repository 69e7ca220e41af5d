//! Orchestrator transport
//!
//! The driver talks to the cluster through the [`Orchestrator`] trait: one
//! read of a Deployment's current state and one combined write per workload.
//! [`KubeOrchestrator`] is the Kubernetes implementation.

mod kubernetes;

#[cfg(test)]
pub(crate) mod memory;

pub use kubernetes::KubeOrchestrator;

use crate::models::WorkloadSnapshot;
use crate::translator::WorkloadPatch;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use async_trait::async_trait;

/// Failure reported by the orchestrator transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    /// The cluster refused the request (validation, admission, forbidden)
    #[error("rejected: {0}")]
    Rejected(String),
    /// The request did not complete (connection, timeout, server error)
    #[error("transport: {0}")]
    Transport(String),
}

impl OrchestratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Read/write access to replicated workloads
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Fetch the current state of a Deployment, `None` when it does not exist
    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkloadSnapshot>, OrchestratorError>;

    /// Apply one combined patch to a Deployment
    async fn apply_patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &WorkloadPatch,
    ) -> Result<(), OrchestratorError>;
}

/// Bounded retry with exponential backoff for transport failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(
            self.initial_backoff.saturating_mul(factor),
            self.max_backoff,
        )
    }

    /// Run `op`, retrying transport failures until attempts are exhausted.
    /// Rejections are returned immediately.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, OrchestratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        operation = %operation,
                        error = %e,
                        attempt = attempt,
                        next_backoff_ms = backoff.as_millis() as u64,
                        "Orchestrator call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

//! Kubernetes tuning driver library
//!
//! This crate provides the reconciliation core of the driver:
//! - Setting model and tuning declaration parsing
//! - Deployment state reading and exclusion handling
//! - Sandboxed enablement expressions
//! - Target-to-patch translation with pinning and replica consistency
//! - Patch application with bounded retries
//! - Cycle orchestration, metrics and structured logging

pub mod applier;
pub mod config;
pub mod cycle;
pub mod enablement;
pub mod error;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod quantity;
pub mod reader;
pub mod translator;

pub use config::{AppFlags, Application, Declaration};
pub use cycle::{CycleReport, TuningCycle};
pub use error::{Result, TuningError};
pub use models::*;
pub use observability::{DriverMetrics, StructuredLogger};
pub use orchestrator::{KubeOrchestrator, Orchestrator, OrchestratorError, RetryPolicy};

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

//! # cumulus
//!
//! Declarative reconciliation of interdependent cloud resources against an
//! eventually-consistent control plane.
//!
//! This library re-exports the workspace crates and wires them together:
//! build a task set with [`cumulus_model::ModelBuilder`], then hand it to
//! [`reconcile`] with a [`Cloud`] and an [`EngineConfig`].

use std::sync::Arc;

use tracing::{info, warn};

pub use cumulus_cloud;
pub use cumulus_core;
pub use cumulus_model;
pub use cumulus_reconciler;

pub mod prelude;

use cumulus_cloud::{Cloud, CloudClients};
use cumulus_core::Result;
use cumulus_model::{BootstrapProvider, ClusterSpec, InstanceGroupSpec, ModelBuilder};
use cumulus_reconciler::{DependencyGraph, EngineConfig, Executor, RunReport, Task, TaskContext};

/// A facade over `clients` configured from `config`.
#[must_use]
pub fn connect(clients: CloudClients, config: &EngineConfig) -> Cloud {
    Cloud::new(clients, config.backoff).with_settings(config.cloud_settings())
}

/// Run `tasks` to convergence.
///
/// Graph errors abort before anything is rendered. Task failures do not
/// fail the call; they are in the returned report.
///
/// # Errors
/// `InvalidConfig`, `DependencyCycle`, or `DependencyMissing`.
pub async fn reconcile(
    tasks: Vec<Arc<dyn Task>>,
    cloud: Cloud,
    config: &EngineConfig,
) -> Result<RunReport> {
    config.validate()?;
    let graph = DependencyGraph::build(tasks)?;
    let ctx = TaskContext::new(cloud).with_dry_run(config.dry_run);
    let report = Executor::from_config(config).run(&graph, &ctx).await;
    if report.is_success() {
        info!(tasks = graph.len(), "Cloud converged");
    } else {
        warn!(failed = report.failed().count(), "Cloud did not converge");
    }
    Ok(report)
}

/// Build the model of one cluster and reconcile it.
///
/// # Errors
/// Model build failures plus everything [`reconcile`] returns.
pub async fn reconcile_cluster(
    cluster: &ClusterSpec,
    groups: &[InstanceGroupSpec],
    bootstrap: &dyn BootstrapProvider,
    cloud: Cloud,
    config: &EngineConfig,
) -> Result<RunReport> {
    let set = ModelBuilder::build(cluster, groups, bootstrap)?;
    info!(cluster = %cluster.name, tasks = set.len(), "Built cluster model");
    reconcile(set.into_tasks(), cloud, config).await
}

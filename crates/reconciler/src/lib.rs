//! Task graph reconciliation for cumulus.
//!
//! Desired cloud resources are declared as tasks. Each task finds its live
//! counterpart, diffs it, and renders only what is missing or changed:
//!
//! - **Tasks** ([`task`], [`tasks`]): one per resource, addressed by a
//!   stable [`TaskKey`] and linked to the tasks it consumes
//! - **Graph** ([`graph`]): producer → consumer edges, validated up front
//! - **Executor** ([`executor`]): renders independent tasks concurrently,
//!   each only after its producers have published their outputs
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cumulus_reconciler::{DependencyGraph, Executor, Task, TaskContext, TaskKey};
//! use cumulus_reconciler::tasks::{Instance, Port};
//!
//! let port = Port::new("port-nodes-1", network_id);
//! let instance = Instance::new("nodes-1", "ubuntu", "m1.medium", TaskKey::port("port-nodes-1"));
//! let tasks: Vec<Arc<dyn Task>> = vec![Arc::new(port), Arc::new(instance)];
//!
//! let graph = DependencyGraph::build(tasks)?;
//! let report = Executor::new(4).run(&graph, &TaskContext::new(cloud)).await;
//! assert!(report.is_success());
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod config;
pub mod executor;
pub mod graph;
pub mod tags;
pub mod task;
pub mod tasks;
pub mod user_data;

pub use config::EngineConfig;
pub use executor::{Executor, RunReport, TaskReport};
pub use graph::{DagError, DependencyGraph};
pub use tags::Tags;
pub use task::{
    Action, Link, OutputMap, Outputs, ResourceTask, Task, TaskContext, TaskKey, TaskOutcome,
    TaskOutput, TaskState,
};
pub use user_data::UserData;

//! Prelude module - common imports for cumulus
//!
//! ```rust
//! use cumulus::prelude::*;
//! ```

pub use cumulus_cloud::{Cloud, CloudSettings};
pub use cumulus_core::{BackoffPolicy, BackoffProfiles, Error, Result};
pub use cumulus_model::{
    BootstrapProvider, ClusterSpec, InstanceGroupRole, InstanceGroupSpec, ModelBuilder,
    NoBootstrap, TaskSet,
};
pub use cumulus_reconciler::tasks::{
    FloatingIp, Instance, LbListener, LbPool, LoadBalancer, PoolAssociation, Port, ServerGroup,
};
pub use cumulus_reconciler::{
    Action, DependencyGraph, EngineConfig, Executor, Link, RunReport, Tags, Task, TaskContext,
    TaskKey, TaskState, UserData,
};

pub use crate::{connect, reconcile, reconcile_cluster};

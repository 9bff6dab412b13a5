//! Cluster model for cumulus.
//!
//! Turns a cluster specification and its instance groups into the task set
//! the reconciler runs:
//!
//! - [`spec`]: the serde-readable cluster and instance group specification
//! - [`naming`]: deterministic instance names and metadata key sanitizing
//! - [`builder`]: [`ModelBuilder`], one server group per instance group, a
//!   port and instance per replica, floating IPs by role and topology, and
//!   the API load balancer chain

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod builder;
pub mod naming;
pub mod spec;

pub use builder::{BootstrapProvider, ModelBuilder, NoBootstrap, TaskSet};
pub use naming::{make_instance_name, sanitize_metadata_key};
pub use spec::{ClusterSpec, InstanceGroupRole, InstanceGroupSpec};

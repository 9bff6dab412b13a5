//! Cluster and instance group specifications, as the model builder reads
//! them.
//!
//! Field names follow the camelCase of cluster manifests so that a YAML
//! document deserializes directly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Suffix of cluster names that rely on gossip instead of DNS.
pub const GOSSIP_SUFFIX: &str = ".k8s.local";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub name: String,
    /// Bumped on every spec change; part of every instance name.
    #[serde(default)]
    pub generation: i64,
    pub network_id: String,
    pub network_name: String,
    pub subnets: Vec<SubnetSpec>,
    #[serde(default)]
    pub topology: Topology,
    /// The cluster network has a router with an external gateway, so
    /// floating IPs can reach instances.
    #[serde(default)]
    pub router: bool,
    #[serde(default)]
    pub loadbalancer: Option<LoadBalancerSpec>,
    /// DNS name of the API; also the load balancer's name.
    pub master_public_name: String,
    /// Source CIDRs allowed to reach the API.
    #[serde(default)]
    pub kubernetes_api_access: Vec<String>,
    #[serde(default)]
    pub ssh_key_name: String,
    #[serde(default)]
    pub use_private_dns: bool,
    /// Labels applied to every instance of the cluster.
    #[serde(default)]
    pub cloud_labels: BTreeMap<String, String>,
}

impl ClusterSpec {
    #[must_use]
    pub fn is_gossip(&self) -> bool {
        self.name.ends_with(GOSSIP_SUFFIX)
    }

    #[must_use]
    pub fn subnet(&self, name: &str) -> Option<&SubnetSpec> {
        self.subnets.iter().find(|subnet| subnet.name == name)
    }

    #[must_use]
    pub fn use_vip_acl(&self) -> bool {
        self.loadbalancer.as_ref().is_some_and(|lb| lb.use_vip_acl)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    pub name: String,
    /// Cloud subnet ID.
    pub id: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(rename = "type")]
    pub kind: SubnetType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubnetType {
    #[default]
    Public,
    Private,
    Utility,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    #[default]
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub masters: TopologyKind,
    #[serde(default)]
    pub nodes: TopologyKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    /// Restrict the API listener to `kubernetes_api_access` instead of a
    /// security group.
    #[serde(default, rename = "useVIPACL")]
    pub use_vip_acl: bool,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceGroupRole {
    Master,
    #[default]
    Node,
    Bastion,
}

impl InstanceGroupRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Master => "Master",
            Self::Node => "Node",
            Self::Bastion => "Bastion",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceGroupSpec {
    pub name: String,
    #[serde(default)]
    pub generation: i64,
    pub role: InstanceGroupRole,
    pub min_size: u32,
    #[serde(default)]
    pub max_size: Option<u32>,
    pub machine_type: String,
    pub image: String,
    /// Cluster subnet names, assigned round-robin by ordinal.
    #[serde(default)]
    pub subnets: Vec<String>,
    /// Availability zones, assigned round-robin by ordinal. Take precedence
    /// over the zone implied by the subnet.
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default)]
    pub additional_security_groups: Vec<String>,
    /// `Some(false)` opts the group out of floating IPs.
    #[serde(default, rename = "associatePublicIP")]
    pub associate_public_ip: Option<bool>,
    #[serde(default)]
    pub cloud_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

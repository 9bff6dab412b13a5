//! Cloud entities and request options as they cross the API boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Marker to pass to fetch the next page; `None` on the last page.
    pub next_marker: Option<String>,
}

impl<T> Page<T> {
    #[must_use]
    pub const fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_marker: None,
        }
    }
}

/// Pagination cursor for a listing call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub marker: Option<String>,
    pub limit: Option<usize>,
}

// ----------------------------------------------------------------------------
// Compute
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    Fixed,
    Floating,
}

/// An address reported on a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddress {
    pub addr: String,
    pub address_type: AddressType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub status: String,
    pub flavor_id: String,
    pub image_id: String,
    pub key_name: Option<String>,
    pub availability_zone: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub tags: Vec<String>,
    /// Addresses keyed by network name.
    pub addresses: BTreeMap<String, Vec<ServerAddress>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerListOpts {
    pub name: Option<String>,
    /// Only servers carrying this tag.
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    pub port_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerHints {
    pub group: String,
}

/// Boot volume created from an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub uuid: String,
    pub volume_size_gb: u32,
    pub boot_index: i32,
    pub delete_on_termination: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCreateOpts {
    pub name: String,
    pub image_id: String,
    pub flavor_id: String,
    pub networks: Vec<NetworkAttachment>,
    pub metadata: BTreeMap<String, String>,
    pub tags: Vec<String>,
    pub security_groups: Vec<String>,
    pub user_data: Option<Vec<u8>>,
    pub availability_zone: Option<String>,
    pub key_name: Option<String>,
    pub scheduler_hints: Option<SchedulerHints>,
    /// Empty unless the server boots from a volume.
    pub block_devices: Vec<BlockDevice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flavor {
    pub id: String,
    pub name: String,
    pub vcpus: u32,
    pub ram_mb: u32,
    pub disk_gb: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
    pub min_disk_gb: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerGroup {
    pub id: String,
    pub name: String,
    pub policies: Vec<String>,
    /// Server IDs placed in the group.
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerGroupCreateOpts {
    pub name: String,
    pub policies: Vec<String>,
}

// ----------------------------------------------------------------------------
// Networking
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedIp {
    pub subnet_id: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    pub name: String,
    pub network_id: String,
    /// Server the port is bound to; empty when unbound.
    pub device_id: String,
    /// Service that owns the binding; empty for a stale binding.
    pub device_owner: String,
    pub fixed_ips: Vec<FixedIp>,
    pub security_groups: Vec<String>,
    pub tags: Vec<String>,
}

impl Port {
    /// A port that still names a device nobody owns any more.
    #[must_use]
    pub fn has_stale_binding(&self) -> bool {
        !self.device_id.is_empty() && self.device_owner.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCreateOpts {
    pub name: String,
    pub network_id: String,
    /// Subnets to allocate a fixed IP from.
    pub subnet_ids: Vec<String>,
    pub security_groups: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortUpdateOpts {
    pub name: Option<String>,
    pub device_id: Option<String>,
    pub security_groups: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortListOpts {
    pub name: Option<String>,
    pub device_id: Option<String>,
    pub network_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: String,
    /// Floating IPs are named through their description.
    pub description: String,
    pub floating_network_id: String,
    /// Empty until the cloud has allocated an address.
    pub floating_ip_address: String,
    pub port_id: Option<String>,
    pub fixed_ip_address: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIpCreateOpts {
    pub description: String,
    pub floating_network_id: String,
    pub port_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FloatingIpListOpts {
    pub description: Option<String>,
    pub port_id: Option<String>,
    pub floating_ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub external: bool,
    pub subnet_ids: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub cidr: String,
    pub tags: Vec<String>,
}

/// Networking resources that carry tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagTarget {
    Ports,
    Networks,
    Subnets,
    FloatingIps,
}

impl TagTarget {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ports => "ports",
            Self::Networks => "networks",
            Self::Subnets => "subnets",
            Self::FloatingIps => "floatingips",
        }
    }
}

// ----------------------------------------------------------------------------
// Load balancing
// ----------------------------------------------------------------------------

pub const PROVISIONING_ACTIVE: &str = "ACTIVE";
pub const PROVISIONING_ERROR: &str = "ERROR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    pub name: String,
    pub vip_subnet_id: String,
    pub vip_address: String,
    pub vip_port_id: String,
    pub provisioning_status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerCreateOpts {
    pub name: String,
    pub vip_subnet_id: String,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub loadbalancer_id: String,
    pub protocol: String,
    pub lb_method: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCreateOpts {
    pub name: String,
    pub loadbalancer_id: String,
    pub protocol: String,
    pub lb_method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub id: String,
    pub name: String,
    pub default_pool_id: String,
    pub protocol: String,
    pub protocol_port: u16,
    pub allowed_cidrs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerCreateOpts {
    pub name: String,
    pub default_pool_id: String,
    pub protocol: String,
    pub protocol_port: u16,
    pub allowed_cidrs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMember {
    pub id: String,
    pub name: String,
    pub address: String,
    pub protocol_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMemberCreateOpts {
    pub name: String,
    pub address: String,
    pub protocol_port: u16,
}

//! In-memory cloud for tests.
//!
//! Implements every API trait over a single locked state. Besides plain CRUD
//! it can inject failures per call, report floating-IP addresses late, hold
//! load balancers in a pending state for a number of polls, and leave stale
//! device bindings on ports.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use tokio::sync::{RwLock, RwLockWriteGuard};
use uuid::Uuid;

use crate::api::{
    ApiError, ApiResult, CloudClients, ComputeApi, ImageApi, LoadBalancerApi, NetworkApi,
};
use crate::types::{
    AddressType, FixedIp, Flavor, FloatingIp, FloatingIpCreateOpts, FloatingIpListOpts, Image,
    Listener, ListenerCreateOpts, LoadBalancer, LoadBalancerCreateOpts, Network, Page,
    PageRequest, Pool, PoolCreateOpts, PoolMember, PoolMemberCreateOpts, Port, PortCreateOpts,
    PortListOpts, PortUpdateOpts, Server, ServerAddress, ServerCreateOpts, ServerGroup,
    ServerGroupCreateOpts, ServerListOpts, Subnet, TagTarget, PROVISIONING_ACTIVE,
    PROVISIONING_ERROR,
};

/// Remote calls the in-memory cloud counts and can fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApiCall {
    ListServers,
    GetServer,
    CreateServer,
    DeleteServer,
    ReplaceServerMetadata,
    ReplaceServerTags,
    ListFlavors,
    ListServerGroups,
    GetServerGroup,
    CreateServerGroup,
    DeleteServerGroup,
    ListImages,
    GetImage,
    ListPorts,
    GetPort,
    CreatePort,
    UpdatePort,
    DeletePort,
    ListFloatingIps,
    GetFloatingIp,
    CreateFloatingIp,
    UpdateFloatingIp,
    DeleteFloatingIp,
    ListNetworks,
    GetNetwork,
    GetSubnet,
    AddTag,
    DeleteTag,
    ReplaceAllTags,
    ListLoadBalancers,
    GetLoadBalancer,
    CreateLoadBalancer,
    DeleteLoadBalancer,
    ListPools,
    CreatePool,
    ListListeners,
    CreateListener,
    UpdateListener,
    ListPoolMembers,
    CreatePoolMember,
}

const DEFAULT_PAGE_SIZE: usize = 50;
const PENDING_CREATE: &str = "PENDING_CREATE";

#[derive(Debug)]
struct FloatingIpRecord {
    fip: FloatingIp,
    /// Reads left before the address becomes visible.
    hidden_reads: u32,
}

impl FloatingIpRecord {
    fn view(&self) -> FloatingIp {
        let mut fip = self.fip.clone();
        if self.hidden_reads > 0 {
            fip.floating_ip_address = String::new();
        }
        fip
    }

    fn read(&mut self) -> FloatingIp {
        let fip = self.view();
        self.hidden_reads = self.hidden_reads.saturating_sub(1);
        fip
    }

    fn visible_address(&self) -> Option<&str> {
        (self.hidden_reads == 0).then_some(self.fip.floating_ip_address.as_str())
    }
}

#[derive(Debug)]
struct LoadBalancerRecord {
    lb: LoadBalancer,
    /// Polls left before provisioning finishes.
    pending_polls: u32,
}

impl LoadBalancerRecord {
    fn read(&mut self) -> LoadBalancer {
        if self.pending_polls > 0 {
            self.pending_polls = self.pending_polls.saturating_sub(1);
        } else if self.lb.provisioning_status == PENDING_CREATE {
            self.lb.provisioning_status = PROVISIONING_ACTIVE.to_string();
        }
        self.lb.clone()
    }
}

#[derive(Debug, Default)]
struct State {
    servers: BTreeMap<String, Server>,
    flavors: Vec<Flavor>,
    images: Vec<Image>,
    server_groups: BTreeMap<String, ServerGroup>,
    ports: BTreeMap<String, Port>,
    floating_ips: BTreeMap<String, FloatingIpRecord>,
    networks: BTreeMap<String, Network>,
    subnets: BTreeMap<String, Subnet>,
    loadbalancers: BTreeMap<String, LoadBalancerRecord>,
    pools: BTreeMap<String, Pool>,
    listeners: BTreeMap<String, Listener>,
    pool_members: BTreeMap<String, Vec<PoolMember>>,
    server_creates: Vec<ServerCreateOpts>,
    next_host: u32,
    failures: HashMap<ApiCall, VecDeque<ApiError>>,
    calls: HashMap<ApiCall, u32>,
}

impl State {
    fn allocate_host(&mut self) -> u32 {
        self.next_host = self.next_host.saturating_add(1);
        self.next_host.saturating_add(9)
    }

    /// Server as the API reports it, with addresses derived from the ports
    /// bound to it and the floating IPs bound to those ports.
    fn server_view(&self, server: &Server) -> Server {
        let mut view = server.clone();
        view.addresses.clear();
        for port in self.ports.values().filter(|p| p.device_id == server.id) {
            let network = self
                .networks
                .get(&port.network_id)
                .map_or_else(|| port.network_id.clone(), |n| n.name.clone());
            let entry = view.addresses.entry(network).or_default();
            entry.extend(port.fixed_ips.iter().map(|ip| ServerAddress {
                addr: ip.ip_address.clone(),
                address_type: AddressType::Fixed,
            }));
            entry.extend(
                self.floating_ips
                    .values()
                    .filter(|rec| rec.fip.port_id.as_deref() == Some(port.id.as_str()))
                    .filter_map(FloatingIpRecord::visible_address)
                    .map(|addr| ServerAddress {
                        addr: addr.to_string(),
                        address_type: AddressType::Floating,
                    }),
            );
        }
        view
    }

    fn fixed_ip_of(&self, port_id: &str) -> ApiResult<Option<String>> {
        let port = self
            .ports
            .get(port_id)
            .ok_or_else(|| bad_request(format!("port {port_id} does not exist")))?;
        Ok(port.fixed_ips.first().map(|ip| ip.ip_address.clone()))
    }

    fn tags_mut(&mut self, target: TagTarget, id: &str) -> ApiResult<&mut Vec<String>> {
        let tags = match target {
            TagTarget::Ports => self.ports.get_mut(id).map(|p| &mut p.tags),
            TagTarget::Networks => self.networks.get_mut(id).map(|n| &mut n.tags),
            TagTarget::Subnets => self.subnets.get_mut(id).map(|s| &mut s.tags),
            TagTarget::FloatingIps => self.floating_ips.get_mut(id).map(|r| &mut r.fip.tags),
        };
        tags.ok_or(ApiError::NotFound)
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError::Status {
        status: 400,
        message: message.into(),
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Address `host` inside an IPv4 `/24`-style CIDR.
fn host_address(cidr: &str, host: u32) -> String {
    let network = cidr.split('/').next().unwrap_or(cidr);
    let prefix = network.split('.').take(3).join(".");
    format!("{prefix}.{}", host.wrapping_rem(250).saturating_add(2))
}

fn paginate<T>(items: Vec<T>, request: &PageRequest, page_size: usize) -> ApiResult<Page<T>> {
    let start = match &request.marker {
        None => 0,
        Some(marker) => marker
            .parse::<usize>()
            .map_err(|_| bad_request(format!("invalid marker '{marker}'")))?,
    };
    let size = request.limit.unwrap_or(page_size).max(1);
    let total = items.len();
    let end = start.saturating_add(size).min(total);
    let items = items.into_iter().skip(start).take(size).collect();
    Ok(Page {
        items,
        next_marker: (end < total).then(|| end.to_string()),
    })
}

#[derive(Debug)]
pub struct InMemoryCloud {
    state: RwLock<State>,
    page_size: usize,
    floating_ip_address_delay: u32,
    loadbalancer_activation_polls: u32,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self {
            state: RwLock::default(),
            page_size: DEFAULT_PAGE_SIZE,
            floating_ip_address_delay: 0,
            loadbalancer_activation_polls: 0,
        }
    }
}

impl InMemoryCloud {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve listings in pages of `size` items.
    #[must_use]
    pub const fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Hide each new floating IP's address for its first `reads` reads.
    #[must_use]
    pub const fn with_floating_ip_address_delay(mut self, reads: u32) -> Self {
        self.floating_ip_address_delay = reads;
        self
    }

    /// Keep each new load balancer pending for its first `polls` reads.
    #[must_use]
    pub const fn with_loadbalancer_activation_polls(mut self, polls: u32) -> Self {
        self.loadbalancer_activation_polls = polls;
        self
    }

    /// API handles backed by this cloud.
    #[must_use]
    pub fn clients(self: &Arc<Self>) -> CloudClients {
        CloudClients {
            compute: self.clone(),
            network: self.clone(),
            image: self.clone(),
            loadbalancer: self.clone(),
        }
    }

    async fn enter(&self, call: ApiCall) -> ApiResult<RwLockWriteGuard<'_, State>> {
        let mut state = self.state.write().await;
        let count = state.calls.entry(call).or_default();
        *count = count.saturating_add(1);
        if let Some(error) = state.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(state)
    }

    // ------------------------------------------------------------------------
    // Fault injection and inspection
    // ------------------------------------------------------------------------

    /// Fail the next invocation of `call` with `error`.
    pub async fn fail_next(&self, call: ApiCall, error: ApiError) {
        self.fail_times(call, 1, error).await;
    }

    /// Fail the next `times` invocations of `call` with `error`.
    pub async fn fail_times(&self, call: ApiCall, times: usize, error: ApiError) {
        let mut state = self.state.write().await;
        let queue = state.failures.entry(call).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// How often `call` has been invoked, failed attempts included.
    pub async fn call_count(&self, call: ApiCall) -> u32 {
        self.state
            .read()
            .await
            .calls
            .get(&call)
            .copied()
            .unwrap_or(0)
    }

    /// Leave `port_id` bound to `device_id` with no owner, as a deleted
    /// server sometimes does.
    pub async fn bind_port_stale(&self, port_id: &str, device_id: &str) {
        if let Some(port) = self.state.write().await.ports.get_mut(port_id) {
            port.device_id = device_id.to_string();
            port.device_owner = String::new();
        }
    }

    /// Bind `port_id` to a device owned by another service.
    pub async fn bind_port_owned(&self, port_id: &str, device_id: &str, owner: &str) {
        if let Some(port) = self.state.write().await.ports.get_mut(port_id) {
            port.device_id = device_id.to_string();
            port.device_owner = owner.to_string();
        }
    }

    /// Put a load balancer into provisioning status `ERROR`.
    pub async fn break_loadbalancer(&self, id: &str) {
        if let Some(rec) = self.state.write().await.loadbalancers.get_mut(id) {
            rec.pending_polls = 0;
            rec.lb.provisioning_status = PROVISIONING_ERROR.to_string();
        }
    }

    pub async fn servers(&self) -> Vec<Server> {
        let state = self.state.read().await;
        state.servers.values().map(|s| state.server_view(s)).collect()
    }

    pub async fn ports(&self) -> Vec<Port> {
        self.state.read().await.ports.values().cloned().collect()
    }

    pub async fn port(&self, id: &str) -> Option<Port> {
        self.state.read().await.ports.get(id).cloned()
    }

    pub async fn floating_ips(&self) -> Vec<FloatingIp> {
        self.state
            .read()
            .await
            .floating_ips
            .values()
            .map(|rec| rec.fip.clone())
            .collect()
    }

    pub async fn server_groups(&self) -> Vec<ServerGroup> {
        self.state
            .read()
            .await
            .server_groups
            .values()
            .cloned()
            .collect()
    }

    pub async fn loadbalancers(&self) -> Vec<LoadBalancer> {
        self.state
            .read()
            .await
            .loadbalancers
            .values()
            .map(|rec| rec.lb.clone())
            .collect()
    }

    pub async fn pools(&self) -> Vec<Pool> {
        self.state.read().await.pools.values().cloned().collect()
    }

    pub async fn listeners(&self) -> Vec<Listener> {
        self.state.read().await.listeners.values().cloned().collect()
    }

    pub async fn members_of(&self, pool_id: &str) -> Vec<PoolMember> {
        self.state
            .read()
            .await
            .pool_members
            .get(pool_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every server create request accepted so far, in order.
    pub async fn server_creates(&self) -> Vec<ServerCreateOpts> {
        self.state.read().await.server_creates.clone()
    }

    // ------------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------------

    pub async fn add_flavor(&self, name: &str) -> Flavor {
        let flavor = Flavor {
            id: new_id(),
            name: name.to_string(),
            vcpus: 2,
            ram_mb: 4096,
            disk_gb: 20,
        };
        self.state.write().await.flavors.push(flavor.clone());
        flavor
    }

    pub async fn add_image(&self, name: &str, min_disk_gb: u32) -> Image {
        let image = Image {
            id: new_id(),
            name: name.to_string(),
            min_disk_gb,
        };
        self.state.write().await.images.push(image.clone());
        image
    }

    pub async fn add_network(&self, name: &str, external: bool) -> Network {
        let network = Network {
            id: new_id(),
            name: name.to_string(),
            external,
            subnet_ids: vec![],
            tags: vec![],
        };
        self.state
            .write()
            .await
            .networks
            .insert(network.id.clone(), network.clone());
        network
    }

    pub async fn add_subnet(&self, network_id: &str, name: &str, cidr: &str) -> Subnet {
        let subnet = Subnet {
            id: new_id(),
            name: name.to_string(),
            network_id: network_id.to_string(),
            cidr: cidr.to_string(),
            tags: vec![],
        };
        let mut state = self.state.write().await;
        if let Some(network) = state.networks.get_mut(network_id) {
            network.subnet_ids.push(subnet.id.clone());
        }
        state.subnets.insert(subnet.id.clone(), subnet.clone());
        subnet
    }

    pub async fn add_server_group(&self, name: &str) -> ServerGroup {
        let group = ServerGroup {
            id: new_id(),
            name: name.to_string(),
            policies: vec!["anti-affinity".to_string()],
            members: vec![],
        };
        self.state
            .write()
            .await
            .server_groups
            .insert(group.id.clone(), group.clone());
        group
    }
}

#[async_trait]
impl ComputeApi for InMemoryCloud {
    async fn list_servers(
        &self,
        opts: &ServerListOpts,
        page: PageRequest,
    ) -> ApiResult<Page<Server>> {
        let state = self.enter(ApiCall::ListServers).await?;
        let servers = state
            .servers
            .values()
            .filter(|s| opts.name.as_ref().is_none_or(|name| &s.name == name))
            .filter(|s| opts.tag.as_ref().is_none_or(|tag| s.tags.contains(tag)))
            .map(|s| state.server_view(s))
            .collect();
        paginate(servers, &page, self.page_size)
    }

    async fn get_server(&self, id: &str) -> ApiResult<Server> {
        let state = self.enter(ApiCall::GetServer).await?;
        state
            .servers
            .get(id)
            .map(|s| state.server_view(s))
            .ok_or(ApiError::NotFound)
    }

    async fn create_server(&self, opts: &ServerCreateOpts) -> ApiResult<Server> {
        let mut state = self.enter(ApiCall::CreateServer).await?;
        if !state.images.iter().any(|i| i.id == opts.image_id) {
            return Err(bad_request(format!("image {} does not exist", opts.image_id)));
        }
        if !state.flavors.iter().any(|f| f.id == opts.flavor_id) {
            return Err(bad_request(format!("flavor {} does not exist", opts.flavor_id)));
        }
        for attachment in &opts.networks {
            let port = state
                .ports
                .get(&attachment.port_id)
                .ok_or_else(|| bad_request(format!("port {} does not exist", attachment.port_id)))?;
            if !port.device_id.is_empty() {
                return Err(ApiError::Conflict(format!(
                    "port {} is still in use by {}",
                    port.id, port.device_id
                )));
            }
        }
        if let Some(hints) = &opts.scheduler_hints {
            if !state.server_groups.contains_key(&hints.group) {
                return Err(bad_request(format!(
                    "server group {} does not exist",
                    hints.group
                )));
            }
        }

        let server = Server {
            id: new_id(),
            name: opts.name.clone(),
            status: "ACTIVE".to_string(),
            flavor_id: opts.flavor_id.clone(),
            image_id: opts.image_id.clone(),
            key_name: opts.key_name.clone(),
            availability_zone: opts.availability_zone.clone(),
            metadata: opts.metadata.clone(),
            tags: opts.tags.clone(),
            addresses: BTreeMap::new(),
        };
        let owner = format!(
            "compute:{}",
            opts.availability_zone.as_deref().unwrap_or("nova")
        );
        for attachment in &opts.networks {
            if let Some(port) = state.ports.get_mut(&attachment.port_id) {
                port.device_id.clone_from(&server.id);
                port.device_owner.clone_from(&owner);
            }
        }
        if let Some(group) = opts
            .scheduler_hints
            .as_ref()
            .and_then(|hints| state.server_groups.get_mut(&hints.group))
        {
            group.members.push(server.id.clone());
        }
        state.server_creates.push(opts.clone());
        state.servers.insert(server.id.clone(), server.clone());
        Ok(state.server_view(&server))
    }

    async fn delete_server(&self, id: &str) -> ApiResult<()> {
        let mut state = self.enter(ApiCall::DeleteServer).await?;
        state.servers.remove(id).ok_or(ApiError::NotFound)?;
        for port in state.ports.values_mut().filter(|p| p.device_id == id) {
            port.device_id.clear();
            port.device_owner.clear();
        }
        for group in state.server_groups.values_mut() {
            group.members.retain(|member| member != id);
        }
        Ok(())
    }

    async fn replace_server_metadata(
        &self,
        id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> ApiResult<BTreeMap<String, String>> {
        let mut state = self.enter(ApiCall::ReplaceServerMetadata).await?;
        let server = state.servers.get_mut(id).ok_or(ApiError::NotFound)?;
        server.metadata.clone_from(metadata);
        Ok(server.metadata.clone())
    }

    async fn replace_server_tags(&self, id: &str, tags: &[String]) -> ApiResult<Vec<String>> {
        let mut state = self.enter(ApiCall::ReplaceServerTags).await?;
        let server = state.servers.get_mut(id).ok_or(ApiError::NotFound)?;
        server.tags = tags.to_vec();
        Ok(server.tags.clone())
    }

    async fn list_flavors(&self, page: PageRequest) -> ApiResult<Page<Flavor>> {
        let state = self.enter(ApiCall::ListFlavors).await?;
        paginate(state.flavors.clone(), &page, self.page_size)
    }

    async fn list_server_groups(&self, page: PageRequest) -> ApiResult<Page<ServerGroup>> {
        let state = self.enter(ApiCall::ListServerGroups).await?;
        paginate(
            state.server_groups.values().cloned().collect(),
            &page,
            self.page_size,
        )
    }

    async fn get_server_group(&self, id: &str) -> ApiResult<ServerGroup> {
        let state = self.enter(ApiCall::GetServerGroup).await?;
        state.server_groups.get(id).cloned().ok_or(ApiError::NotFound)
    }

    async fn create_server_group(&self, opts: &ServerGroupCreateOpts) -> ApiResult<ServerGroup> {
        let mut state = self.enter(ApiCall::CreateServerGroup).await?;
        let group = ServerGroup {
            id: new_id(),
            name: opts.name.clone(),
            policies: opts.policies.clone(),
            members: vec![],
        };
        state.server_groups.insert(group.id.clone(), group.clone());
        Ok(group)
    }

    async fn delete_server_group(&self, id: &str) -> ApiResult<()> {
        let mut state = self.enter(ApiCall::DeleteServerGroup).await?;
        state
            .server_groups
            .remove(id)
            .map(|_| ())
            .ok_or(ApiError::NotFound)
    }
}

#[async_trait]
impl ImageApi for InMemoryCloud {
    async fn list_images(&self, name: Option<&str>, page: PageRequest) -> ApiResult<Page<Image>> {
        let state = self.enter(ApiCall::ListImages).await?;
        let images = state
            .images
            .iter()
            .filter(|i| name.is_none_or(|name| i.name == name))
            .cloned()
            .collect();
        paginate(images, &page, self.page_size)
    }

    async fn get_image(&self, id: &str) -> ApiResult<Image> {
        let state = self.enter(ApiCall::GetImage).await?;
        state
            .images
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }
}

#[async_trait]
impl NetworkApi for InMemoryCloud {
    async fn list_ports(&self, opts: &PortListOpts, page: PageRequest) -> ApiResult<Page<Port>> {
        let state = self.enter(ApiCall::ListPorts).await?;
        let ports = state
            .ports
            .values()
            .filter(|p| opts.name.as_ref().is_none_or(|name| &p.name == name))
            .filter(|p| opts.device_id.as_ref().is_none_or(|id| &p.device_id == id))
            .filter(|p| opts.network_id.as_ref().is_none_or(|id| &p.network_id == id))
            .cloned()
            .collect();
        paginate(ports, &page, self.page_size)
    }

    async fn get_port(&self, id: &str) -> ApiResult<Port> {
        let state = self.enter(ApiCall::GetPort).await?;
        state.ports.get(id).cloned().ok_or(ApiError::NotFound)
    }

    async fn create_port(&self, opts: &PortCreateOpts) -> ApiResult<Port> {
        let mut state = self.enter(ApiCall::CreatePort).await?;
        if !state.networks.contains_key(&opts.network_id) {
            return Err(bad_request(format!("network {} does not exist", opts.network_id)));
        }
        let mut fixed_ips = Vec::with_capacity(opts.subnet_ids.len());
        for subnet_id in &opts.subnet_ids {
            let cidr = state
                .subnets
                .get(subnet_id)
                .map(|s| s.cidr.clone())
                .ok_or_else(|| bad_request(format!("subnet {subnet_id} does not exist")))?;
            let host = state.allocate_host();
            fixed_ips.push(FixedIp {
                subnet_id: subnet_id.clone(),
                ip_address: host_address(&cidr, host),
            });
        }
        let port = Port {
            id: new_id(),
            name: opts.name.clone(),
            network_id: opts.network_id.clone(),
            device_id: String::new(),
            device_owner: String::new(),
            fixed_ips,
            security_groups: opts.security_groups.clone(),
            tags: vec![],
        };
        state.ports.insert(port.id.clone(), port.clone());
        Ok(port)
    }

    async fn update_port(&self, id: &str, opts: &PortUpdateOpts) -> ApiResult<Port> {
        let mut state = self.enter(ApiCall::UpdatePort).await?;
        let port = state.ports.get_mut(id).ok_or(ApiError::NotFound)?;
        if let Some(name) = &opts.name {
            port.name.clone_from(name);
        }
        if let Some(device_id) = &opts.device_id {
            port.device_id.clone_from(device_id);
            port.device_owner = if device_id.is_empty() {
                String::new()
            } else {
                "compute:nova".to_string()
            };
        }
        if let Some(groups) = &opts.security_groups {
            port.security_groups.clone_from(groups);
        }
        Ok(port.clone())
    }

    async fn delete_port(&self, id: &str) -> ApiResult<()> {
        let mut state = self.enter(ApiCall::DeletePort).await?;
        state.ports.remove(id).ok_or(ApiError::NotFound)?;
        for rec in state.floating_ips.values_mut() {
            if rec.fip.port_id.as_deref() == Some(id) {
                rec.fip.port_id = None;
                rec.fip.fixed_ip_address = None;
            }
        }
        Ok(())
    }

    async fn list_floating_ips(
        &self,
        opts: &FloatingIpListOpts,
        page: PageRequest,
    ) -> ApiResult<Page<FloatingIp>> {
        let mut state = self.enter(ApiCall::ListFloatingIps).await?;
        let fips = state
            .floating_ips
            .values_mut()
            .filter(|rec| {
                opts.description
                    .as_ref()
                    .is_none_or(|d| &rec.fip.description == d)
            })
            .filter(|rec| {
                opts.port_id
                    .as_ref()
                    .is_none_or(|id| rec.fip.port_id.as_ref() == Some(id))
            })
            .filter(|rec| {
                opts.floating_ip_address
                    .as_ref()
                    .is_none_or(|addr| &rec.fip.floating_ip_address == addr)
            })
            .map(FloatingIpRecord::read)
            .collect();
        paginate(fips, &page, self.page_size)
    }

    async fn get_floating_ip(&self, id: &str) -> ApiResult<FloatingIp> {
        let mut state = self.enter(ApiCall::GetFloatingIp).await?;
        state
            .floating_ips
            .get_mut(id)
            .map(FloatingIpRecord::read)
            .ok_or(ApiError::NotFound)
    }

    async fn create_floating_ip(&self, opts: &FloatingIpCreateOpts) -> ApiResult<FloatingIp> {
        let mut state = self.enter(ApiCall::CreateFloatingIp).await?;
        match state.networks.get(&opts.floating_network_id) {
            Some(network) if network.external => {}
            _ => {
                return Err(bad_request(format!(
                    "{} is not an external network",
                    opts.floating_network_id
                )));
            }
        }
        let fixed_ip_address = match &opts.port_id {
            Some(port_id) => state.fixed_ip_of(port_id)?,
            None => None,
        };
        let host = state.allocate_host();
        let fip = FloatingIp {
            id: new_id(),
            description: opts.description.clone(),
            floating_network_id: opts.floating_network_id.clone(),
            floating_ip_address: host_address("203.0.113.0/24", host),
            port_id: opts.port_id.clone(),
            fixed_ip_address,
            tags: vec![],
        };
        let rec = FloatingIpRecord {
            fip,
            hidden_reads: self.floating_ip_address_delay,
        };
        let view = rec.view();
        state.floating_ips.insert(rec.fip.id.clone(), rec);
        Ok(view)
    }

    async fn update_floating_ip(&self, id: &str, port_id: Option<&str>) -> ApiResult<FloatingIp> {
        let mut state = self.enter(ApiCall::UpdateFloatingIp).await?;
        let fixed_ip_address = match port_id {
            Some(port_id) => state.fixed_ip_of(port_id)?,
            None => None,
        };
        let rec = state.floating_ips.get_mut(id).ok_or(ApiError::NotFound)?;
        rec.fip.port_id = port_id.map(str::to_string);
        rec.fip.fixed_ip_address = fixed_ip_address;
        Ok(rec.view())
    }

    async fn delete_floating_ip(&self, id: &str) -> ApiResult<()> {
        let mut state = self.enter(ApiCall::DeleteFloatingIp).await?;
        state
            .floating_ips
            .remove(id)
            .map(|_| ())
            .ok_or(ApiError::NotFound)
    }

    async fn list_networks(&self, page: PageRequest) -> ApiResult<Page<Network>> {
        let state = self.enter(ApiCall::ListNetworks).await?;
        paginate(
            state.networks.values().cloned().collect(),
            &page,
            self.page_size,
        )
    }

    async fn get_network(&self, id: &str) -> ApiResult<Network> {
        let state = self.enter(ApiCall::GetNetwork).await?;
        state.networks.get(id).cloned().ok_or(ApiError::NotFound)
    }

    async fn get_subnet(&self, id: &str) -> ApiResult<Subnet> {
        let state = self.enter(ApiCall::GetSubnet).await?;
        state.subnets.get(id).cloned().ok_or(ApiError::NotFound)
    }

    async fn add_tag(&self, target: TagTarget, id: &str, tag: &str) -> ApiResult<()> {
        let mut state = self.enter(ApiCall::AddTag).await?;
        let tags = state.tags_mut(target, id)?;
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
        Ok(())
    }

    async fn delete_tag(&self, target: TagTarget, id: &str, tag: &str) -> ApiResult<()> {
        let mut state = self.enter(ApiCall::DeleteTag).await?;
        state.tags_mut(target, id)?.retain(|t| t != tag);
        Ok(())
    }

    async fn replace_all_tags(
        &self,
        target: TagTarget,
        id: &str,
        tags: &[String],
    ) -> ApiResult<Vec<String>> {
        let mut state = self.enter(ApiCall::ReplaceAllTags).await?;
        let current = state.tags_mut(target, id)?;
        *current = tags.to_vec();
        Ok(current.clone())
    }
}

#[async_trait]
impl LoadBalancerApi for InMemoryCloud {
    async fn list_loadbalancers(&self, page: PageRequest) -> ApiResult<Page<LoadBalancer>> {
        let state = self.enter(ApiCall::ListLoadBalancers).await?;
        paginate(
            state.loadbalancers.values().map(|rec| rec.lb.clone()).collect(),
            &page,
            self.page_size,
        )
    }

    async fn get_loadbalancer(&self, id: &str) -> ApiResult<LoadBalancer> {
        let mut state = self.enter(ApiCall::GetLoadBalancer).await?;
        state
            .loadbalancers
            .get_mut(id)
            .map(LoadBalancerRecord::read)
            .ok_or(ApiError::NotFound)
    }

    async fn create_loadbalancer(&self, opts: &LoadBalancerCreateOpts) -> ApiResult<LoadBalancer> {
        let mut state = self.enter(ApiCall::CreateLoadBalancer).await?;
        let subnet = state
            .subnets
            .get(&opts.vip_subnet_id)
            .cloned()
            .ok_or_else(|| bad_request(format!("subnet {} does not exist", opts.vip_subnet_id)))?;
        let host = state.allocate_host();
        let vip_address = host_address(&subnet.cidr, host);
        let lb_id = new_id();
        let vip_port = Port {
            id: new_id(),
            name: format!("octavia-lb-{lb_id}"),
            network_id: subnet.network_id.clone(),
            device_id: lb_id.clone(),
            device_owner: "Octavia".to_string(),
            fixed_ips: vec![FixedIp {
                subnet_id: subnet.id.clone(),
                ip_address: vip_address.clone(),
            }],
            security_groups: vec![],
            tags: vec![],
        };
        let status = if self.loadbalancer_activation_polls > 0 {
            PENDING_CREATE
        } else {
            PROVISIONING_ACTIVE
        };
        let lb = LoadBalancer {
            id: lb_id,
            name: opts.name.clone(),
            vip_subnet_id: subnet.id,
            vip_address,
            vip_port_id: vip_port.id.clone(),
            provisioning_status: status.to_string(),
        };
        state.ports.insert(vip_port.id.clone(), vip_port);
        state.loadbalancers.insert(
            lb.id.clone(),
            LoadBalancerRecord {
                lb: lb.clone(),
                pending_polls: self.loadbalancer_activation_polls,
            },
        );
        Ok(lb)
    }

    async fn delete_loadbalancer(&self, id: &str) -> ApiResult<()> {
        let mut state = self.enter(ApiCall::DeleteLoadBalancer).await?;
        let rec = state.loadbalancers.remove(id).ok_or(ApiError::NotFound)?;
        state.ports.remove(&rec.lb.vip_port_id);
        Ok(())
    }

    async fn list_pools(&self, page: PageRequest) -> ApiResult<Page<Pool>> {
        let state = self.enter(ApiCall::ListPools).await?;
        paginate(state.pools.values().cloned().collect(), &page, self.page_size)
    }

    async fn create_pool(&self, opts: &PoolCreateOpts) -> ApiResult<Pool> {
        let mut state = self.enter(ApiCall::CreatePool).await?;
        if !state.loadbalancers.contains_key(&opts.loadbalancer_id) {
            return Err(bad_request(format!(
                "load balancer {} does not exist",
                opts.loadbalancer_id
            )));
        }
        let pool = Pool {
            id: new_id(),
            name: opts.name.clone(),
            loadbalancer_id: opts.loadbalancer_id.clone(),
            protocol: opts.protocol.clone(),
            lb_method: opts.lb_method.clone(),
        };
        state.pools.insert(pool.id.clone(), pool.clone());
        Ok(pool)
    }

    async fn list_listeners(&self, page: PageRequest) -> ApiResult<Page<Listener>> {
        let state = self.enter(ApiCall::ListListeners).await?;
        paginate(
            state.listeners.values().cloned().collect(),
            &page,
            self.page_size,
        )
    }

    async fn create_listener(&self, opts: &ListenerCreateOpts) -> ApiResult<Listener> {
        let mut state = self.enter(ApiCall::CreateListener).await?;
        if !state.pools.contains_key(&opts.default_pool_id) {
            return Err(bad_request(format!(
                "pool {} does not exist",
                opts.default_pool_id
            )));
        }
        let listener = Listener {
            id: new_id(),
            name: opts.name.clone(),
            default_pool_id: opts.default_pool_id.clone(),
            protocol: opts.protocol.clone(),
            protocol_port: opts.protocol_port,
            allowed_cidrs: opts.allowed_cidrs.clone(),
        };
        state.listeners.insert(listener.id.clone(), listener.clone());
        Ok(listener)
    }

    async fn update_listener(&self, id: &str, allowed_cidrs: &[String]) -> ApiResult<Listener> {
        let mut state = self.enter(ApiCall::UpdateListener).await?;
        let listener = state.listeners.get_mut(id).ok_or(ApiError::NotFound)?;
        listener.allowed_cidrs = allowed_cidrs.to_vec();
        Ok(listener.clone())
    }

    async fn list_pool_members(
        &self,
        pool_id: &str,
        page: PageRequest,
    ) -> ApiResult<Page<PoolMember>> {
        let state = self.enter(ApiCall::ListPoolMembers).await?;
        if !state.pools.contains_key(pool_id) {
            return Err(ApiError::NotFound);
        }
        let members = state.pool_members.get(pool_id).cloned().unwrap_or_default();
        paginate(members, &page, self.page_size)
    }

    async fn create_pool_member(
        &self,
        pool_id: &str,
        opts: &PoolMemberCreateOpts,
    ) -> ApiResult<PoolMember> {
        let mut state = self.enter(ApiCall::CreatePoolMember).await?;
        if !state.pools.contains_key(pool_id) {
            return Err(ApiError::NotFound);
        }
        let members = state.pool_members.entry(pool_id.to_string()).or_default();
        if members
            .iter()
            .any(|m| m.address == opts.address && m.protocol_port == opts.protocol_port)
        {
            return Err(ApiError::Conflict(format!(
                "member {}:{} already exists",
                opts.address, opts.protocol_port
            )));
        }
        let member = PoolMember {
            id: new_id(),
            name: opts.name.clone(),
            address: opts.address.clone(),
            protocol_port: opts.protocol_port,
        };
        members.push(member.clone());
        Ok(member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate_splits_and_marks() {
        let first = paginate(vec![1, 2, 3], &PageRequest::default(), 2);
        assert_eq!(
            first,
            Ok(Page {
                items: vec![1, 2],
                next_marker: Some("2".to_string()),
            })
        );
        let request = PageRequest {
            marker: Some("2".to_string()),
            limit: None,
        };
        assert_eq!(paginate(vec![1, 2, 3], &request, 2), Ok(Page::last(vec![3])));
    }

    #[test]
    fn test_host_address_stays_in_subnet() {
        assert_eq!(host_address("10.1.2.0/24", 10), "10.1.2.12");
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let cloud = InMemoryCloud::new();
        cloud
            .fail_next(ApiCall::ListNetworks, ApiError::Transport("reset".into()))
            .await;
        assert!(cloud.list_networks(PageRequest::default()).await.is_err());
        assert!(cloud.list_networks(PageRequest::default()).await.is_ok());
        assert_eq!(cloud.call_count(ApiCall::ListNetworks).await, 2);
    }

    #[tokio::test]
    async fn test_floating_ip_address_hidden_for_first_reads() -> ApiResult<()> {
        let cloud = InMemoryCloud::new().with_floating_ip_address_delay(2);
        let ext = cloud.add_network("public", true).await;
        let created = cloud
            .create_floating_ip(&FloatingIpCreateOpts {
                description: "fip-a".into(),
                floating_network_id: ext.id,
                port_id: None,
            })
            .await?;
        assert!(created.floating_ip_address.is_empty());

        let mut seen = Vec::new();
        for _ in 0..3 {
            if let Ok(fip) = cloud.get_floating_ip(&created.id).await {
                seen.push(fip.floating_ip_address.is_empty());
            }
        }
        assert_eq!(seen, vec![true, true, false]);
        Ok(())
    }
}

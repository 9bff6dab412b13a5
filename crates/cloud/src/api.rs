//! The boundary to the cloud SDK.
//!
//! Each service sits behind its own trait so tests can substitute the
//! in-memory cloud, and so a real SDK binding only has to translate its
//! responses into these entities and [`ApiError`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use cumulus_core::{Call, Error};

use crate::types::{
    Flavor, FloatingIp, FloatingIpCreateOpts, FloatingIpListOpts, Image, Listener,
    ListenerCreateOpts, LoadBalancer, LoadBalancerCreateOpts, Network, Page, PageRequest, Pool,
    PoolCreateOpts, PoolMember, PoolMemberCreateOpts, Port, PortCreateOpts, PortListOpts,
    PortUpdateOpts, Server, ServerCreateOpts, ServerGroup, ServerGroupCreateOpts, ServerListOpts,
    Subnet, TagTarget,
};

/// Failure reported by the cloud SDK.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("resource not found")]
    NotFound,

    /// HTTP 409.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport failure: {0}")]
    Transport(String),
}

impl ApiError {
    /// Translate into the workspace error taxonomy with the call's context.
    #[must_use]
    pub fn into_error(self, call: &Call) -> Error {
        match self {
            Self::NotFound => Error::not_found(call.kind, call.target.clone()),
            Self::Conflict(reason) => Error::conflict(call, reason),
            other @ (Self::Status { .. } | Self::Transport(_)) => {
                Error::transport(call, other.to_string())
            }
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn list_servers(&self, opts: &ServerListOpts, page: PageRequest)
        -> ApiResult<Page<Server>>;

    async fn get_server(&self, id: &str) -> ApiResult<Server>;

    async fn create_server(&self, opts: &ServerCreateOpts) -> ApiResult<Server>;

    async fn delete_server(&self, id: &str) -> ApiResult<()>;

    /// Replace every metadata item on a server, returning what is now set.
    async fn replace_server_metadata(
        &self,
        id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> ApiResult<BTreeMap<String, String>>;

    /// Replace every tag on a server, returning the tags now set.
    async fn replace_server_tags(&self, id: &str, tags: &[String]) -> ApiResult<Vec<String>>;

    async fn list_flavors(&self, page: PageRequest) -> ApiResult<Page<Flavor>>;

    async fn list_server_groups(&self, page: PageRequest) -> ApiResult<Page<ServerGroup>>;

    async fn get_server_group(&self, id: &str) -> ApiResult<ServerGroup>;

    async fn create_server_group(&self, opts: &ServerGroupCreateOpts) -> ApiResult<ServerGroup>;

    async fn delete_server_group(&self, id: &str) -> ApiResult<()>;
}

#[async_trait]
pub trait ImageApi: Send + Sync {
    /// List images, optionally filtered by exact name.
    async fn list_images(&self, name: Option<&str>, page: PageRequest) -> ApiResult<Page<Image>>;

    async fn get_image(&self, id: &str) -> ApiResult<Image>;
}

#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn list_ports(&self, opts: &PortListOpts, page: PageRequest) -> ApiResult<Page<Port>>;

    async fn get_port(&self, id: &str) -> ApiResult<Port>;

    async fn create_port(&self, opts: &PortCreateOpts) -> ApiResult<Port>;

    async fn update_port(&self, id: &str, opts: &PortUpdateOpts) -> ApiResult<Port>;

    async fn delete_port(&self, id: &str) -> ApiResult<()>;

    async fn list_floating_ips(
        &self,
        opts: &FloatingIpListOpts,
        page: PageRequest,
    ) -> ApiResult<Page<FloatingIp>>;

    async fn get_floating_ip(&self, id: &str) -> ApiResult<FloatingIp>;

    async fn create_floating_ip(&self, opts: &FloatingIpCreateOpts) -> ApiResult<FloatingIp>;

    /// Bind the floating IP to `port_id`, or unbind it with `None`.
    async fn update_floating_ip(&self, id: &str, port_id: Option<&str>) -> ApiResult<FloatingIp>;

    async fn delete_floating_ip(&self, id: &str) -> ApiResult<()>;

    async fn list_networks(&self, page: PageRequest) -> ApiResult<Page<Network>>;

    async fn get_network(&self, id: &str) -> ApiResult<Network>;

    async fn get_subnet(&self, id: &str) -> ApiResult<Subnet>;

    async fn add_tag(&self, target: TagTarget, id: &str, tag: &str) -> ApiResult<()>;

    async fn delete_tag(&self, target: TagTarget, id: &str, tag: &str) -> ApiResult<()>;

    async fn replace_all_tags(
        &self,
        target: TagTarget,
        id: &str,
        tags: &[String],
    ) -> ApiResult<Vec<String>>;
}

#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    async fn list_loadbalancers(&self, page: PageRequest) -> ApiResult<Page<LoadBalancer>>;

    async fn get_loadbalancer(&self, id: &str) -> ApiResult<LoadBalancer>;

    async fn create_loadbalancer(&self, opts: &LoadBalancerCreateOpts) -> ApiResult<LoadBalancer>;

    async fn delete_loadbalancer(&self, id: &str) -> ApiResult<()>;

    async fn list_pools(&self, page: PageRequest) -> ApiResult<Page<Pool>>;

    async fn create_pool(&self, opts: &PoolCreateOpts) -> ApiResult<Pool>;

    async fn list_listeners(&self, page: PageRequest) -> ApiResult<Page<Listener>>;

    async fn create_listener(&self, opts: &ListenerCreateOpts) -> ApiResult<Listener>;

    async fn update_listener(&self, id: &str, allowed_cidrs: &[String]) -> ApiResult<Listener>;

    async fn list_pool_members(&self, pool_id: &str, page: PageRequest)
        -> ApiResult<Page<PoolMember>>;

    async fn create_pool_member(
        &self,
        pool_id: &str,
        opts: &PoolMemberCreateOpts,
    ) -> ApiResult<PoolMember>;
}

/// Handles to every service the facade talks to.
#[derive(Clone)]
pub struct CloudClients {
    pub compute: Arc<dyn ComputeApi>,
    pub network: Arc<dyn NetworkApi>,
    pub image: Arc<dyn ImageApi>,
    pub loadbalancer: Arc<dyn LoadBalancerApi>,
}

impl std::fmt::Debug for CloudClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClients").finish_non_exhaustive()
    }
}

/// Drain a paginated listing.
///
/// # Errors
/// Returns the first page error, or a transport error when the cloud hands
/// back the marker it was just given.
pub async fn all_pages<T, F, Fut>(mut fetch: F) -> ApiResult<Vec<T>>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = ApiResult<Page<T>>>,
{
    let mut items = Vec::new();
    let mut request = PageRequest::default();
    loop {
        let page = fetch(request.clone()).await?;
        items.extend(page.items);
        match page.next_marker {
            Some(marker) if request.marker.as_deref() == Some(marker.as_str()) => {
                return Err(ApiError::Transport(format!(
                    "pagination marker '{marker}' repeated"
                )));
            }
            Some(marker) => request.marker = Some(marker),
            None => return Ok(items),
        }
    }
}

/// Walk a paginated listing until `predicate` matches, without fetching the
/// remaining pages.
///
/// # Errors
/// Returns the first page error, or a transport error on a repeated marker.
pub async fn find_in_pages<T, F, Fut, P>(mut fetch: F, mut predicate: P) -> ApiResult<Option<T>>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = ApiResult<Page<T>>>,
    P: FnMut(&T) -> bool,
{
    let mut request = PageRequest::default();
    loop {
        let page = fetch(request.clone()).await?;
        if let Some(found) = page.items.into_iter().find(|item| predicate(item)) {
            return Ok(Some(found));
        }
        match page.next_marker {
            Some(marker) if request.marker.as_deref() == Some(marker.as_str()) => {
                return Err(ApiError::Transport(format!(
                    "pagination marker '{marker}' repeated"
                )));
            }
            Some(marker) => request.marker = Some(marker),
            None => return Ok(None),
        }
    }
}

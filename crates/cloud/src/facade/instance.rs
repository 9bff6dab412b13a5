use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use cumulus_core::{Attempt, Call, Operation, OptionExt, ResourceKind, Result};

use super::Cloud;
use crate::api::all_pages;
use crate::types::{
    AddressType, Flavor, PortListOpts, PortUpdateOpts, Server, ServerCreateOpts,
    ServerListOpts,
};

impl Cloud {
    /// # Errors
    /// `NotFound` when no server has this ID.
    pub async fn get_instance(&self, id: &str) -> Result<Server> {
        let call = Call::get(ResourceKind::Instance, id);
        self.read(&call, || self.clients.compute.get_server(id)).await
    }

    /// # Errors
    /// Surfaces the listing failure after the read budget is spent.
    pub async fn list_instances(&self, opts: &ServerListOpts) -> Result<Vec<Server>> {
        let target = opts.tag.as_deref().or(opts.name.as_deref()).unwrap_or("*");
        let call = Call::list(ResourceKind::Instance, target);
        self.read(&call, || {
            all_pages(|page| self.clients.compute.list_servers(opts, page))
        })
        .await
    }

    /// Create a server attached to `port_id`.
    ///
    /// A conflict caused by a stale binding on the port (a device ID with no
    /// owner left behind by a deleted server) is recovered by clearing the
    /// binding and retrying the create once. Any other conflict surfaces.
    ///
    /// # Errors
    /// `Conflict` when the port is genuinely in use, or the create fails
    /// after the write budget is spent.
    pub async fn create_instance(
        &self,
        opts: &ServerCreateOpts,
        port_id: Option<&str>,
    ) -> Result<Server> {
        let call = Call::create(ResourceKind::Instance, opts.name.as_str());
        let first = self
            .write(&call, || self.clients.compute.create_server(opts))
            .await;

        match (first, port_id) {
            (Err(e), Some(port_id)) if e.is_conflict() => {
                if !self.clear_stale_port_binding(port_id).await? {
                    return Err(e);
                }
                info!(instance = %opts.name, port_id, "Retrying create after clearing stale port binding");
                self.write(&call, || self.clients.compute.create_server(opts))
                    .await
            }
            (result, _) => result,
        }
    }

    /// Clear the device binding of a port whose owner is gone.
    ///
    /// Returns whether a binding was cleared.
    async fn clear_stale_port_binding(&self, port_id: &str) -> Result<bool> {
        let port = self.get_port(port_id).await?;
        if !port.has_stale_binding() {
            debug!(port_id, device_owner = %port.device_owner, "Port binding is not stale");
            return Ok(false);
        }
        warn!(port_id, device_id = %port.device_id, "Clearing stale device binding on port");
        let opts = PortUpdateOpts {
            device_id: Some(String::new()),
            ..PortUpdateOpts::default()
        };
        self.update_port(port_id, &opts).await?;
        Ok(true)
    }

    /// # Errors
    /// Surfaces the delete failure after the write budget is spent. A server
    /// that is already gone is not an error.
    pub async fn delete_instance(&self, id: &str) -> Result<()> {
        let call = Call::delete(ResourceKind::Instance, id);
        self.delete(&call, || self.clients.compute.delete_server(id))
            .await
    }

    /// Delete a server together with every port bound to it.
    ///
    /// # Errors
    /// The first port or server deletion failure.
    pub async fn delete_instance_with_ports(&self, id: &str) -> Result<()> {
        let opts = PortListOpts {
            device_id: Some(id.to_string()),
            ..PortListOpts::default()
        };
        for port in self.list_ports(&opts).await? {
            debug!(instance_id = id, port_id = %port.id, "Deleting port of instance");
            self.delete_port(&port.id).await?;
        }
        self.delete_instance(id).await
    }

    /// Replace the metadata of a server.
    ///
    /// # Errors
    /// `NotFound` when the server is gone, or the update fails after the
    /// write budget is spent.
    pub async fn replace_instance_metadata(
        &self,
        id: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let call = Call::update(ResourceKind::Instance, id);
        self.write(&call, || {
            self.clients.compute.replace_server_metadata(id, metadata)
        })
        .await
    }

    /// Replace the tags of a server.
    ///
    /// # Errors
    /// `NotFound` when the server is gone, or the update fails after the
    /// write budget is spent.
    pub async fn replace_instance_tags(&self, id: &str, tags: &[String]) -> Result<Vec<String>> {
        let call = Call::new(ResourceKind::Instance, Operation::Tag, id);
        self.write(&call, || self.clients.compute.replace_server_tags(id, tags))
            .await
    }

    /// Public addresses of a server, waiting until the cloud reports some.
    ///
    /// With floating IPs disabled, fixed addresses are reported instead.
    ///
    /// # Errors
    /// `ConvergenceTimeout` when the server never reports an address, or the
    /// server lookup failure.
    pub async fn list_server_floating_ips(&self, id: &str) -> Result<Vec<String>> {
        let call = Call::new(ResourceKind::Instance, Operation::Poll, id);
        let wanted = if self.settings.floating_ips_enabled {
            AddressType::Floating
        } else {
            AddressType::Fixed
        };
        let call_ref = &call;
        self.poll(call_ref, move || async move {
            let server = self
                .clients
                .compute
                .get_server(id)
                .await
                .map_err(|e| e.into_error(call_ref))?;
            let addresses = server_addresses(&server, wanted);
            Ok(if addresses.is_empty() {
                Attempt::Pending
            } else {
                Attempt::Done(addresses)
            })
        })
        .await
    }

    /// # Errors
    /// `NotFound` when no flavor has this name.
    pub async fn get_flavor(&self, name: &str) -> Result<Flavor> {
        let call = Call::list(ResourceKind::Flavor, name);
        self.read(&call, || {
            all_pages(|page| self.clients.compute.list_flavors(page))
        })
        .await?
        .into_iter()
        .find(|flavor| flavor.name == name)
        .ok_or_not_found(ResourceKind::Flavor, name)
    }
}

fn server_addresses(server: &Server, wanted: AddressType) -> Vec<String> {
    server
        .addresses
        .values()
        .flatten()
        .filter(|address| address.address_type == wanted)
        .map(|address| address.addr.clone())
        .collect()
}

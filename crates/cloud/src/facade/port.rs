use cumulus_core::{Call, ResourceKind, Result};

use super::Cloud;
use crate::api::all_pages;
use crate::types::{Port, PortCreateOpts, PortListOpts, PortUpdateOpts};

impl Cloud {
    /// # Errors
    /// `NotFound` when no port has this ID.
    pub async fn get_port(&self, id: &str) -> Result<Port> {
        let call = Call::get(ResourceKind::Port, id);
        self.read(&call, || self.clients.network.get_port(id)).await
    }

    /// # Errors
    /// Surfaces the listing failure after the read budget is spent.
    pub async fn list_ports(&self, opts: &PortListOpts) -> Result<Vec<Port>> {
        let target = opts
            .name
            .as_deref()
            .or(opts.device_id.as_deref())
            .unwrap_or("*");
        let call = Call::list(ResourceKind::Port, target);
        self.read(&call, || {
            all_pages(|page| self.clients.network.list_ports(opts, page))
        })
        .await
    }

    /// # Errors
    /// Surfaces the create failure after the write budget is spent.
    pub async fn create_port(&self, opts: &PortCreateOpts) -> Result<Port> {
        let call = Call::create(ResourceKind::Port, opts.name.as_str());
        self.write(&call, || self.clients.network.create_port(opts))
            .await
    }

    /// # Errors
    /// Surfaces the update failure after the write budget is spent.
    pub async fn update_port(&self, id: &str, opts: &PortUpdateOpts) -> Result<Port> {
        let call = Call::update(ResourceKind::Port, id);
        self.write(&call, || self.clients.network.update_port(id, opts))
            .await
    }

    /// # Errors
    /// Surfaces the delete failure after the write budget is spent. A port
    /// that is already gone is not an error.
    pub async fn delete_port(&self, id: &str) -> Result<()> {
        let call = Call::delete(ResourceKind::Port, id);
        self.delete(&call, || self.clients.network.delete_port(id))
            .await
    }
}

use tracing::debug;

use cumulus_core::{Attempt, Call, Operation, ResourceKind, Result};

use super::Cloud;
use crate::api::all_pages;
use crate::types::{FloatingIp, FloatingIpCreateOpts, FloatingIpListOpts};

impl Cloud {
    /// # Errors
    /// `NotFound` when no floating IP has this ID.
    pub async fn get_floating_ip(&self, id: &str) -> Result<FloatingIp> {
        let call = Call::get(ResourceKind::FloatingIp, id);
        self.read(&call, || self.clients.network.get_floating_ip(id))
            .await
    }

    /// # Errors
    /// Surfaces the listing failure after the read budget is spent.
    pub async fn list_floating_ips(&self, opts: &FloatingIpListOpts) -> Result<Vec<FloatingIp>> {
        let target = opts
            .description
            .as_deref()
            .or(opts.port_id.as_deref())
            .unwrap_or("*");
        let call = Call::list(ResourceKind::FloatingIp, target);
        self.read(&call, || {
            all_pages(|page| self.clients.network.list_floating_ips(opts, page))
        })
        .await
    }

    /// # Errors
    /// Surfaces the create failure after the write budget is spent.
    pub async fn create_floating_ip(&self, opts: &FloatingIpCreateOpts) -> Result<FloatingIp> {
        let call = Call::create(ResourceKind::FloatingIp, opts.description.as_str());
        self.write(&call, || self.clients.network.create_floating_ip(opts))
            .await
    }

    /// Bind a floating IP to a port.
    ///
    /// Binding an IP to the port it is already bound to changes nothing.
    ///
    /// # Errors
    /// Surfaces the lookup or update failure.
    pub async fn associate_floating_ip(&self, id: &str, port_id: &str) -> Result<FloatingIp> {
        let current = self.get_floating_ip(id).await?;
        if current.port_id.as_deref() == Some(port_id) {
            debug!(floating_ip_id = id, port_id, "Floating IP already associated");
            return Ok(current);
        }
        let call = Call::update(ResourceKind::FloatingIp, id);
        self.write(&call, || {
            self.clients.network.update_floating_ip(id, Some(port_id))
        })
        .await
    }

    /// Wait until the cloud has allocated an address for the floating IP.
    ///
    /// # Errors
    /// `ConvergenceTimeout` when no address appears within the poll budget.
    pub async fn wait_for_floating_ip_address(&self, id: &str) -> Result<FloatingIp> {
        let call = Call::new(ResourceKind::FloatingIp, Operation::Poll, id);
        let call_ref = &call;
        self.poll(call_ref, move || async move {
            let fip = self
                .clients
                .network
                .get_floating_ip(id)
                .await
                .map_err(|e| e.into_error(call_ref))?;
            Ok(if fip.floating_ip_address.is_empty() {
                Attempt::Pending
            } else {
                Attempt::Done(fip)
            })
        })
        .await
    }

    /// # Errors
    /// Surfaces the delete failure after the write budget is spent. A
    /// floating IP that is already gone is not an error.
    pub async fn delete_floating_ip(&self, id: &str) -> Result<()> {
        let call = Call::delete(ResourceKind::FloatingIp, id);
        self.delete(&call, || self.clients.network.delete_floating_ip(id))
            .await
    }
}

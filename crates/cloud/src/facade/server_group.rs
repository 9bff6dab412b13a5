use cumulus_core::{Call, ResourceKind, Result};

use super::Cloud;
use crate::api::all_pages;
use crate::types::{ServerGroup, ServerGroupCreateOpts};

impl Cloud {
    /// # Errors
    /// `NotFound` when no server group has this ID.
    pub async fn get_server_group(&self, id: &str) -> Result<ServerGroup> {
        let call = Call::get(ResourceKind::ServerGroup, id);
        self.read(&call, || self.clients.compute.get_server_group(id))
            .await
    }

    /// # Errors
    /// Surfaces the listing failure after the read budget is spent.
    pub async fn list_server_groups(&self) -> Result<Vec<ServerGroup>> {
        let call = Call::list(ResourceKind::ServerGroup, "*");
        self.read(&call, || {
            all_pages(|page| self.clients.compute.list_server_groups(page))
        })
        .await
    }

    /// # Errors
    /// Surfaces the create failure after the write budget is spent.
    pub async fn create_server_group(&self, opts: &ServerGroupCreateOpts) -> Result<ServerGroup> {
        let call = Call::create(ResourceKind::ServerGroup, opts.name.as_str());
        self.write(&call, || self.clients.compute.create_server_group(opts))
            .await
    }

    /// # Errors
    /// Surfaces the delete failure after the write budget is spent.
    pub async fn delete_server_group(&self, id: &str) -> Result<()> {
        let call = Call::delete(ResourceKind::ServerGroup, id);
        self.delete(&call, || self.clients.compute.delete_server_group(id))
            .await
    }
}

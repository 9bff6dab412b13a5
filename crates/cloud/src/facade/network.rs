use cumulus_core::{Call, Error, OptionExt, ResourceKind, Result};

use super::Cloud;
use crate::api::{all_pages, find_in_pages};
use crate::types::{Network, Subnet};

impl Cloud {
    /// # Errors
    /// `NotFound` when no network has this ID.
    pub async fn get_network(&self, id: &str) -> Result<Network> {
        let call = Call::get(ResourceKind::Network, id);
        self.read(&call, || self.clients.network.get_network(id))
            .await
    }

    /// # Errors
    /// Surfaces the listing failure after the read budget is spent.
    pub async fn list_networks(&self) -> Result<Vec<Network>> {
        let call = Call::list(ResourceKind::Network, "*");
        self.read(&call, || {
            all_pages(|page| self.clients.network.list_networks(page))
        })
        .await
    }

    /// # Errors
    /// `NotFound` when no subnet has this ID.
    pub async fn get_subnet(&self, id: &str) -> Result<Subnet> {
        let call = Call::get(ResourceKind::Subnet, id);
        self.read(&call, || self.clients.network.get_subnet(id)).await
    }

    /// The network a subnet belongs to.
    ///
    /// # Errors
    /// `NotFound` when the subnet or its network is missing.
    pub async fn find_network_by_subnet_id(&self, subnet_id: &str) -> Result<Network> {
        let subnet = self.get_subnet(subnet_id).await?;
        self.get_network(&subnet.network_id).await
    }

    /// The configured external network, which floating IPs are drawn from.
    ///
    /// Pages are fetched only until the network turns up.
    ///
    /// # Errors
    /// `InvalidConfig` when no external network is configured, `NotFound` when
    /// the cloud has no external network by that name.
    pub async fn get_external_network(&self) -> Result<Network> {
        let name = self
            .settings
            .external_network
            .as_deref()
            .ok_or_else(|| Error::invalid_config("no external network configured"))?;
        let call = Call::list(ResourceKind::Network, name);
        self.read(&call, || {
            find_in_pages(
                |page| self.clients.network.list_networks(page),
                |network: &Network| network.external && network.name == name,
            )
        })
        .await?
        .ok_or_not_found(ResourceKind::Network, name)
    }
}

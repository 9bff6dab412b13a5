use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::info;

use cumulus_cloud::types::{FloatingIpCreateOpts, FloatingIpListOpts};
use cumulus_core::{at_most_one, Error, ResourceKind, Result};

use crate::task::{
    link_changed, reject_immutable, Link, OutputMap, ResourceTask, TaskContext, TaskField,
    TaskKey, TaskOutput,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FloatingIpField {
    Name,
    LoadBalancer,
}

impl TaskField for FloatingIpField {
    fn name(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::LoadBalancer => "loadbalancer",
        }
    }
}

/// A floating IP, found by its description.
///
/// Instance floating IPs are allocated unbound; the instance binds them to
/// its port. A load balancer's floating IP is bound to the VIP port at
/// allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatingIp {
    pub name: String,
    pub id: Option<String>,
    pub address: Option<String>,
    pub loadbalancer: Option<Link>,
    /// Must be included in the API server certificate.
    pub for_api_server: bool,
}

impl FloatingIp {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            address: None,
            loadbalancer: None,
            for_api_server: false,
        }
    }

    #[must_use]
    pub fn for_loadbalancer(mut self, loadbalancer: TaskKey) -> Self {
        self.loadbalancer = Some(Link::to(loadbalancer));
        self
    }

    #[must_use]
    pub const fn is_for_api_server(&self) -> bool {
        self.for_api_server
    }

    fn vip_port(&self) -> Option<&str> {
        self.loadbalancer.as_ref().and_then(Link::port_id)
    }
}

#[async_trait]
impl ResourceTask for FloatingIp {
    type Field = FloatingIpField;

    fn key(&self) -> TaskKey {
        TaskKey::floating_ip(self.name.clone())
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.loadbalancer
            .iter()
            .map(|link| link.key().clone())
            .collect()
    }

    fn resolve(&mut self, outputs: &OutputMap) {
        if let Some(link) = &mut self.loadbalancer {
            link.resolve(outputs);
        }
    }

    async fn find(&self, ctx: &TaskContext) -> Result<Option<Self>> {
        let opts = FloatingIpListOpts {
            description: Some(self.name.clone()),
            ..FloatingIpListOpts::default()
        };
        let fips = ctx.cloud.list_floating_ips(&opts).await?;
        let Some(fip) = at_most_one(ResourceKind::FloatingIp, &self.name, fips)? else {
            return Ok(None);
        };
        // A bound load balancer IP is reported against the VIP port.
        let loadbalancer = match (&self.loadbalancer, &fip.port_id) {
            (Some(desired), Some(port_id)) if desired.port_id() == Some(port_id.as_str()) => {
                Some(desired.clone())
            }
            _ => None,
        };
        Ok(Some(Self {
            name: fip.description,
            id: Some(fip.id),
            address: (!fip.floating_ip_address.is_empty()).then_some(fip.floating_ip_address),
            loadbalancer,
            for_api_server: self.for_api_server,
        }))
    }

    fn adopt(&mut self, actual: &Self) {
        self.id.clone_from(&actual.id);
        self.address.clone_from(&actual.address);
    }

    fn changes(&self, actual: &Self) -> BTreeSet<FloatingIpField> {
        let mut changes = BTreeSet::new();
        if self.name != actual.name {
            changes.insert(FloatingIpField::Name);
        }
        if link_changed(self.loadbalancer.as_ref(), actual.loadbalancer.as_ref()) {
            changes.insert(FloatingIpField::LoadBalancer);
        }
        changes
    }

    fn check_changes(
        &self,
        actual: Option<&Self>,
        changes: &BTreeSet<FloatingIpField>,
    ) -> Result<()> {
        match actual {
            None if self.name.is_empty() => {
                Err(Error::required_field(ResourceKind::FloatingIp, "name"))
            }
            None => Ok(()),
            Some(_) => reject_immutable(&ResourceTask::key(self), changes, &[FloatingIpField::Name]),
        }
    }

    async fn render(
        &mut self,
        ctx: &TaskContext,
        actual: Option<&Self>,
        _changes: &BTreeSet<FloatingIpField>,
    ) -> Result<()> {
        let key = ResourceTask::key(self);
        let port_id = match &self.loadbalancer {
            Some(lb) => Some(
                lb.port_id()
                    .ok_or_else(|| {
                        Error::render(
                            key.kind,
                            key.name.clone(),
                            format!("{} has no VIP port yet", lb.key()),
                        )
                    })?
                    .to_string(),
            ),
            None => None,
        };

        if actual.is_some() {
            // Only the load balancer binding can drift.
            if let (Some(id), Some(port_id)) = (&self.id, &port_id) {
                info!(floating_ip = %self.name, port = %port_id, "Rebinding floating IP to VIP");
                ctx.cloud.associate_floating_ip(id, port_id).await?;
            }
            return Ok(());
        }

        let network = ctx.cloud.get_external_network().await?;
        let opts = FloatingIpCreateOpts {
            description: self.name.clone(),
            floating_network_id: network.id,
            port_id,
        };
        let created = ctx.cloud.create_floating_ip(&opts).await?;
        info!(floating_ip = %self.name, id = %created.id, "Allocated floating IP");
        let fip = ctx.cloud.wait_for_floating_ip_address(&created.id).await?;
        self.id = Some(fip.id);
        self.address = Some(fip.floating_ip_address);
        Ok(())
    }

    async fn output(&self, _ctx: &TaskContext) -> Result<TaskOutput> {
        Ok(TaskOutput {
            id: self.id.clone(),
            address: self.address.clone(),
            port_id: self.vip_port().map(str::to_string),
            members: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loadbalancer_ip_depends_on_loadbalancer() {
        let fip = FloatingIp::new("fip-api.example.com")
            .for_loadbalancer(TaskKey::loadbalancer("api.example.com"));
        assert_eq!(
            ResourceTask::dependencies(&fip),
            vec![TaskKey::loadbalancer("api.example.com")]
        );
        assert!(ResourceTask::dependencies(&FloatingIp::new("fip-nodes-1")).is_empty());
    }

    #[test]
    fn test_instance_ip_has_no_binding_changes() {
        let desired = FloatingIp::new("fip-nodes-1");
        let mut actual = FloatingIp::new("fip-nodes-1");
        actual.id = Some("fip-1".to_string());
        assert!(desired.changes(&actual).is_empty());
    }
}

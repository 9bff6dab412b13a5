use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::info;

use cumulus_cloud::types::{Port as CloudPort, PortCreateOpts, PortListOpts, PortUpdateOpts, TagTarget};
use cumulus_core::{at_most_one, Error, ResourceKind, Result};

use crate::tags::Tags;
use crate::task::{
    reject_immutable, OutputMap, ResourceTask, TaskContext, TaskField, TaskKey, TaskOutput,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PortField {
    Network,
    Subnets,
    SecurityGroups,
    Tags,
}

impl TaskField for PortField {
    fn name(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Subnets => "subnets",
            Self::SecurityGroups => "security_groups",
            Self::Tags => "tags",
        }
    }
}

/// A network port, found by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    pub name: String,
    pub id: Option<String>,
    pub network_id: String,
    pub subnet_ids: Vec<String>,
    pub security_groups: Vec<String>,
    pub tags: Tags,
    /// First fixed IP, known once the port exists.
    pub address: Option<String>,
}

impl Port {
    pub fn new(name: impl Into<String>, network_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            network_id: network_id.into(),
            subnet_ids: Vec::new(),
            security_groups: Vec::new(),
            tags: Tags::default(),
            address: None,
        }
    }

    fn from_cloud(port: CloudPort) -> Self {
        let address = port.fixed_ips.first().map(|ip| ip.ip_address.clone());
        Self {
            name: port.name,
            id: Some(port.id),
            network_id: port.network_id,
            subnet_ids: port.fixed_ips.into_iter().map(|ip| ip.subnet_id).collect(),
            security_groups: port.security_groups,
            tags: Tags::from(port.tags),
            address,
        }
    }

    async fn retag(&self, ctx: &TaskContext, id: &str) -> Result<()> {
        ctx.cloud
            .replace_all_tags(TagTarget::Ports, id, self.tags.as_slice())
            .await?;
        Ok(())
    }
}

fn sorted(items: &[String]) -> BTreeSet<&str> {
    items.iter().map(String::as_str).collect()
}

#[async_trait]
impl ResourceTask for Port {
    type Field = PortField;

    fn key(&self) -> TaskKey {
        TaskKey::port(self.name.clone())
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        Vec::new()
    }

    fn resolve(&mut self, _outputs: &OutputMap) {}

    async fn find(&self, ctx: &TaskContext) -> Result<Option<Self>> {
        let opts = PortListOpts {
            name: Some(self.name.clone()),
            ..PortListOpts::default()
        };
        let ports = ctx.cloud.list_ports(&opts).await?;
        Ok(at_most_one(ResourceKind::Port, &self.name, ports)?.map(Self::from_cloud))
    }

    fn adopt(&mut self, actual: &Self) {
        self.id.clone_from(&actual.id);
        self.address.clone_from(&actual.address);
    }

    fn changes(&self, actual: &Self) -> BTreeSet<PortField> {
        let mut changes = BTreeSet::new();
        if self.network_id != actual.network_id {
            changes.insert(PortField::Network);
        }
        if !self.subnet_ids.is_empty() && sorted(&self.subnet_ids) != sorted(&actual.subnet_ids) {
            changes.insert(PortField::Subnets);
        }
        if sorted(&self.security_groups) != sorted(&actual.security_groups) {
            changes.insert(PortField::SecurityGroups);
        }
        if self.tags != actual.tags {
            changes.insert(PortField::Tags);
        }
        changes
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &BTreeSet<PortField>) -> Result<()> {
        match actual {
            None if self.name.is_empty() => Err(Error::required_field(ResourceKind::Port, "name")),
            None if self.network_id.is_empty() => {
                Err(Error::required_field(ResourceKind::Port, "network"))
            }
            None => Ok(()),
            Some(_) => reject_immutable(
                &ResourceTask::key(self),
                changes,
                &[PortField::Network, PortField::Subnets],
            ),
        }
    }

    async fn render(
        &mut self,
        ctx: &TaskContext,
        actual: Option<&Self>,
        changes: &BTreeSet<PortField>,
    ) -> Result<()> {
        if actual.is_none() {
            let opts = PortCreateOpts {
                name: self.name.clone(),
                network_id: self.network_id.clone(),
                subnet_ids: self.subnet_ids.clone(),
                security_groups: self.security_groups.clone(),
            };
            let port = ctx.cloud.create_port(&opts).await?;
            info!(port = %self.name, id = %port.id, "Created port");
            if !self.tags.is_empty() {
                self.retag(ctx, &port.id).await?;
            }
            self.address = port.fixed_ips.first().map(|ip| ip.ip_address.clone());
            self.id = Some(port.id);
            return Ok(());
        }

        let key = ResourceTask::key(self);
        let id = self
            .id
            .clone()
            .ok_or_else(|| Error::render(key.kind, key.name.clone(), "live port has no ID"))?;
        if changes.contains(&PortField::SecurityGroups) {
            info!(port = %self.name, "Updating security groups");
            let opts = PortUpdateOpts {
                security_groups: Some(self.security_groups.clone()),
                ..PortUpdateOpts::default()
            };
            ctx.cloud.update_port(&id, &opts).await?;
        }
        if changes.contains(&PortField::Tags) {
            info!(port = %self.name, "Replacing tags");
            self.retag(ctx, &id).await?;
        }
        Ok(())
    }

    async fn output(&self, _ctx: &TaskContext) -> Result<TaskOutput> {
        Ok(TaskOutput {
            id: self.id.clone(),
            address: self.address.clone(),
            port_id: self.id.clone(),
            members: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port() -> Port {
        let mut port = Port::new("port-nodes-1", "net-1");
        port.subnet_ids = vec!["sub-1".to_string()];
        port.security_groups = vec!["nodes.example.com".to_string()];
        port.tags = Tags::new(["InstanceName:nodes-1-example-com", "example.com"]);
        port
    }

    #[test]
    fn test_tag_order_is_not_a_change() {
        let desired = port();
        let mut actual = port();
        actual.tags = Tags::new(["example.com", "InstanceName:nodes-1-example-com"]);
        assert!(desired.changes(&actual).is_empty());
    }

    #[test]
    fn test_network_cannot_change() {
        let desired = port();
        let mut actual = port();
        actual.network_id = "net-2".to_string();
        let changes = desired.changes(&actual);
        assert!(matches!(
            desired.check_changes(Some(&actual), &changes),
            Err(Error::CannotChangeField { field: "network", .. })
        ));
    }

    #[test]
    fn test_security_groups_update_in_place() {
        let desired = port();
        let mut actual = port();
        actual.security_groups.clear();
        let changes = desired.changes(&actual);
        assert_eq!(changes, BTreeSet::from([PortField::SecurityGroups]));
        assert!(desired.check_changes(Some(&actual), &changes).is_ok());
        assert!(!desired.should_create(Some(&actual), &changes));
    }
}

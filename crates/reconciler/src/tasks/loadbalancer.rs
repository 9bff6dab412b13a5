use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::info;

use cumulus_cloud::types::{LoadBalancer as CloudLoadBalancer, LoadBalancerCreateOpts};
use cumulus_core::{at_most_one, Error, ResourceKind, Result};

use crate::task::{
    reject_immutable, OutputMap, ResourceTask, TaskContext, TaskField, TaskKey, TaskOutput,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadBalancerField {
    Name,
    Subnet,
}

impl TaskField for LoadBalancerField {
    fn name(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Subnet => "subnet",
        }
    }
}

/// The API load balancer. Publishes its VIP address and VIP port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancer {
    pub name: String,
    pub id: Option<String>,
    pub subnet_id: String,
    pub provider: Option<String>,
    pub vip_address: Option<String>,
    pub vip_port_id: Option<String>,
}

impl LoadBalancer {
    pub fn new(name: impl Into<String>, subnet_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            subnet_id: subnet_id.into(),
            provider: None,
            vip_address: None,
            vip_port_id: None,
        }
    }

    fn from_cloud(lb: CloudLoadBalancer, provider: Option<String>) -> Self {
        Self {
            name: lb.name,
            id: Some(lb.id),
            subnet_id: lb.vip_subnet_id,
            provider,
            vip_address: Some(lb.vip_address),
            vip_port_id: Some(lb.vip_port_id),
        }
    }
}

#[async_trait]
impl ResourceTask for LoadBalancer {
    type Field = LoadBalancerField;

    fn key(&self) -> TaskKey {
        TaskKey::loadbalancer(self.name.clone())
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        Vec::new()
    }

    fn resolve(&mut self, _outputs: &OutputMap) {}

    async fn find(&self, ctx: &TaskContext) -> Result<Option<Self>> {
        let lbs = ctx
            .cloud
            .list_loadbalancers()
            .await?
            .into_iter()
            .filter(|lb| lb.name == self.name)
            .collect();
        Ok(at_most_one(ResourceKind::LoadBalancer, &self.name, lbs)?
            .map(|lb| Self::from_cloud(lb, self.provider.clone())))
    }

    fn adopt(&mut self, actual: &Self) {
        self.id.clone_from(&actual.id);
        self.vip_address.clone_from(&actual.vip_address);
        self.vip_port_id.clone_from(&actual.vip_port_id);
    }

    fn changes(&self, actual: &Self) -> BTreeSet<LoadBalancerField> {
        let mut changes = BTreeSet::new();
        if self.name != actual.name {
            changes.insert(LoadBalancerField::Name);
        }
        if self.subnet_id != actual.subnet_id {
            changes.insert(LoadBalancerField::Subnet);
        }
        changes
    }

    fn check_changes(
        &self,
        actual: Option<&Self>,
        changes: &BTreeSet<LoadBalancerField>,
    ) -> Result<()> {
        match actual {
            None if self.subnet_id.is_empty() => {
                Err(Error::required_field(ResourceKind::LoadBalancer, "subnet"))
            }
            None => Ok(()),
            Some(_) => reject_immutable(
                &ResourceTask::key(self),
                changes,
                &[LoadBalancerField::Name, LoadBalancerField::Subnet],
            ),
        }
    }

    async fn render(
        &mut self,
        ctx: &TaskContext,
        _actual: Option<&Self>,
        _changes: &BTreeSet<LoadBalancerField>,
    ) -> Result<()> {
        let opts = LoadBalancerCreateOpts {
            name: self.name.clone(),
            vip_subnet_id: self.subnet_id.clone(),
            provider: self.provider.clone(),
        };
        let created = ctx.cloud.create_loadbalancer(&opts).await?;
        info!(loadbalancer = %self.name, id = %created.id, "Created load balancer, waiting for it to become active");
        let lb = ctx.cloud.wait_for_loadbalancer_active(&created.id).await?;
        *self = Self::from_cloud(lb, self.provider.clone());
        Ok(())
    }

    async fn output(&self, _ctx: &TaskContext) -> Result<TaskOutput> {
        Ok(TaskOutput {
            id: self.id.clone(),
            address: self.vip_address.clone(),
            port_id: self.vip_port_id.clone(),
            members: Vec::new(),
        })
    }
}

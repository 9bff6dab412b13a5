use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::info;

use cumulus_cloud::types::PoolCreateOpts;
use cumulus_core::{at_most_one, ResourceKind, Result};

use crate::task::{
    link_changed, reject_immutable, Link, OutputMap, ResourceTask, TaskContext, TaskField,
    TaskKey, TaskOutput,
};

pub const PROTOCOL_TCP: &str = "TCP";
pub const ROUND_ROBIN: &str = "ROUND_ROBIN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LbPoolField {
    LoadBalancer,
    Protocol,
}

impl TaskField for LbPoolField {
    fn name(self) -> &'static str {
        match self {
            Self::LoadBalancer => "loadbalancer",
            Self::Protocol => "protocol",
        }
    }
}

/// A TCP round-robin pool behind the API load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbPool {
    pub name: String,
    pub id: Option<String>,
    pub loadbalancer: Link,
    pub protocol: String,
    pub lb_method: String,
}

impl LbPool {
    pub fn new(name: impl Into<String>, loadbalancer: TaskKey) -> Self {
        Self {
            name: name.into(),
            id: None,
            loadbalancer: Link::to(loadbalancer),
            protocol: PROTOCOL_TCP.to_string(),
            lb_method: ROUND_ROBIN.to_string(),
        }
    }
}

#[async_trait]
impl ResourceTask for LbPool {
    type Field = LbPoolField;

    fn key(&self) -> TaskKey {
        TaskKey::pool(self.name.clone())
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        vec![self.loadbalancer.key().clone()]
    }

    fn resolve(&mut self, outputs: &OutputMap) {
        self.loadbalancer.resolve(outputs);
    }

    async fn find(&self, ctx: &TaskContext) -> Result<Option<Self>> {
        let pools = ctx
            .cloud
            .list_pools()
            .await?
            .into_iter()
            .filter(|pool| pool.name == self.name)
            .collect();
        Ok(at_most_one(ResourceKind::LbPool, &self.name, pools)?.map(|pool| Self {
            name: pool.name,
            id: Some(pool.id),
            loadbalancer: Link::with_id(self.loadbalancer.key().clone(), pool.loadbalancer_id),
            protocol: pool.protocol,
            lb_method: pool.lb_method,
        }))
    }

    fn adopt(&mut self, actual: &Self) {
        self.id.clone_from(&actual.id);
    }

    fn changes(&self, actual: &Self) -> BTreeSet<LbPoolField> {
        let mut changes = BTreeSet::new();
        if self.loadbalancer.id().is_some()
            && link_changed(Some(&self.loadbalancer), Some(&actual.loadbalancer))
        {
            changes.insert(LbPoolField::LoadBalancer);
        }
        if self.protocol != actual.protocol {
            changes.insert(LbPoolField::Protocol);
        }
        changes
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &BTreeSet<LbPoolField>) -> Result<()> {
        match actual {
            None => Ok(()),
            Some(_) => reject_immutable(
                &ResourceTask::key(self),
                changes,
                &[LbPoolField::LoadBalancer, LbPoolField::Protocol],
            ),
        }
    }

    async fn render(
        &mut self,
        ctx: &TaskContext,
        _actual: Option<&Self>,
        _changes: &BTreeSet<LbPoolField>,
    ) -> Result<()> {
        let key = ResourceTask::key(self);
        let opts = PoolCreateOpts {
            name: self.name.clone(),
            loadbalancer_id: self.loadbalancer.require_id(&key)?.to_string(),
            protocol: self.protocol.clone(),
            lb_method: self.lb_method.clone(),
        };
        let pool = ctx.cloud.create_pool(&opts).await?;
        info!(pool = %self.name, id = %pool.id, "Created pool");
        self.id = Some(pool.id);
        Ok(())
    }

    async fn output(&self, _ctx: &TaskContext) -> Result<TaskOutput> {
        Ok(TaskOutput {
            id: self.id.clone(),
            ..TaskOutput::default()
        })
    }
}

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::info;

use cumulus_cloud::types::ListenerCreateOpts;
use cumulus_core::{at_most_one, Error, ResourceKind, Result};

use crate::task::{
    link_changed, reject_immutable, Link, OutputMap, ResourceTask, TaskContext, TaskField,
    TaskKey, TaskOutput,
};
use crate::tasks::pool::PROTOCOL_TCP;

pub const API_PORT: u16 = 443;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LbListenerField {
    Pool,
    ProtocolPort,
    AllowedCidrs,
}

impl TaskField for LbListenerField {
    fn name(self) -> &'static str {
        match self {
            Self::Pool => "pool",
            Self::ProtocolPort => "protocol_port",
            Self::AllowedCidrs => "allowed_cidrs",
        }
    }
}

/// The HTTPS listener forwarding to the API pool. Its source CIDR list is
/// the only field updated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbListener {
    pub name: String,
    pub id: Option<String>,
    pub pool: Link,
    pub protocol: String,
    pub protocol_port: u16,
    /// Kept sorted so comparisons are stable.
    pub allowed_cidrs: Vec<String>,
}

impl LbListener {
    pub fn new(name: impl Into<String>, pool: TaskKey) -> Self {
        Self {
            name: name.into(),
            id: None,
            pool: Link::to(pool),
            protocol: PROTOCOL_TCP.to_string(),
            protocol_port: API_PORT,
            allowed_cidrs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_allowed_cidrs(mut self, mut cidrs: Vec<String>) -> Self {
        cidrs.sort();
        self.allowed_cidrs = cidrs;
        self
    }
}

#[async_trait]
impl ResourceTask for LbListener {
    type Field = LbListenerField;

    fn key(&self) -> TaskKey {
        TaskKey::listener(self.name.clone())
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        vec![self.pool.key().clone()]
    }

    fn resolve(&mut self, outputs: &OutputMap) {
        self.pool.resolve(outputs);
    }

    async fn find(&self, ctx: &TaskContext) -> Result<Option<Self>> {
        let listeners = ctx
            .cloud
            .list_listeners()
            .await?
            .into_iter()
            .filter(|listener| listener.name == self.name)
            .collect();
        Ok(
            at_most_one(ResourceKind::LbListener, &self.name, listeners)?.map(|listener| {
                let mut allowed_cidrs = listener.allowed_cidrs;
                allowed_cidrs.sort();
                Self {
                    name: listener.name,
                    id: Some(listener.id),
                    pool: Link::with_id(self.pool.key().clone(), listener.default_pool_id),
                    protocol: listener.protocol,
                    protocol_port: listener.protocol_port,
                    allowed_cidrs,
                }
            }),
        )
    }

    fn adopt(&mut self, actual: &Self) {
        self.id.clone_from(&actual.id);
    }

    fn changes(&self, actual: &Self) -> BTreeSet<LbListenerField> {
        let mut changes = BTreeSet::new();
        if self.pool.id().is_some() && link_changed(Some(&self.pool), Some(&actual.pool)) {
            changes.insert(LbListenerField::Pool);
        }
        if self.protocol_port != actual.protocol_port {
            changes.insert(LbListenerField::ProtocolPort);
        }
        if self.allowed_cidrs != actual.allowed_cidrs {
            changes.insert(LbListenerField::AllowedCidrs);
        }
        changes
    }

    fn check_changes(
        &self,
        actual: Option<&Self>,
        changes: &BTreeSet<LbListenerField>,
    ) -> Result<()> {
        match actual {
            None => Ok(()),
            Some(_) => reject_immutable(
                &ResourceTask::key(self),
                changes,
                &[LbListenerField::Pool, LbListenerField::ProtocolPort],
            ),
        }
    }

    async fn render(
        &mut self,
        ctx: &TaskContext,
        actual: Option<&Self>,
        changes: &BTreeSet<LbListenerField>,
    ) -> Result<()> {
        let key = ResourceTask::key(self);
        if actual.is_some() {
            if changes.contains(&LbListenerField::AllowedCidrs) {
                let id = self.id.as_deref().ok_or_else(|| {
                    Error::render(key.kind, key.name.clone(), "live listener has no ID")
                })?;
                info!(listener = %self.name, cidrs = ?self.allowed_cidrs, "Updating allowed CIDRs");
                ctx.cloud
                    .update_listener_allowed_cidrs(id, &self.allowed_cidrs)
                    .await?;
            }
            return Ok(());
        }

        let opts = ListenerCreateOpts {
            name: self.name.clone(),
            default_pool_id: self.pool.require_id(&key)?.to_string(),
            protocol: self.protocol.clone(),
            protocol_port: self.protocol_port,
            allowed_cidrs: self.allowed_cidrs.clone(),
        };
        let listener = ctx.cloud.create_listener(&opts).await?;
        info!(listener = %self.name, id = %listener.id, "Created listener");
        self.id = Some(listener.id);
        Ok(())
    }

    async fn output(&self, _ctx: &TaskContext) -> Result<TaskOutput> {
        Ok(TaskOutput {
            id: self.id.clone(),
            ..TaskOutput::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_cidrs_are_sorted() {
        let listener = LbListener::new("api.example.com", TaskKey::pool("api.example.com-https"))
            .with_allowed_cidrs(vec!["192.0.2.0/24".to_string(), "10.0.0.0/8".to_string()]);
        assert_eq!(listener.allowed_cidrs, vec!["10.0.0.0/8", "192.0.2.0/24"]);
    }

    #[test]
    fn test_cidr_drift_updates_in_place() {
        let desired = LbListener::new("api", TaskKey::pool("api-https"))
            .with_allowed_cidrs(vec!["10.0.0.0/8".to_string()]);
        let actual = LbListener::new("api", TaskKey::pool("api-https"));
        let changes = desired.changes(&actual);
        assert_eq!(changes, BTreeSet::from([LbListenerField::AllowedCidrs]));
        assert!(desired.check_changes(Some(&actual), &changes).is_ok());
    }
}

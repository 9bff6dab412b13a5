use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tracing::info;

use cumulus_cloud::types::PoolMemberCreateOpts;
use cumulus_core::Result;

use crate::task::{Link, OutputMap, ResourceTask, TaskContext, TaskField, TaskKey, TaskOutput};
use crate::tasks::listener::API_PORT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PoolAssociationField {
    Members,
}

impl TaskField for PoolAssociationField {
    fn name(self) -> &'static str {
        match self {
            Self::Members => "members",
        }
    }
}

/// Registers the instances of one server group as members of a pool.
///
/// Members are only ever added; a live member the model no longer names is
/// left for the group-shrink path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolAssociation {
    pub name: String,
    pub pool: Link,
    pub server_group: Link,
    pub instances: Vec<Link>,
    pub protocol_port: u16,
    /// Member address → member name.
    pub members: BTreeMap<String, String>,
}

impl PoolAssociation {
    pub fn new(
        name: impl Into<String>,
        pool: TaskKey,
        server_group: TaskKey,
        instances: impl IntoIterator<Item = TaskKey>,
    ) -> Self {
        Self {
            name: name.into(),
            pool: Link::to(pool),
            server_group: Link::to(server_group),
            instances: instances.into_iter().map(Link::to).collect(),
            protocol_port: API_PORT,
            members: BTreeMap::new(),
        }
    }

    fn missing<'a>(&'a self, actual: Option<&'a Self>) -> impl Iterator<Item = (&'a String, &'a String)> {
        self.members
            .iter()
            .filter(move |(address, _)| actual.is_none_or(|a| !a.members.contains_key(*address)))
    }
}

#[async_trait]
impl ResourceTask for PoolAssociation {
    type Field = PoolAssociationField;

    fn key(&self) -> TaskKey {
        TaskKey::pool_association(self.name.clone())
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        [&self.pool, &self.server_group]
            .into_iter()
            .chain(&self.instances)
            .map(|link| link.key().clone())
            .collect()
    }

    fn resolve(&mut self, outputs: &OutputMap) {
        self.pool.resolve(outputs);
        self.server_group.resolve(outputs);
        for link in &mut self.instances {
            link.resolve(outputs);
        }
        self.members = self
            .instances
            .iter()
            .filter_map(|link| {
                link.address()
                    .map(|address| (address.to_string(), link.key().name.clone()))
            })
            .collect();
    }

    async fn find(&self, ctx: &TaskContext) -> Result<Option<Self>> {
        let Some(pool_id) = self.pool.id() else {
            return Ok(None);
        };
        let live = ctx.cloud.list_pool_members(pool_id).await?;
        if live.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self {
            members: live
                .into_iter()
                .filter(|member| member.protocol_port == self.protocol_port)
                .map(|member| (member.address, member.name))
                .collect(),
            ..self.clone()
        }))
    }

    fn adopt(&mut self, _actual: &Self) {}

    fn changes(&self, actual: &Self) -> BTreeSet<PoolAssociationField> {
        let mut changes = BTreeSet::new();
        if self.missing(Some(actual)).next().is_some() {
            changes.insert(PoolAssociationField::Members);
        }
        changes
    }

    fn check_changes(
        &self,
        _actual: Option<&Self>,
        _changes: &BTreeSet<PoolAssociationField>,
    ) -> Result<()> {
        Ok(())
    }

    async fn render(
        &mut self,
        ctx: &TaskContext,
        actual: Option<&Self>,
        _changes: &BTreeSet<PoolAssociationField>,
    ) -> Result<()> {
        let key = ResourceTask::key(self);
        let pool_id = self.pool.require_id(&key)?;
        for (address, name) in self.missing(actual) {
            let opts = PoolMemberCreateOpts {
                name: name.clone(),
                address: address.clone(),
                protocol_port: self.protocol_port,
            };
            let member = ctx.cloud.add_pool_member(pool_id, &opts).await?;
            info!(pool = %self.pool.key().name, member = %name, address = %address, id = %member.id, "Added pool member");
        }
        Ok(())
    }

    async fn output(&self, _ctx: &TaskContext) -> Result<TaskOutput> {
        Ok(TaskOutput {
            id: self.pool.id().map(str::to_string),
            members: self.members.values().cloned().collect(),
            ..TaskOutput::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn association() -> PoolAssociation {
        PoolAssociation::new(
            "cluster-master",
            TaskKey::pool("api-https"),
            TaskKey::server_group("cluster-master"),
            [TaskKey::instance("master-1"), TaskKey::instance("master-2")],
        )
    }

    #[test]
    fn test_depends_on_pool_group_and_every_instance() {
        let deps = ResourceTask::dependencies(&association());
        assert_eq!(deps.len(), 4);
        assert!(deps.contains(&TaskKey::instance("master-2")));
    }

    #[test]
    fn test_only_missing_members_are_changes() {
        let mut outputs = OutputMap::new();
        for (name, address) in [("master-1", "10.0.1.12"), ("master-2", "10.0.1.13")] {
            outputs.insert(
                TaskKey::instance(name),
                TaskOutput {
                    address: Some(address.to_string()),
                    ..TaskOutput::default()
                },
            );
        }
        let mut desired = association();
        desired.resolve(&outputs);
        assert_eq!(desired.members.len(), 2);

        let mut actual = desired.clone();
        assert!(desired.changes(&actual).is_empty());
        actual.members.remove("10.0.1.13");
        assert_eq!(
            desired.changes(&actual),
            BTreeSet::from([PoolAssociationField::Members])
        );
    }
}

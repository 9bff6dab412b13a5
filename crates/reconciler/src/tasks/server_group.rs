use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{info, warn};

use cumulus_cloud::types::ServerGroupCreateOpts;
use cumulus_core::{at_most_one, Error, ResourceKind, Result};

use crate::task::{
    reject_immutable, OutputMap, ResourceTask, TaskContext, TaskField, TaskKey, TaskOutput,
};

pub const ANTI_AFFINITY: &str = "anti-affinity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServerGroupField {
    Name,
    Policies,
}

impl TaskField for ServerGroupField {
    fn name(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Policies => "policies",
        }
    }
}

/// An anti-affinity group for one instance group's servers.
///
/// Members are append-only here: instances register themselves on creation
/// and removal belongs to the group-shrink path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerGroup {
    pub name: String,
    pub id: Option<String>,
    pub policies: Vec<String>,
    pub cluster_name: String,
    pub instance_group: String,
    pub max_size: Option<u32>,
    pub members: Vec<String>,
}

impl ServerGroup {
    pub fn new(cluster_name: impl Into<String>, instance_group: impl Into<String>) -> Self {
        let cluster_name = cluster_name.into();
        let instance_group = instance_group.into();
        Self {
            name: format!("{cluster_name}-{instance_group}"),
            id: None,
            policies: vec![ANTI_AFFINITY.to_string()],
            cluster_name,
            instance_group,
            max_size: None,
            members: Vec::new(),
        }
    }
}

#[async_trait]
impl ResourceTask for ServerGroup {
    type Field = ServerGroupField;

    fn key(&self) -> TaskKey {
        TaskKey::server_group(self.name.clone())
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        Vec::new()
    }

    fn resolve(&mut self, _outputs: &OutputMap) {}

    async fn find(&self, ctx: &TaskContext) -> Result<Option<Self>> {
        let groups = ctx
            .cloud
            .list_server_groups()
            .await?
            .into_iter()
            .filter(|group| group.name == self.name)
            .collect();
        let Some(group) = at_most_one(ResourceKind::ServerGroup, &self.name, groups)? else {
            return Ok(None);
        };
        if let Some(max) = self.max_size {
            if usize::try_from(max).is_ok_and(|max| group.members.len() > max) {
                warn!(
                    server_group = %self.name,
                    members = group.members.len(),
                    max_size = max,
                    "Server group has more members than the instance group allows"
                );
            }
        }
        Ok(Some(Self {
            name: group.name,
            id: Some(group.id),
            policies: group.policies,
            cluster_name: self.cluster_name.clone(),
            instance_group: self.instance_group.clone(),
            max_size: self.max_size,
            members: group.members,
        }))
    }

    fn adopt(&mut self, actual: &Self) {
        self.id.clone_from(&actual.id);
        self.members.clone_from(&actual.members);
    }

    fn changes(&self, actual: &Self) -> BTreeSet<ServerGroupField> {
        let mut changes = BTreeSet::new();
        if self.name != actual.name {
            changes.insert(ServerGroupField::Name);
        }
        let desired: BTreeSet<&String> = self.policies.iter().collect();
        let live: BTreeSet<&String> = actual.policies.iter().collect();
        if desired != live {
            changes.insert(ServerGroupField::Policies);
        }
        changes
    }

    fn check_changes(
        &self,
        actual: Option<&Self>,
        changes: &BTreeSet<ServerGroupField>,
    ) -> Result<()> {
        match actual {
            None if self.name.is_empty() => {
                Err(Error::required_field(ResourceKind::ServerGroup, "name"))
            }
            None => Ok(()),
            Some(_) => reject_immutable(
                &ResourceTask::key(self),
                changes,
                &[ServerGroupField::Name, ServerGroupField::Policies],
            ),
        }
    }

    async fn render(
        &mut self,
        ctx: &TaskContext,
        _actual: Option<&Self>,
        _changes: &BTreeSet<ServerGroupField>,
    ) -> Result<()> {
        let opts = ServerGroupCreateOpts {
            name: self.name.clone(),
            policies: self.policies.clone(),
        };
        let group = ctx.cloud.create_server_group(&opts).await?;
        info!(server_group = %self.name, id = %group.id, "Created server group");
        self.id = Some(group.id);
        self.members = group.members;
        Ok(())
    }

    async fn output(&self, _ctx: &TaskContext) -> Result<TaskOutput> {
        Ok(TaskOutput {
            id: self.id.clone(),
            address: None,
            port_id: None,
            members: self.members.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_joins_cluster_and_group() {
        let group = ServerGroup::new("cluster.example.com", "nodes");
        assert_eq!(group.name, "cluster.example.com-nodes");
        assert_eq!(group.policies, vec![ANTI_AFFINITY.to_string()]);
    }

    #[test]
    fn test_policies_are_immutable() {
        let desired = ServerGroup::new("c", "nodes");
        let mut actual = desired.clone();
        actual.policies = vec!["affinity".to_string()];
        let changes = desired.changes(&actual);
        assert!(matches!(
            desired.check_changes(Some(&actual), &changes),
            Err(Error::CannotChangeField { field: "policies", .. })
        ));
    }
}

//! Compute instances.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tracing::{debug, info};

use cumulus_cloud::types::{
    BlockDevice, FloatingIpListOpts, Image, NetworkAttachment, PortListOpts, PortUpdateOpts,
    SchedulerHints, ServerCreateOpts, ServerListOpts,
};
use cumulus_core::{at_most_one, Error, ResourceKind, Result};

use crate::tags::Tags;
use crate::task::{
    link_changed, reject_immutable, Link, OutputMap, ResourceTask, TaskContext, TaskField,
    TaskKey, TaskOutput,
};
use crate::user_data::UserData;

/// Metadata keys the instance task reads and writes.
pub mod metadata {
    pub const ROLE: &str = "Role";
    pub const INSTANCE_GROUP: &str = "InstanceGroup";
    pub const NETWORK: &str = "Network";
    pub const CLUSTER_NAME: &str = "KubernetesCluster";
    pub const K8S: &str = "k8s";
    pub const INSTANCE_GROUP_GENERATION: &str = "ig_generation";
    pub const CLUSTER_GENERATION: &str = "cluster_generation";
    /// `true` or `enabled` makes the instance boot from a volume.
    pub const BOOT_FROM_VOLUME: &str = "osVolumeBoot";
    /// Boot volume size in GB, overriding the image's minimum disk.
    pub const BOOT_VOLUME_SIZE: &str = "osVolumeSize";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstanceField {
    Id,
    Name,
    Tags,
    Port,
    FloatingIp,
    Metadata,
    Role,
}

impl TaskField for InstanceField {
    fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Tags => "tags",
            Self::Port => "port",
            Self::FloatingIp => "floating_ip",
            Self::Metadata => "metadata",
            Self::Role => "role",
        }
    }
}

/// A compute instance attached to one port and placed in one server group.
///
/// Name, image, flavor, SSH key, server group, region and user data cannot be
/// read back from the cloud; [`Instance::find`] carries them over from the
/// desired state.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub name: String,
    pub id: Option<String>,
    /// The first tag is the lookup filter.
    pub tags: Tags,
    pub port: Option<Link>,
    pub floating_ip: Option<Link>,
    pub server_group: Option<Link>,
    pub region: Option<String>,
    pub flavor: String,
    pub image: String,
    pub ssh_key: String,
    pub role: Option<String>,
    pub user_data: Option<UserData>,
    pub metadata: BTreeMap<String, String>,
    pub availability_zone: Option<String>,
    pub security_groups: Vec<String>,
    pub for_api_server: bool,
}

impl Instance {
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        flavor: impl Into<String>,
        port: TaskKey,
    ) -> Self {
        Self {
            name: name.into(),
            id: None,
            tags: Tags::default(),
            port: Some(Link::to(port)),
            floating_ip: None,
            server_group: None,
            region: None,
            flavor: flavor.into(),
            image: image.into(),
            ssh_key: String::new(),
            role: None,
            user_data: None,
            metadata: BTreeMap::new(),
            availability_zone: None,
            security_groups: Vec::new(),
            for_api_server: false,
        }
    }

    #[must_use]
    pub const fn is_for_api_server(&self) -> bool {
        self.for_api_server
    }

    /// First fixed IP of the attached port.
    ///
    /// # Errors
    /// Surfaces the port lookup failure.
    pub async fn find_ip_address(&self, ctx: &TaskContext) -> Result<Option<String>> {
        let Some(port_id) = self.port.as_ref().and_then(Link::id) else {
            return Ok(None);
        };
        let port = ctx.cloud.get_port(port_id).await?;
        Ok(port.fixed_ips.first().map(|ip| ip.ip_address.clone()))
    }

    /// Metadata as it should be on the server, the role included.
    fn desired_metadata(&self) -> BTreeMap<String, String> {
        let mut metadata = self.metadata.clone();
        if let Some(role) = &self.role {
            metadata.insert(metadata::ROLE.to_string(), role.clone());
        }
        metadata
    }

    fn port_id(&self, key: &TaskKey) -> Result<&str> {
        self.port
            .as_ref()
            .ok_or(Error::required_field(ResourceKind::Instance, "port"))?
            .require_id(key)
    }

    async fn associate_floating_ip(&self, ctx: &TaskContext, key: &TaskKey) -> Result<()> {
        let Some(fip) = &self.floating_ip else {
            return Ok(());
        };
        let fip_id = fip.require_id(key)?;
        let port_id = self.port_id(key)?;
        ctx.cloud.associate_floating_ip(fip_id, port_id).await?;
        debug!(instance = %self.name, floating_ip = fip_id, port = port_id, "Associated floating IP");
        Ok(())
    }

    async fn create(&mut self, ctx: &TaskContext) -> Result<()> {
        let key = ResourceTask::key(self);
        info!(instance = %self.name, "Creating instance");
        let port_id = self.port_id(&key)?.to_string();
        let image = ctx.cloud.get_image(&self.image).await?;
        let flavor = ctx.cloud.get_flavor(&self.flavor).await?;
        let user_data = self
            .user_data
            .as_ref()
            .map(|data| data.render(&key))
            .transpose()?;
        let scheduler_hints = match &self.server_group {
            Some(group) => Some(SchedulerHints {
                group: group.require_id(&key)?.to_string(),
            }),
            None => None,
        };
        let block_devices = boot_volume(&self.metadata, &image, &key)?;

        let opts = ServerCreateOpts {
            name: self.name.clone(),
            image_id: image.id,
            flavor_id: flavor.id,
            networks: vec![NetworkAttachment {
                port_id: port_id.clone(),
            }],
            metadata: self.desired_metadata(),
            tags: self.tags.to_vec(),
            security_groups: self.security_groups.clone(),
            user_data,
            availability_zone: self.availability_zone.clone(),
            key_name: (!self.ssh_key.is_empty()).then(|| keypair_name(&self.ssh_key)),
            scheduler_hints,
            block_devices,
        };
        let server = ctx.cloud.create_instance(&opts, Some(&port_id)).await?;
        info!(instance = %self.name, id = %server.id, "Created instance");
        self.id = Some(server.id);
        self.associate_floating_ip(ctx, &key).await
    }

    async fn update(&self, ctx: &TaskContext, changes: &BTreeSet<InstanceField>) -> Result<()> {
        let key = ResourceTask::key(self);
        let id = self
            .id
            .as_deref()
            .ok_or(Error::required_field(ResourceKind::Instance, "id"))?;
        if changes.contains(&InstanceField::Port) {
            let port_id = self.port_id(&key)?;
            info!(instance = %self.name, port = port_id, "Rebinding port");
            let opts = PortUpdateOpts {
                device_id: Some(id.to_string()),
                ..PortUpdateOpts::default()
            };
            ctx.cloud.update_port(port_id, &opts).await?;
        }
        if changes.contains(&InstanceField::FloatingIp) {
            self.associate_floating_ip(ctx, &key).await?;
        }
        if changes.contains(&InstanceField::Metadata) || changes.contains(&InstanceField::Role) {
            info!(instance = %self.name, id, "Replacing instance metadata");
            ctx.cloud
                .replace_instance_metadata(id, &self.desired_metadata())
                .await?;
        }
        if changes.contains(&InstanceField::Tags) {
            info!(instance = %self.name, id, "Replacing instance tags");
            ctx.cloud.replace_instance_tags(id, self.tags.as_slice()).await?;
        }
        Ok(())
    }
}

/// Key pair names may not contain `:`.
fn keypair_name(ssh_key: &str) -> String {
    ssh_key.replace(':', "_")
}

fn boot_from_volume(metadata: &BTreeMap<String, String>) -> bool {
    matches!(
        metadata.get(metadata::BOOT_FROM_VOLUME).map(String::as_str),
        Some("true" | "enabled")
    )
}

fn boot_volume(
    metadata: &BTreeMap<String, String>,
    image: &Image,
    key: &TaskKey,
) -> Result<Vec<BlockDevice>> {
    if !boot_from_volume(metadata) {
        return Ok(Vec::new());
    }
    let volume_size_gb = match metadata.get(metadata::BOOT_VOLUME_SIZE) {
        Some(size) => size.parse::<u32>().map_err(|e| {
            Error::render(
                key.kind,
                key.name.clone(),
                format!("invalid value for {}: {e}", metadata::BOOT_VOLUME_SIZE),
            )
        })?,
        None => image.min_disk_gb,
    };
    Ok(vec![BlockDevice {
        uuid: image.id.clone(),
        volume_size_gb,
        boot_index: 0,
        delete_on_termination: true,
    }])
}

#[async_trait]
impl ResourceTask for Instance {
    type Field = InstanceField;

    fn key(&self) -> TaskKey {
        TaskKey::instance(self.name.clone())
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut deps: Vec<TaskKey> = [&self.port, &self.server_group, &self.floating_ip]
            .into_iter()
            .flatten()
            .map(|link| link.key().clone())
            .collect();
        if let Some(data) = &self.user_data {
            deps.extend(data.dependencies());
        }
        deps
    }

    fn resolve(&mut self, outputs: &OutputMap) {
        for link in [&mut self.port, &mut self.server_group, &mut self.floating_ip]
            .into_iter()
            .flatten()
        {
            link.resolve(outputs);
        }
        if let Some(data) = &mut self.user_data {
            data.resolve(outputs);
        }
    }

    async fn find(&self, ctx: &TaskContext) -> Result<Option<Self>> {
        if self.name.is_empty() {
            return Ok(None);
        }
        let opts = ServerListOpts {
            name: Some(self.name.clone()),
            tag: self.tags.first().map(str::to_string),
        };
        // Name filters may match by pattern.
        let servers = ctx
            .cloud
            .list_instances(&opts)
            .await?
            .into_iter()
            .filter(|server| server.name == self.name)
            .collect();
        let Some(server) = at_most_one(ResourceKind::Instance, &self.name, servers)? else {
            return Ok(None);
        };

        let port_opts = PortListOpts {
            device_id: Some(server.id.clone()),
            ..PortListOpts::default()
        };
        let ports = ctx.cloud.list_ports(&port_opts).await?;
        let port = at_most_one(ResourceKind::Port, &server.id, ports)?.map(|port| {
            let key = self
                .port
                .as_ref()
                .map_or_else(|| TaskKey::port(port.name.clone()), |l| l.key().clone());
            Link::with_id(key, port.id)
        });

        let mut floating_ip = None;
        if let (Some(fip), Some(port_id)) =
            (&self.floating_ip, self.port.as_ref().and_then(Link::id))
        {
            let fip_opts = FloatingIpListOpts {
                port_id: Some(port_id.to_string()),
                ..FloatingIpListOpts::default()
            };
            let fips = ctx.cloud.list_floating_ips(&fip_opts).await?;
            floating_ip = at_most_one(ResourceKind::FloatingIp, &server.id, fips)?
                .map(|found| Link::with_id(fip.key().clone(), found.id));
        }

        debug!(instance = %self.name, id = %server.id, "Found instance");
        Ok(Some(Self {
            name: server.name,
            id: Some(server.id),
            tags: Tags::from(server.tags),
            port,
            floating_ip,
            server_group: self.server_group.clone(),
            region: self.region.clone(),
            flavor: self.flavor.clone(),
            image: self.image.clone(),
            ssh_key: self.ssh_key.clone(),
            role: server.metadata.get(metadata::ROLE).cloned(),
            user_data: self.user_data.clone(),
            metadata: server.metadata,
            availability_zone: self.availability_zone.clone(),
            security_groups: self.security_groups.clone(),
            for_api_server: self.for_api_server,
        }))
    }

    fn adopt(&mut self, actual: &Self) {
        self.id.clone_from(&actual.id);
    }

    fn changes(&self, actual: &Self) -> BTreeSet<InstanceField> {
        let mut changes = BTreeSet::new();
        if self.id.is_some() && self.id != actual.id {
            changes.insert(InstanceField::Id);
        }
        if self.name != actual.name {
            changes.insert(InstanceField::Name);
        }
        if self.tags != actual.tags {
            changes.insert(InstanceField::Tags);
        }
        if link_changed(self.port.as_ref(), actual.port.as_ref()) {
            changes.insert(InstanceField::Port);
        }
        if link_changed(self.floating_ip.as_ref(), actual.floating_ip.as_ref()) {
            changes.insert(InstanceField::FloatingIp);
        }
        if self.desired_metadata() != actual.metadata {
            changes.insert(InstanceField::Metadata);
        }
        if self.role.is_some() && self.role != actual.role {
            changes.insert(InstanceField::Role);
        }
        changes
    }

    fn check_changes(
        &self,
        actual: Option<&Self>,
        changes: &BTreeSet<InstanceField>,
    ) -> Result<()> {
        match actual {
            None if self.name.is_empty() => {
                Err(Error::required_field(ResourceKind::Instance, "name"))
            }
            None => Ok(()),
            Some(_) => reject_immutable(
                &ResourceTask::key(self),
                changes,
                &[InstanceField::Id, InstanceField::Name],
            ),
        }
    }

    fn should_create(&self, actual: Option<&Self>, changes: &BTreeSet<InstanceField>) -> bool {
        actual.is_none()
            || changes.contains(&InstanceField::Port)
            || changes.contains(&InstanceField::FloatingIp)
    }

    async fn render(
        &mut self,
        ctx: &TaskContext,
        actual: Option<&Self>,
        changes: &BTreeSet<InstanceField>,
    ) -> Result<()> {
        match actual {
            None => self.create(ctx).await,
            Some(_) => self.update(ctx, changes).await,
        }
    }

    async fn output(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        if let (Some(id), Some(group)) = (&self.id, &self.server_group) {
            ctx.outputs.add_member(group.key(), id.clone()).await;
        }
        Ok(TaskOutput {
            id: self.id.clone(),
            address: self.find_ip_address(ctx).await?,
            port_id: self.port.as_ref().and_then(Link::id).map(str::to_string),
            members: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desired() -> Instance {
        let mut instance =
            Instance::new("nodes-abc123", "ubuntu-24.04", "m1.medium", TaskKey::port("port-nodes-abc123"));
        instance.server_group = Some(Link::to(TaskKey::server_group("cluster-nodes")));
        instance
    }

    fn existing() -> Instance {
        let mut instance = desired();
        instance.id = Some("srv-1".to_string());
        instance.port = Some(Link::with_id(TaskKey::port("port-nodes-abc123"), "port-1"));
        instance
    }

    #[test]
    fn test_create_requires_name() {
        let mut instance = desired();
        instance.name.clear();
        let result = instance.check_changes(None, &BTreeSet::new());
        assert!(matches!(result, Err(Error::RequiredField { field: "name", .. })));
    }

    #[test]
    fn test_name_and_id_are_immutable() {
        let actual = existing();
        for field in [InstanceField::Name, InstanceField::Id] {
            let changes = BTreeSet::from([field]);
            let result = desired().check_changes(Some(&actual), &changes);
            assert!(matches!(result, Err(Error::CannotChangeField { .. })));
        }
    }

    #[test]
    fn test_metadata_change_does_not_recreate() {
        let actual = existing();
        let instance = desired();
        let metadata_only = BTreeSet::from([InstanceField::Metadata]);
        assert!(instance.check_changes(Some(&actual), &metadata_only).is_ok());
        assert!(!instance.should_create(Some(&actual), &metadata_only));
        assert!(instance.should_create(Some(&actual), &BTreeSet::from([InstanceField::Port])));
        assert!(instance.should_create(
            Some(&actual),
            &BTreeSet::from([InstanceField::FloatingIp])
        ));
        assert!(instance.should_create(None, &BTreeSet::new()));
    }

    #[test]
    fn test_port_swap_is_a_change() {
        let actual = existing();
        let mut instance = desired();
        instance.port = Some(Link::with_id(TaskKey::port("port-nodes-abc123"), "port-2"));
        instance.adopt(&actual);
        let changes = instance.changes(&actual);
        assert_eq!(changes, BTreeSet::from([InstanceField::Port]));
    }

    #[test]
    fn test_dependencies_include_user_data_references() {
        let mut instance = desired();
        instance.floating_ip = Some(Link::to(TaskKey::floating_ip("fip-nodes-1")));
        instance.user_data = Some(
            UserData::new()
                .literal("api=")
                .address_of(TaskKey::loadbalancer("api.example.com")),
        );
        let deps = ResourceTask::dependencies(&instance);
        assert_eq!(deps.len(), 4);
        assert!(deps.contains(&TaskKey::loadbalancer("api.example.com")));
    }

    #[test]
    fn test_boot_volume_size_defaults_to_image_min_disk() -> Result<()> {
        let image = Image {
            id: "img-1".to_string(),
            name: "ubuntu".to_string(),
            min_disk_gb: 12,
        };
        let key = TaskKey::instance("nodes-1");
        let mut metadata = BTreeMap::new();
        assert!(boot_volume(&metadata, &image, &key)?.is_empty());

        metadata.insert(metadata::BOOT_FROM_VOLUME.to_string(), "enabled".to_string());
        let devices = boot_volume(&metadata, &image, &key)?;
        assert_eq!(devices.first().map(|d| d.volume_size_gb), Some(12));

        metadata.insert(metadata::BOOT_VOLUME_SIZE.to_string(), "40".to_string());
        let devices = boot_volume(&metadata, &image, &key)?;
        assert_eq!(devices.first().map(|d| d.volume_size_gb), Some(40));

        metadata.insert(metadata::BOOT_VOLUME_SIZE.to_string(), "big".to_string());
        assert!(matches!(
            boot_volume(&metadata, &image, &key),
            Err(Error::Render { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_keypair_name_replaces_colons() {
        assert_eq!(keypair_name("kubernetes.c:ab:cd"), "kubernetes.c_ab_cd");
    }
}

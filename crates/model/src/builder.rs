//! Model builder: cluster specification → task set.
//!
//! Pure. Nothing here talks to the cloud; the output is handed to
//! [`DependencyGraph::build`](cumulus_reconciler::DependencyGraph::build).

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use cumulus_core::{Error, Result};
use cumulus_reconciler::tasks::instance::metadata;
use cumulus_reconciler::tasks::{
    FloatingIp, Instance, LbListener, LbPool, LoadBalancer, PoolAssociation, Port, ServerGroup,
};
use cumulus_reconciler::{Link, ResourceTask, Tags, Task, TaskKey, UserData};

use crate::naming::{
    full_instance_name, instance_name_tag, make_instance_name, sanitize_metadata_key,
};
use crate::spec::{ClusterSpec, InstanceGroupRole, InstanceGroupSpec, SubnetType, TopologyKind};

/// Prefix of instance group annotations that are copied into instance
/// metadata.
pub const ANNOTATION_PREFIX: &str = "openstack.cumulus.io/";

/// Supplies the opaque boot payload of an instance group.
pub trait BootstrapProvider: Send + Sync {
    /// # Errors
    /// Any failure building the payload; the whole build fails with it.
    fn user_data(
        &self,
        cluster: &ClusterSpec,
        group: &InstanceGroupSpec,
    ) -> Result<Option<UserData>>;
}

/// Instances boot without user data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBootstrap;

impl BootstrapProvider for NoBootstrap {
    fn user_data(&self, _: &ClusterSpec, _: &InstanceGroupSpec) -> Result<Option<UserData>> {
        Ok(None)
    }
}

/// Every task of one cluster, grouped by kind.
#[derive(Debug, Clone, Default)]
pub struct TaskSet {
    pub server_groups: Vec<ServerGroup>,
    pub ports: Vec<Port>,
    pub instances: Vec<Instance>,
    pub floating_ips: Vec<FloatingIp>,
    pub loadbalancers: Vec<LoadBalancer>,
    pub pools: Vec<LbPool>,
    pub listeners: Vec<LbListener>,
    pub pool_associations: Vec<PoolAssociation>,
}

impl TaskSet {
    #[must_use]
    pub fn len(&self) -> usize {
        [
            self.server_groups.len(),
            self.ports.len(),
            self.instances.len(),
            self.floating_ips.len(),
            self.loadbalancers.len(),
            self.pools.len(),
            self.listeners.len(),
            self.pool_associations.len(),
        ]
        .into_iter()
        .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn instance(&self, name: &str) -> Option<&Instance> {
        self.instances.iter().find(|instance| instance.name == name)
    }

    /// Keys of every instance placed in `group`.
    pub fn instances_in<'a>(&'a self, group: &'a TaskKey) -> impl Iterator<Item = TaskKey> + 'a {
        self.instances
            .iter()
            .filter(move |instance| {
                instance
                    .server_group
                    .as_ref()
                    .is_some_and(|link| link.key() == group)
            })
            .map(ResourceTask::key)
    }

    #[must_use]
    pub fn into_tasks(self) -> Vec<Arc<dyn Task>> {
        fn erase<T: ResourceTask>(items: Vec<T>) -> impl Iterator<Item = Arc<dyn Task>> {
            items.into_iter().map(|item| Arc::new(item) as Arc<dyn Task>)
        }
        erase(self.server_groups)
            .chain(erase(self.ports))
            .chain(erase(self.floating_ips))
            .chain(erase(self.instances))
            .chain(erase(self.loadbalancers))
            .chain(erase(self.pools))
            .chain(erase(self.listeners))
            .chain(erase(self.pool_associations))
            .collect()
    }
}

pub struct ModelBuilder<'a> {
    cluster: &'a ClusterSpec,
    bootstrap: &'a dyn BootstrapProvider,
}

impl<'a> ModelBuilder<'a> {
    /// # Errors
    /// `InvalidConfig` when a group names an unknown subnet or a load
    /// balancer has no private subnet to live on; bootstrap failures.
    pub fn build(
        cluster: &'a ClusterSpec,
        groups: &[InstanceGroupSpec],
        bootstrap: &'a dyn BootstrapProvider,
    ) -> Result<TaskSet> {
        let builder = Self { cluster, bootstrap };
        let mut set = TaskSet::default();
        let mut masters = Vec::new();

        for group in groups {
            debug!(group = %group.name, role = group.role.as_str(), "Found instance group");
            let mut server_group = ServerGroup::new(&cluster.name, &group.name);
            server_group.max_size = group.max_size;
            builder.build_instances(&mut set, &server_group, group)?;
            if group.role == InstanceGroupRole::Master {
                masters.push(ResourceTask::key(&server_group));
            }
            set.server_groups.push(server_group);
        }

        if cluster.loadbalancer.is_some() {
            builder.build_loadbalancer(&mut set, &masters)?;
        }
        Ok(set)
    }

    fn security_group_name(&self, role: InstanceGroupRole) -> String {
        let prefix = match role {
            InstanceGroupRole::Master => "masters",
            InstanceGroupRole::Node => "nodes",
            InstanceGroupRole::Bastion => "bastion",
        };
        format!("{prefix}.{}", self.cluster.name)
    }

    fn group_metadata(&self, group: &InstanceGroupSpec) -> BTreeMap<String, String> {
        let cluster = self.cluster;
        let mut meta: BTreeMap<String, String> = cluster
            .cloud_labels
            .iter()
            .chain(&group.cloud_labels)
            .map(|(label, value)| (sanitize_metadata_key(label), value.clone()))
            .collect();
        // Bastions are not part of the cluster.
        if group.role != InstanceGroupRole::Bastion {
            meta.insert(metadata::CLUSTER_NAME.to_string(), cluster.name.clone());
        }
        meta.insert(metadata::K8S.to_string(), cluster.name.clone());
        meta.insert(metadata::NETWORK.to_string(), cluster.network_name.clone());
        meta.insert(metadata::INSTANCE_GROUP.to_string(), group.name.clone());
        meta.insert(metadata::ROLE.to_string(), group.role.as_str().to_string());
        meta.insert(
            metadata::INSTANCE_GROUP_GENERATION.to_string(),
            group.generation.to_string(),
        );
        meta.insert(
            metadata::CLUSTER_GENERATION.to_string(),
            cluster.generation.to_string(),
        );
        for key in [metadata::BOOT_FROM_VOLUME, metadata::BOOT_VOLUME_SIZE] {
            if let Some(value) = group.annotations.get(&format!("{ANNOTATION_PREFIX}{key}")) {
                meta.insert(key.to_string(), value.clone());
            }
        }
        meta
    }

    fn wants_floating_ip(&self, group: &InstanceGroupSpec) -> bool {
        if !self.cluster.router || group.associate_public_ip == Some(false) {
            return false;
        }
        let topology = self.cluster.topology;
        match group.role {
            InstanceGroupRole::Bastion => true,
            InstanceGroupRole::Master => topology.masters != TopologyKind::Private,
            InstanceGroupRole::Node => topology.nodes != TopologyKind::Private,
        }
    }

    fn build_instances(
        &self,
        set: &mut TaskSet,
        server_group: &ServerGroup,
        group: &InstanceGroupSpec,
    ) -> Result<()> {
        let cluster = self.cluster;
        let meta = self.group_metadata(group);
        let user_data = self.bootstrap.user_data(cluster, group)?;
        let region = cluster.subnets.first().and_then(|s| s.region.clone());
        let group_key = ResourceTask::key(server_group);

        let mut security_groups = vec![self.security_group_name(group.role)];
        if cluster.loadbalancer.is_none() && group.role == InstanceGroupRole::Master {
            security_groups.push(cluster.master_public_name.clone());
        }
        security_groups.extend(group.additional_security_groups.iter().cloned());

        for (slot, ordinal) in (1..=group.min_size).enumerate() {
            let full_name = full_instance_name(ordinal, &group.name, &cluster.name);
            let name_tag = instance_name_tag(&full_name);
            let name =
                make_instance_name(ordinal, &group.name, group.generation, cluster.generation);

            let mut availability_zone = None;
            let mut subnet_ids = Vec::new();
            if let Some(subnet_name) = round_robin(&group.subnets, slot) {
                availability_zone = Some(match group.role {
                    InstanceGroupRole::Bastion => subnet_name.replacen("utility-", "", 1),
                    _ => subnet_name.clone(),
                });
                let subnet = cluster.subnet(subnet_name).ok_or_else(|| {
                    Error::invalid_config(format!(
                        "instance group {} uses subnet {subnet_name}, which is not in cluster {}",
                        group.name, cluster.name
                    ))
                })?;
                subnet_ids.push(subnet.id.clone());
            }
            if let Some(zone) = round_robin(&group.zones, slot) {
                availability_zone = Some(zone.clone());
            }

            let mut port = Port::new(format!("port-{name}"), cluster.network_id.clone());
            port.subnet_ids = subnet_ids;
            port.security_groups.clone_from(&security_groups);
            port.tags = Tags::new([name_tag.clone(), cluster.name.clone()]);

            let mut instance = Instance::new(
                name,
                group.image.clone(),
                group.machine_type.clone(),
                ResourceTask::key(&port),
            );
            instance.tags = Tags::new([name_tag]);
            instance.region.clone_from(&region);
            instance.ssh_key.clone_from(&cluster.ssh_key_name);
            instance.server_group = Some(Link::to(group_key.clone()));
            instance.role = Some(group.role.as_str().to_string());
            instance.user_data.clone_from(&user_data);
            instance.metadata.clone_from(&meta);
            instance.security_groups.clone_from(&group.additional_security_groups);
            instance.availability_zone = availability_zone;

            if self.wants_floating_ip(group) {
                let mut fip = FloatingIp::new(format!("fip-{full_name}"));
                // Master addresses go into the API server certificate.
                fip.for_api_server = group.role == InstanceGroupRole::Master;
                instance.floating_ip = Some(Link::to(ResourceTask::key(&fip)));
                set.floating_ips.push(fip);
            }

            set.ports.push(port);
            set.instances.push(instance);
        }
        Ok(())
    }

    fn build_loadbalancer(&self, set: &mut TaskSet, masters: &[TaskKey]) -> Result<()> {
        let cluster = self.cluster;
        let subnet = cluster
            .subnets
            .iter()
            .find(|subnet| subnet.kind == SubnetType::Private)
            .ok_or_else(|| Error::invalid_config("could not find subnet for master loadbalancer"))?;

        let mut lb = LoadBalancer::new(cluster.master_public_name.clone(), subnet.id.clone());
        lb.provider = cluster.loadbalancer.as_ref().and_then(|spec| spec.provider.clone());
        let lb_key = ResourceTask::key(&lb);

        let mut fip = FloatingIp::new(format!("fip-{}", lb.name)).for_loadbalancer(lb_key.clone());
        fip.for_api_server = cluster.is_gossip() || cluster.use_private_dns;

        let pool = LbPool::new(format!("{}-https", lb.name), lb_key);
        let pool_key = ResourceTask::key(&pool);

        let mut listener = LbListener::new(lb.name.clone(), pool_key.clone());
        if cluster.use_vip_acl() {
            listener = listener.with_allowed_cidrs(cluster.kubernetes_api_access.clone());
        }

        let associations: Vec<PoolAssociation> = masters
            .iter()
            .map(|group| {
                PoolAssociation::new(
                    group.name.clone(),
                    pool_key.clone(),
                    group.clone(),
                    set.instances_in(group).collect::<Vec<_>>(),
                )
            })
            .collect();

        debug!(loadbalancer = %lb.name, subnet = %subnet.name, masters = masters.len(), "Fronting masters with a load balancer");
        set.loadbalancers.push(lb);
        set.floating_ips.push(fip);
        set.pools.push(pool);
        set.listeners.push(listener);
        set.pool_associations.extend(associations);
        Ok(())
    }
}

/// The item of `items` a replica in `slot` lands on, cycling.
fn round_robin<T>(items: &[T], slot: usize) -> Option<&T> {
    items.get(slot.checked_rem(items.len())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{LoadBalancerSpec, SubnetSpec, Topology};

    fn cluster() -> ClusterSpec {
        ClusterSpec {
            name: "demo.example.com".to_string(),
            generation: 2,
            network_id: "net-1".to_string(),
            network_name: "demo-net".to_string(),
            subnets: vec![
                SubnetSpec {
                    name: "zone-a".to_string(),
                    id: "subnet-a".to_string(),
                    region: Some("regionOne".to_string()),
                    kind: SubnetType::Private,
                },
                SubnetSpec {
                    name: "utility-zone-a".to_string(),
                    id: "subnet-u".to_string(),
                    region: Some("regionOne".to_string()),
                    kind: SubnetType::Utility,
                },
            ],
            router: true,
            master_public_name: "api.demo.example.com".to_string(),
            ssh_key_name: "demo:ab:cd".to_string(),
            ..ClusterSpec::default()
        }
    }

    fn group(name: &str, role: InstanceGroupRole, size: u32) -> InstanceGroupSpec {
        InstanceGroupSpec {
            name: name.to_string(),
            generation: 1,
            role,
            min_size: size,
            machine_type: "m1.medium".to_string(),
            image: "ubuntu-24.04".to_string(),
            subnets: vec!["zone-a".to_string()],
            ..InstanceGroupSpec::default()
        }
    }

    fn build(cluster: &ClusterSpec, groups: &[InstanceGroupSpec]) -> Result<TaskSet> {
        ModelBuilder::build(cluster, groups, &NoBootstrap)
    }

    #[test]
    fn test_public_node_group_gets_port_instance_and_fip_per_replica() -> Result<()> {
        let set = build(&cluster(), &[group("nodes", InstanceGroupRole::Node, 3)])?;

        assert_eq!(set.server_groups.len(), 1);
        assert_eq!(set.ports.len(), 3);
        assert_eq!(set.instances.len(), 3);
        assert_eq!(set.floating_ips.len(), 3);
        assert_eq!(set.len(), 10);

        let group_key = TaskKey::server_group("demo.example.com-nodes");
        for (instance, fip) in set.instances.iter().zip(&set.floating_ips) {
            assert_eq!(
                instance.port.as_ref().map(|l| l.key().name.clone()),
                Some(format!("port-{}", instance.name))
            );
            assert_eq!(
                instance.floating_ip.as_ref().map(Link::key),
                Some(&ResourceTask::key(fip))
            );
            assert_eq!(instance.server_group.as_ref().map(Link::key), Some(&group_key));
            assert!(!fip.is_for_api_server());
        }
        Ok(())
    }

    #[test]
    fn test_private_topology_and_opt_out_skip_floating_ips() -> Result<()> {
        let mut private = cluster();
        private.topology = Topology {
            masters: TopologyKind::Private,
            nodes: TopologyKind::Private,
        };
        let set = build(&private, &[group("nodes", InstanceGroupRole::Node, 2)])?;
        assert!(set.floating_ips.is_empty());

        let mut opted_out = group("nodes", InstanceGroupRole::Node, 2);
        opted_out.associate_public_ip = Some(false);
        let set = build(&cluster(), &[opted_out])?;
        assert!(set.floating_ips.is_empty());

        let mut no_router = cluster();
        no_router.router = false;
        let set = build(&no_router, &[group("bastions", InstanceGroupRole::Bastion, 1)])?;
        assert!(set.floating_ips.is_empty());
        Ok(())
    }

    #[test]
    fn test_instance_metadata_and_fields() -> Result<()> {
        let mut nodes = group("nodes", InstanceGroupRole::Node, 1);
        nodes.cloud_labels.insert("Team/Owner".to_string(), "infra".to_string());
        nodes
            .annotations
            .insert(format!("{ANNOTATION_PREFIX}osVolumeBoot"), "true".to_string());
        let set = build(&cluster(), &[nodes])?;
        let Some(instance) = set.instances.first() else {
            return Err(Error::invalid_record("one instance expected"));
        };

        assert_eq!(instance.metadata.get("team_owner").map(String::as_str), Some("infra"));
        assert_eq!(
            instance.metadata.get(metadata::CLUSTER_NAME).map(String::as_str),
            Some("demo.example.com")
        );
        assert_eq!(
            instance.metadata.get(metadata::BOOT_FROM_VOLUME).map(String::as_str),
            Some("true")
        );
        assert_eq!(instance.metadata.get(metadata::CLUSTER_GENERATION).map(String::as_str), Some("2"));
        assert_eq!(instance.region.as_deref(), Some("regionOne"));
        assert_eq!(instance.availability_zone.as_deref(), Some("zone-a"));
        assert_eq!(instance.role.as_deref(), Some("Node"));
        assert_eq!(
            instance.tags.first(),
            Some("InstanceName:nodes-1-demo-example-com")
        );
        let Some(port) = set.ports.first() else {
            return Err(Error::invalid_record("one port expected"));
        };
        assert_eq!(port.subnet_ids, vec!["subnet-a".to_string()]);
        assert_eq!(port.security_groups, vec!["nodes.demo.example.com".to_string()]);
        assert!(port.tags.contains("demo.example.com"));
        Ok(())
    }

    #[test]
    fn test_bastion_strips_utility_prefix_and_is_not_cluster_owned() -> Result<()> {
        let mut bastions = group("bastions", InstanceGroupRole::Bastion, 1);
        bastions.subnets = vec!["utility-zone-a".to_string()];
        let set = build(&cluster(), &[bastions])?;
        let Some(instance) = set.instances.first() else {
            return Err(Error::invalid_record("one instance expected"));
        };
        assert_eq!(instance.availability_zone.as_deref(), Some("zone-a"));
        assert!(!instance.metadata.contains_key(metadata::CLUSTER_NAME));
        assert!(instance.metadata.contains_key(metadata::K8S));
        assert_eq!(set.floating_ips.len(), 1);
        Ok(())
    }

    #[test]
    fn test_zones_override_subnet_zone_round_robin() -> Result<()> {
        let mut nodes = group("nodes", InstanceGroupRole::Node, 3);
        nodes.zones = vec!["az-1".to_string(), "az-2".to_string()];
        let set = build(&cluster(), &[nodes])?;
        let zones: Vec<_> = set
            .instances
            .iter()
            .map(|i| i.availability_zone.as_deref())
            .collect();
        assert_eq!(zones, vec![Some("az-1"), Some("az-2"), Some("az-1")]);
        Ok(())
    }

    #[test]
    fn test_masters_without_lb_get_public_security_group_and_api_fips() -> Result<()> {
        let set = build(&cluster(), &[group("masters", InstanceGroupRole::Master, 1)])?;
        assert!(set
            .ports
            .iter()
            .all(|p| p.security_groups.contains(&"api.demo.example.com".to_string())));
        assert!(set.floating_ips.iter().all(FloatingIp::is_for_api_server));
        assert!(set.loadbalancers.is_empty());
        Ok(())
    }

    #[test]
    fn test_loadbalancer_chain_fronts_master_groups() -> Result<()> {
        let mut with_lb = cluster();
        with_lb.loadbalancer = Some(LoadBalancerSpec {
            use_vip_acl: true,
            provider: Some("octavia".to_string()),
        });
        with_lb.kubernetes_api_access = vec!["192.0.2.0/24".to_string(), "10.0.0.0/8".to_string()];
        let set = build(
            &with_lb,
            &[
                group("masters", InstanceGroupRole::Master, 3),
                group("nodes", InstanceGroupRole::Node, 2),
            ],
        )?;

        assert_eq!(set.loadbalancers.len(), 1);
        assert_eq!(set.loadbalancers.first().map(|lb| lb.subnet_id.as_str()), Some("subnet-a"));
        assert_eq!(
            set.pools.first().map(|pool| pool.name.as_str()),
            Some("api.demo.example.com-https")
        );
        assert_eq!(
            set.listeners.first().map(|l| l.allowed_cidrs.clone()),
            Some(vec!["10.0.0.0/8".to_string(), "192.0.2.0/24".to_string()])
        );

        let [association] = set.pool_associations.as_slice() else {
            return Err(Error::invalid_record("one association expected"));
        };
        assert_eq!(association.name, "demo.example.com-masters");
        assert_eq!(association.instances.len(), 3);

        let lb_fip = set
            .floating_ips
            .iter()
            .find(|fip| fip.name == "fip-api.demo.example.com");
        assert!(lb_fip.is_some_and(|fip| fip.loadbalancer.is_some() && !fip.is_for_api_server()));
        assert!(set
            .ports
            .iter()
            .all(|p| !p.security_groups.contains(&"api.demo.example.com".to_string())));
        Ok(())
    }

    #[test]
    fn test_loadbalancer_requires_a_private_subnet() {
        let mut with_lb = cluster();
        with_lb.loadbalancer = Some(LoadBalancerSpec::default());
        with_lb.subnets.retain(|s| s.kind != SubnetType::Private);
        let mut masters = group("masters", InstanceGroupRole::Master, 1);
        masters.subnets = vec!["utility-zone-a".to_string()];
        let result = ModelBuilder::build(&with_lb, &[masters], &NoBootstrap);
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_unknown_subnet_is_rejected() {
        let mut nodes = group("nodes", InstanceGroupRole::Node, 1);
        nodes.subnets = vec!["zone-z".to_string()];
        let result = ModelBuilder::build(&cluster(), &[nodes], &NoBootstrap);
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_generation_bump_renames_every_instance() -> Result<()> {
        let before = build(&cluster(), &[group("nodes", InstanceGroupRole::Node, 2)])?;
        let mut bumped = cluster();
        bumped.generation = 3;
        let after = build(&bumped, &[group("nodes", InstanceGroupRole::Node, 2)])?;
        for (old, new) in before.instances.iter().zip(&after.instances) {
            assert_ne!(old.name, new.name);
        }
        Ok(())
    }

    #[test]
    fn test_round_robin_cycles_and_tolerates_empty() {
        let zones = ["zone-a", "zone-b"];
        let picked: Vec<_> = (0..5).filter_map(|slot| round_robin(&zones, slot)).collect();
        assert_eq!(picked, [&"zone-a", &"zone-b", &"zone-a", &"zone-b", &"zone-a"]);
        assert_eq!(round_robin::<&str>(&[], 3), None);
    }
}

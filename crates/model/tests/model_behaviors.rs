//! Model builder behavioral tests - BDD style
//!
//! Following BDD naming convention: given_<context>_when_<action>_then_<outcome>

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use cumulus_core::{Error, Result};
use cumulus_model::{
    make_instance_name, BootstrapProvider, ClusterSpec, InstanceGroupSpec, ModelBuilder,
    NoBootstrap,
};
use cumulus_reconciler::{DependencyGraph, TaskKey, UserData};

const CLUSTER_YAML: &str = r#"
name: demo.k8s.local
generation: 4
networkId: net-1
networkName: demo-net
router: true
masterPublicName: api.demo.k8s.local
sshKeyName: "demo:key"
kubernetesApiAccess: ["198.51.100.0/24", "10.0.0.0/8"]
loadbalancer:
  useVIPACL: true
subnets:
  - name: zone-a
    id: subnet-a
    region: regionOne
    type: Private
  - name: utility-zone-a
    id: subnet-u
    region: regionOne
    type: Utility
cloudLabels:
  Owner: platform
"#;

const GROUPS_YAML: &str = r#"
- name: masters
  generation: 1
  role: Master
  minSize: 3
  maxSize: 3
  machineType: m1.large
  image: ubuntu-24.04
  subnets: [zone-a]
- name: nodes
  generation: 7
  role: Node
  minSize: 3
  machineType: m1.medium
  image: ubuntu-24.04
  subnets: [zone-a]
  associatePublicIP: false
- name: bastions
  role: Bastion
  minSize: 1
  machineType: m1.small
  image: ubuntu-24.04
  subnets: [utility-zone-a]
"#;

fn specs() -> Result<(ClusterSpec, Vec<InstanceGroupSpec>)> {
    let cluster = serde_yaml::from_str(CLUSTER_YAML)
        .map_err(|e| Error::invalid_config(format!("cluster yaml: {e}")))?;
    let groups = serde_yaml::from_str(GROUPS_YAML)
        .map_err(|e| Error::invalid_config(format!("group yaml: {e}")))?;
    Ok((cluster, groups))
}

struct ApiAddressBootstrap;

impl BootstrapProvider for ApiAddressBootstrap {
    fn user_data(
        &self,
        cluster: &ClusterSpec,
        _group: &InstanceGroupSpec,
    ) -> Result<Option<UserData>> {
        Ok(Some(
            UserData::new()
                .literal("#!/bin/sh\nAPI=")
                .address_of(TaskKey::loadbalancer(cluster.master_public_name.clone())),
        ))
    }
}

#[test]
fn given_yaml_specs_when_built_then_every_group_is_materialized() -> Result<()> {
    // GIVEN: A cluster with masters behind a load balancer, private nodes,
    // and a bastion
    let (cluster, groups) = specs()?;

    // WHEN: The model is built
    let set = ModelBuilder::build(&cluster, &groups, &NoBootstrap)?;

    // THEN: One server group per instance group and one port per instance
    assert_eq!(set.server_groups.len(), 3);
    assert_eq!(set.instances.len(), 7);
    assert_eq!(set.ports.len(), 7);

    // AND: Masters and the bastion get floating IPs, opted-out nodes do not,
    // and the load balancer gets its own
    assert_eq!(set.floating_ips.len(), 3 + 1 + 1);

    // AND: The load balancer chain is complete
    assert_eq!(set.loadbalancers.len(), 1);
    assert_eq!(set.pools.len(), 1);
    assert_eq!(set.listeners.len(), 1);
    assert_eq!(set.pool_associations.len(), 1);

    // AND: A gossip cluster puts the LB floating IP in the API certificate
    let lb_fip = set
        .floating_ips
        .iter()
        .find(|fip| fip.name == "fip-api.demo.k8s.local");
    assert!(lb_fip.is_some_and(|fip| fip.is_for_api_server()));

    // AND: Instance names are derived from both generations
    let expected = make_instance_name(1, "nodes", 7, 4);
    assert!(set.instance(&expected).is_some());
    Ok(())
}

#[test]
fn given_built_model_when_graph_built_then_it_is_acyclic_and_complete() -> Result<()> {
    // GIVEN: The task set of the full cluster
    let (cluster, groups) = specs()?;
    let set = ModelBuilder::build(&cluster, &groups, &ApiAddressBootstrap)?;
    let count = set.len();

    // WHEN: The dependency graph is built from it
    let graph = DependencyGraph::build(set.into_tasks())?;

    // THEN: Every task is in the graph
    assert_eq!(graph.len(), count);

    // AND: The load balancer precedes every instance whose user data embeds
    // its address
    let lb = TaskKey::loadbalancer("api.demo.k8s.local");
    let order: Vec<&TaskKey> = graph.topological_order().collect();
    let lb_at = order.iter().position(|key| **key == lb);
    let dependents = graph.dependents_of(&lb);
    assert!(dependents.len() >= 7);
    for key in dependents {
        assert!(lb_at < order.iter().position(|k| *k == key));
    }
    Ok(())
}

#[test]
fn given_same_specs_when_built_twice_then_models_are_identical() -> Result<()> {
    // GIVEN: Unchanged specifications
    let (cluster, groups) = specs()?;

    // WHEN: The model is built twice
    let first = ModelBuilder::build(&cluster, &groups, &NoBootstrap)?;
    let second = ModelBuilder::build(&cluster, &groups, &NoBootstrap)?;

    // THEN: The same names come out
    let names = |set: &cumulus_model::TaskSet| {
        set.instances
            .iter()
            .map(|i| i.name.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(names(&first), names(&second));
    assert_eq!(first.instances, second.instances);
    Ok(())
}

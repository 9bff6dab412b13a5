//! End-to-end cluster reconciliation against the in-memory cloud.
//!
//! # GIVEN
//! A cluster spec with masters behind a load balancer and a node group
//!
//! # WHEN
//! The cluster is reconciled, possibly more than once
//!
//! # THEN
//! The cloud converges, and converged clouds are left alone

#![forbid(clippy::unwrap_used)]
#![forbid(clippy::expect_used)]
#![forbid(clippy::panic)]

use std::sync::Arc;

use cumulus::cumulus_cloud::{ApiCall, InMemoryCloud};
use cumulus::cumulus_core::RecordingSleeper;
use cumulus::prelude::*;

const GROUPS_YAML: &str = r"
- name: masters
  role: Master
  minSize: 3
  machineType: m1.large
  image: ubuntu-24.04
  subnets: [zone-a]
- name: nodes
  role: Node
  minSize: 2
  machineType: m1.medium
  image: ubuntu-24.04
  subnets: [zone-a]
";

const ENGINE_TOML: &str = r#"
max_concurrency = 3
external_network = "public"

[backoff.poll]
initial_ms = 1000
factor = 1.5
jitter = 0.1
steps = 6
"#;

struct World {
    memory: Arc<InMemoryCloud>,
    cloud: Cloud,
    cluster: ClusterSpec,
    groups: Vec<InstanceGroupSpec>,
    config: EngineConfig,
}

async fn world() -> Result<World> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let memory = Arc::new(
        InMemoryCloud::new()
            .with_floating_ip_address_delay(2)
            .with_loadbalancer_activation_polls(2),
    );
    let network = memory.add_network("demo-net", false).await;
    let subnet = memory.add_subnet(&network.id, "zone-a", "10.0.1.0/24").await;
    memory.add_network("public", true).await;
    memory.add_image("ubuntu-24.04", 20).await;
    memory.add_flavor("m1.large").await;
    memory.add_flavor("m1.medium").await;

    let cluster = ClusterSpec {
        name: "demo.example.com".to_string(),
        generation: 1,
        network_id: network.id,
        network_name: network.name,
        subnets: vec![cumulus::cumulus_model::spec::SubnetSpec {
            name: "zone-a".to_string(),
            id: subnet.id,
            region: Some("regionOne".to_string()),
            kind: cumulus::cumulus_model::spec::SubnetType::Private,
        }],
        router: true,
        loadbalancer: Some(cumulus::cumulus_model::spec::LoadBalancerSpec {
            use_vip_acl: true,
            provider: None,
        }),
        master_public_name: "api.demo.example.com".to_string(),
        kubernetes_api_access: vec!["0.0.0.0/0".to_string()],
        ..ClusterSpec::default()
    };
    let groups = serde_yaml::from_str(GROUPS_YAML)
        .map_err(|e| Error::invalid_config(format!("group yaml: {e}")))?;
    let config = EngineConfig::from_toml_str(ENGINE_TOML)?;
    let cloud = cumulus::connect(memory.clients(), &config)
        .with_sleeper(Arc::new(RecordingSleeper::new()));

    Ok(World {
        memory,
        cloud,
        cluster,
        groups,
        config,
    })
}

impl World {
    async fn reconcile(&self, config: &EngineConfig) -> Result<RunReport> {
        reconcile_cluster(
            &self.cluster,
            &self.groups,
            &NoBootstrap,
            self.cloud.clone(),
            config,
        )
        .await
    }
}

#[tokio::test]
async fn given_empty_cloud_when_cluster_reconciled_then_everything_is_created() -> Result<()> {
    let world = world().await?;

    let report = world.reconcile(&world.config).await?.into_result()?;

    assert!(report.is_success());
    assert_eq!(world.memory.servers().await.len(), 5);
    assert_eq!(world.memory.ports().await.len(), 5);
    assert_eq!(world.memory.server_groups().await.len(), 2);
    // 3 masters + 2 nodes + the load balancer
    assert_eq!(world.memory.floating_ips().await.len(), 6);

    let pools = world.memory.pools().await;
    let Some(pool) = pools.first() else {
        return Err(Error::invalid_record("no pool was created"));
    };
    assert_eq!(world.memory.members_of(&pool.id).await.len(), 3);

    let groups = world.memory.server_groups().await;
    assert!(groups.iter().all(|g| !g.members.is_empty()));
    Ok(())
}

#[tokio::test]
async fn given_converged_cluster_when_reconciled_again_then_every_task_is_a_no_op() -> Result<()> {
    let world = world().await?;
    let first = world.reconcile(&world.config).await?.into_result()?;

    let second = world.reconcile(&world.config).await?.into_result()?;

    assert_eq!(second.with_action(Action::NoOp).count(), first.tasks.len());
    assert_eq!(world.memory.call_count(ApiCall::CreateServer).await, 5);
    assert_eq!(world.memory.call_count(ApiCall::CreateLoadBalancer).await, 1);
    assert_eq!(world.memory.call_count(ApiCall::CreatePoolMember).await, 3);
    Ok(())
}

#[tokio::test]
async fn given_dry_run_when_cluster_reconciled_then_plan_is_reported_without_changes()
-> Result<()> {
    let world = world().await?;
    let config = EngineConfig {
        dry_run: true,
        ..world.config.clone()
    };

    let report = world.reconcile(&config).await?.into_result()?;

    assert!(report.with_action(Action::Create).count() > 0);
    assert!(world.memory.servers().await.is_empty());
    assert!(world.memory.loadbalancers().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn given_invalid_config_when_reconciled_then_nothing_runs() -> Result<()> {
    let world = world().await?;
    let config = EngineConfig {
        max_concurrency: 0,
        ..world.config.clone()
    };

    let result = world.reconcile(&config).await;

    assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    assert_eq!(world.memory.call_count(ApiCall::ListServers).await, 0);
    Ok(())
}

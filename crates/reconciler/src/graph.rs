//! Dependency graph over a task set.
//!
//! Edges run producer → consumer and are derived once, from each task's
//! declared dependencies. Duplicates, unknown references, self loops, and
//! cycles are all rejected before anything is rendered.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use thiserror::Error;

use cumulus_core::Error;

use crate::task::{Task, TaskKey};

#[derive(Debug, Clone, Error)]
pub enum DagError {
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskKey),

    #[error("{task} depends on unknown task {dependency}")]
    MissingDependency { task: TaskKey, dependency: TaskKey },

    #[error("{0} depends on itself")]
    SelfLoop(TaskKey),

    #[error("dependency cycle between: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    Cycle(Vec<TaskKey>),
}

impl DagError {
    pub const fn missing_dependency(task: TaskKey, dependency: TaskKey) -> Self {
        Self::MissingDependency { task, dependency }
    }

    #[must_use]
    pub fn cycle(mut tasks: Vec<TaskKey>) -> Self {
        tasks.sort();
        Self::Cycle(tasks)
    }
}

impl From<DagError> for Error {
    fn from(err: DagError) -> Self {
        match err {
            DagError::DuplicateTask(key) => {
                Self::invalid_config(format!("duplicate task: {key}"))
            }
            DagError::MissingDependency { task, dependency } => Self::DependencyMissing {
                task: task.to_string(),
                dependency: dependency.to_string(),
            },
            DagError::SelfLoop(key) => Self::DependencyCycle {
                tasks: vec![key.to_string()],
            },
            DagError::Cycle(keys) => Self::DependencyCycle {
                tasks: keys.iter().map(ToString::to_string).collect(),
            },
        }
    }
}

pub type DagResult<T> = std::result::Result<T, DagError>;

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<TaskKey, ()>,
    tasks: HashMap<NodeIndex, Arc<dyn Task>>,
    index: HashMap<TaskKey, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl DependencyGraph {
    /// # Errors
    /// `DuplicateTask`, `MissingDependency`, `SelfLoop`, or `Cycle`.
    pub fn build(tasks: Vec<Arc<dyn Task>>) -> DagResult<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::with_capacity(tasks.len());
        let mut by_node = HashMap::with_capacity(tasks.len());

        for task in tasks {
            let key = task.key();
            if index.contains_key(&key) {
                return Err(DagError::DuplicateTask(key));
            }
            let node = graph.add_node(key.clone());
            index.insert(key, node);
            by_node.insert(node, task);
        }

        for (&consumer, task) in &by_node {
            let key = graph[consumer].clone();
            for dependency in task.dependencies() {
                if dependency == key {
                    return Err(DagError::SelfLoop(dependency));
                }
                let producer = *index
                    .get(&dependency)
                    .ok_or_else(|| DagError::missing_dependency(key.clone(), dependency.clone()))?;
                graph.update_edge(producer, consumer, ());
            }
        }

        if let Some(component) = tarjan_scc(&graph).into_iter().find(|scc| scc.len() > 1) {
            return Err(DagError::cycle(
                component.iter().map(|&node| graph[node].clone()).collect(),
            ));
        }
        let order = toposort(&graph, None)
            .map_err(|cycle| DagError::cycle(vec![graph[cycle.node_id()].clone()]))?;

        Ok(Self {
            graph,
            tasks: by_node,
            index,
            order,
        })
    }

    /// Keys in an order where every producer precedes its consumers.
    pub fn topological_order(&self) -> impl Iterator<Item = &TaskKey> {
        self.order.iter().map(|&node| &self.graph[node])
    }

    #[must_use]
    pub fn task(&self, key: &TaskKey) -> Option<&Arc<dyn Task>> {
        self.index.get(key).and_then(|node| self.tasks.get(node))
    }

    /// Direct producers of `key`.
    #[must_use]
    pub fn dependencies_of(&self, key: &TaskKey) -> BTreeSet<&TaskKey> {
        self.neighbors(key, Direction::Incoming)
    }

    /// Direct consumers of `key`.
    #[must_use]
    pub fn dependents_of(&self, key: &TaskKey) -> BTreeSet<&TaskKey> {
        self.neighbors(key, Direction::Outgoing)
    }

    /// Every task that directly or indirectly consumes `key`.
    #[must_use]
    pub fn transitive_dependents_of(&self, key: &TaskKey) -> BTreeSet<&TaskKey> {
        let Some(&start) = self.index.get(key) else {
            return BTreeSet::new();
        };
        let mut dependents = BTreeSet::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            if node != start {
                dependents.insert(&self.graph[node]);
            }
        }
        dependents
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn neighbors(&self, key: &TaskKey, direction: Direction) -> BTreeSet<&TaskKey> {
        self.index.get(key).map_or_else(BTreeSet::new, |&node| {
            self.graph
                .neighbors_directed(node, direction)
                .map(|n| &self.graph[n])
                .collect()
        })
    }

    pub(crate) fn nodes_in_order(&self) -> &[NodeIndex] {
        &self.order
    }

    pub(crate) fn key_of(&self, node: NodeIndex) -> &TaskKey {
        &self.graph[node]
    }

    pub(crate) fn task_at(&self, node: NodeIndex) -> Option<Arc<dyn Task>> {
        self.tasks.get(&node).cloned()
    }

    pub(crate) fn in_degree(&self, node: NodeIndex) -> usize {
        self.graph
            .neighbors_directed(node, Direction::Incoming)
            .count()
    }

    pub(crate) fn consumers(&self, node: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(node, Direction::Outgoing)
    }

    pub(crate) fn reachable_from(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut reachable = Vec::new();
        let mut dfs = Dfs::new(&self.graph, node);
        while let Some(next) = dfs.next(&self.graph) {
            if next != node {
                reachable.push(next);
            }
        }
        reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cumulus_core::Result;

    use crate::task::{Action, TaskContext, TaskOutcome, TaskOutput};

    #[derive(Debug)]
    struct Stub {
        key: TaskKey,
        deps: Vec<TaskKey>,
    }

    #[async_trait]
    impl Task for Stub {
        fn key(&self) -> TaskKey {
            self.key.clone()
        }

        fn dependencies(&self) -> Vec<TaskKey> {
            self.deps.clone()
        }

        async fn run(&self, _ctx: &TaskContext) -> Result<TaskOutcome> {
            Ok(TaskOutcome {
                action: Action::NoOp,
                output: TaskOutput::default(),
            })
        }
    }

    fn stub(key: TaskKey, deps: &[TaskKey]) -> Arc<dyn Task> {
        Arc::new(Stub {
            key,
            deps: deps.to_vec(),
        })
    }

    fn position(graph: &DependencyGraph, key: &TaskKey) -> Option<usize> {
        graph.topological_order().position(|k| k == key)
    }

    #[test]
    fn test_instance_comes_after_its_producers() -> DagResult<()> {
        let port = TaskKey::port("port-1");
        let group = TaskKey::server_group("group");
        let fip = TaskKey::floating_ip("fip-1");
        let instance = TaskKey::instance("node-1");
        let graph = DependencyGraph::build(vec![
            stub(instance.clone(), &[port.clone(), group.clone(), fip.clone()]),
            stub(fip.clone(), &[]),
            stub(group.clone(), &[]),
            stub(port.clone(), &[]),
        ])?;
        let at = position(&graph, &instance);
        for producer in [&port, &group, &fip] {
            assert!(position(&graph, producer) < at);
        }
        assert_eq!(graph.dependencies_of(&instance).len(), 3);
        assert_eq!(graph.dependents_of(&port).into_iter().collect::<Vec<_>>(), vec![&instance]);
        Ok(())
    }

    #[test]
    fn test_cycle_is_rejected() {
        let a = TaskKey::port("a");
        let b = TaskKey::port("b");
        let c = TaskKey::port("c");
        let result = DependencyGraph::build(vec![
            stub(a.clone(), &[c.clone()]),
            stub(b.clone(), &[a.clone()]),
            stub(c.clone(), &[b.clone()]),
        ]);
        assert!(matches!(result, Err(DagError::Cycle(keys)) if keys == vec![a, b, c]));
    }

    #[test]
    fn test_self_loop_and_unknown_dependency_are_rejected() {
        let a = TaskKey::port("a");
        let result = DependencyGraph::build(vec![stub(a.clone(), &[a.clone()])]);
        assert!(matches!(result, Err(DagError::SelfLoop(_))));

        let result = DependencyGraph::build(vec![stub(a, &[TaskKey::port("missing")])]);
        assert!(matches!(result, Err(DagError::MissingDependency { .. })));
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let a = TaskKey::port("a");
        let result = DependencyGraph::build(vec![stub(a.clone(), &[]), stub(a, &[])]);
        assert!(matches!(result, Err(DagError::DuplicateTask(_))));
    }

    #[test]
    fn test_transitive_dependents() -> DagResult<()> {
        let lb = TaskKey::loadbalancer("api");
        let pool = TaskKey::pool("api-https");
        let listener = TaskKey::listener("api");
        let fip = TaskKey::floating_ip("fip-api");
        let graph = DependencyGraph::build(vec![
            stub(lb.clone(), &[]),
            stub(pool.clone(), &[lb.clone()]),
            stub(listener.clone(), &[pool.clone()]),
            stub(fip.clone(), &[lb.clone()]),
        ])?;
        let dependents = graph.transitive_dependents_of(&lb);
        assert_eq!(dependents.len(), 3);
        assert!(dependents.contains(&listener));
        assert!(graph.transitive_dependents_of(&listener).is_empty());
        Ok(())
    }

    #[test]
    fn test_dag_errors_map_onto_core_errors() {
        let err: Error = DagError::cycle(vec![TaskKey::port("b"), TaskKey::port("a")]).into();
        assert!(matches!(err, Error::DependencyCycle { ref tasks } if tasks.len() == 2));
    }
}

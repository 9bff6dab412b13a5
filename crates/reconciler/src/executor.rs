//! Concurrent, dependency-ordered execution of a task graph.
//!
//! A task is spawned once every producer has reconciled and a semaphore
//! permit is free. The permit is held for the whole run, so at most
//! `max_concurrency` tasks talk to the cloud at once. A failure blocks
//! everything downstream of it and, unless `fail_fast` is set, leaves
//! independent branches running.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use petgraph::graph::NodeIndex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use cumulus_core::{Error, Result};

use crate::config::EngineConfig;
use crate::graph::DependencyGraph;
use crate::task::{Action, TaskContext, TaskKey, TaskOutcome, TaskState};

/// Default number of tasks allowed in flight.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct Executor {
    max_concurrency: usize,
    fail_fast: bool,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

impl Executor {
    /// A zero limit is raised to one.
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            fail_fast: false,
        }
    }

    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_concurrency).with_fail_fast(config.fail_fast)
    }

    /// Stop spawning new tasks after the first failure.
    #[must_use]
    pub const fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub async fn run(&self, graph: &DependencyGraph, ctx: &TaskContext) -> RunReport {
        let mut report = RunReport::pending(graph);
        let mut waiting: HashMap<NodeIndex, usize> = graph
            .nodes_in_order()
            .iter()
            .map(|&node| (node, graph.in_degree(node)))
            .collect();
        let mut ready: VecDeque<NodeIndex> = graph
            .nodes_in_order()
            .iter()
            .copied()
            .filter(|node| waiting.get(node) == Some(&0))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut running = FuturesUnordered::new();
        let mut stopping = false;

        info!(
            tasks = graph.len(),
            max_concurrency = self.max_concurrency,
            dry_run = ctx.dry_run,
            "Starting reconciliation"
        );

        loop {
            while !stopping && !ready.is_empty() {
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };
                let Some(node) = ready.pop_front() else {
                    break;
                };
                let Some(task) = graph.task_at(node) else {
                    continue;
                };
                let ctx = ctx.clone();
                debug!(task = %graph.key_of(node), "Spawning task");
                let handle = tokio::spawn(async move {
                    let outcome = task.run(&ctx).await;
                    drop(permit);
                    outcome
                });
                running.push(async move { (node, handle.await) });
            }

            let Some((node, joined)) = running.next().await else {
                break;
            };
            let key = graph.key_of(node).clone();
            let result = joined.unwrap_or_else(|err| {
                Err(Error::render(
                    key.kind,
                    key.name.clone(),
                    format!("task aborted: {err}"),
                ))
            });

            match result {
                Ok(TaskOutcome { action, output }) => {
                    ctx.outputs.publish(key.clone(), output).await;
                    report.reconciled(&key, action);
                    for consumer in graph.consumers(node) {
                        if let Some(count) = waiting.get_mut(&consumer) {
                            *count = count.saturating_sub(1);
                            if *count == 0 && report.is_pending(graph.key_of(consumer)) {
                                ready.push_back(consumer);
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(task = %key, error = %err, "Task failed");
                    report.failed_with(&key, err);
                    for dependent in graph.reachable_from(node) {
                        let blocked = graph.key_of(dependent);
                        if report.is_pending(blocked) {
                            report.finish(
                                blocked,
                                TaskState::Blocked,
                                Some(Error::Blocked {
                                    task: blocked.to_string(),
                                    dependency: key.to_string(),
                                }),
                            );
                        }
                    }
                    if self.fail_fast && !stopping {
                        info!(task = %key, "Fail-fast set, not starting further tasks");
                        stopping = true;
                    }
                }
            }
        }

        report.cancel_pending();
        report.members = ctx.outputs.all_members().await;
        info!(
            reconciled = report.count(TaskState::Reconciled),
            failed = report.count(TaskState::Failed),
            blocked = report.count(TaskState::Blocked),
            cancelled = report.count(TaskState::Cancelled),
            "Reconciliation finished"
        );
        report
    }
}

/// What happened to one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub key: TaskKey,
    pub state: TaskState,
    /// Set once the task has been planned and reconciled.
    pub action: Option<Action>,
    #[serde(serialize_with = "error_message")]
    pub error: Option<Error>,
}

fn error_message<S: serde::Serializer>(
    error: &Option<Error>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(err) => serializer.serialize_some(&err.to_string()),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tasks: BTreeMap<TaskKey, TaskReport>,
    /// Keys in the order their tasks finished, successfully or not.
    pub completion_order: Vec<TaskKey>,
    /// Server group → IDs of the instances placed in it during the run.
    pub members: BTreeMap<TaskKey, BTreeSet<String>>,
}

impl RunReport {
    fn pending(graph: &DependencyGraph) -> Self {
        Self {
            tasks: graph
                .topological_order()
                .map(|key| {
                    (
                        key.clone(),
                        TaskReport {
                            key: key.clone(),
                            state: TaskState::Unresolved,
                            action: None,
                            error: None,
                        },
                    )
                })
                .collect(),
            completion_order: Vec::new(),
            members: BTreeMap::new(),
        }
    }

    fn is_pending(&self, key: &TaskKey) -> bool {
        self.state_of(key) == Some(TaskState::Unresolved)
    }

    fn finish(&mut self, key: &TaskKey, state: TaskState, error: Option<Error>) {
        if let Some(task) = self.tasks.get_mut(key) {
            task.state = state;
            task.error = error;
        }
    }

    fn reconciled(&mut self, key: &TaskKey, action: Action) {
        if let Some(task) = self.tasks.get_mut(key) {
            task.state = TaskState::Reconciled;
            task.action = Some(action);
        }
        self.completion_order.push(key.clone());
    }

    fn failed_with(&mut self, key: &TaskKey, err: Error) {
        self.finish(key, TaskState::Failed, Some(err));
        self.completion_order.push(key.clone());
    }

    fn cancel_pending(&mut self) {
        for task in self.tasks.values_mut() {
            if task.state == TaskState::Unresolved {
                task.state = TaskState::Cancelled;
            }
        }
    }

    fn count(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|t| t.state == state).count()
    }

    /// Every task reconciled.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.tasks
            .values()
            .all(|task| task.state == TaskState::Reconciled)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks
            .values()
            .filter(|task| task.state == TaskState::Failed)
    }

    #[must_use]
    pub fn state_of(&self, key: &TaskKey) -> Option<TaskState> {
        self.tasks.get(key).map(|task| task.state)
    }

    #[must_use]
    pub fn action_of(&self, key: &TaskKey) -> Option<Action> {
        self.tasks.get(key).and_then(|task| task.action)
    }

    /// Recorded members of a server group, empty when it has none.
    pub fn members_of(&self, group: &TaskKey) -> impl Iterator<Item = &str> {
        self.members.get(group).into_iter().flatten().map(String::as_str)
    }

    /// Keys whose task took `action`.
    pub fn with_action(&self, action: Action) -> impl Iterator<Item = &TaskKey> {
        self.tasks
            .values()
            .filter(move |task| task.action == Some(action))
            .map(|task| &task.key)
    }

    /// The report itself, or the first failure in completion order.
    ///
    /// # Errors
    /// The error of the earliest failed task.
    pub fn into_result(self) -> Result<Self> {
        let first = self
            .completion_order
            .iter()
            .find_map(|key| self.tasks.get(key).and_then(|task| task.error.clone()));
        match first {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

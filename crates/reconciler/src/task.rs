//! The task abstraction.
//!
//! A task is the desired state of one cloud resource, addressed by a stable
//! [`TaskKey`] rather than by the cloud ID (which only exists once the
//! resource has been created). Every resource kind implements
//! [`ResourceTask`]; the blanket [`Task`] impl drives it through
//! Unresolved → Found → Planned → Rendered → Reconciled.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use cumulus_cloud::Cloud;
use cumulus_core::{Error, ResourceKind, Result};

/// Stable identity of a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub kind: ResourceKind,
    pub name: String,
}

impl TaskKey {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn instance(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Instance, name)
    }

    pub fn port(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Port, name)
    }

    pub fn floating_ip(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::FloatingIp, name)
    }

    pub fn server_group(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::ServerGroup, name)
    }

    pub fn loadbalancer(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::LoadBalancer, name)
    }

    pub fn pool(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::LbPool, name)
    }

    pub fn listener(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::LbListener, name)
    }

    pub fn pool_association(name: impl Into<String>) -> Self {
        Self::new(ResourceKind::PoolAssociation, name)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

/// Values a task publishes once its resource exists, for consumers to link
/// against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutput {
    /// Cloud-assigned ID.
    pub id: Option<String>,
    /// Primary address (fixed IP, floating IP, or VIP depending on kind).
    pub address: Option<String>,
    /// Port carrying `address`, where the kind has one.
    pub port_id: Option<String>,
    /// Member IDs, for grouping resources.
    pub members: Vec<String>,
}

impl TaskOutput {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }
}

pub type OutputMap = HashMap<TaskKey, TaskOutput>;

/// A typed reference from one task to another.
///
/// The referenced task is a dependency of the referencing one. Its output is
/// filled in by [`Link::resolve`] once the producer has been reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    key: TaskKey,
    output: Option<TaskOutput>,
}

impl Link {
    #[must_use]
    pub const fn to(key: TaskKey) -> Self {
        Self { key, output: None }
    }

    /// A link whose target is already known, as built from live cloud state.
    pub fn with_id(key: TaskKey, id: impl Into<String>) -> Self {
        Self {
            key,
            output: Some(TaskOutput::with_id(id)),
        }
    }

    #[must_use]
    pub const fn key(&self) -> &TaskKey {
        &self.key
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.output.as_ref().and_then(|o| o.id.as_deref())
    }

    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.output.as_ref().and_then(|o| o.address.as_deref())
    }

    #[must_use]
    pub fn port_id(&self) -> Option<&str> {
        self.output.as_ref().and_then(|o| o.port_id.as_deref())
    }

    /// Pick up the producer's output if it has published one.
    pub fn resolve(&mut self, outputs: &OutputMap) {
        if let Some(output) = outputs.get(&self.key) {
            self.output = Some(output.clone());
        }
    }

    /// The producer's cloud ID, needed by `consumer` to render.
    ///
    /// # Errors
    /// `Render` when the producer has not published an ID.
    pub fn require_id(&self, consumer: &TaskKey) -> Result<&str> {
        self.id().ok_or_else(|| {
            Error::render(
                consumer.kind,
                consumer.name.clone(),
                format!("{} has not been rendered", self.key),
            )
        })
    }
}

/// Whether a desired reference differs from the live one.
///
/// Links are compared by target ID. An unset desired link means "don't
/// care" and never counts as a change.
#[must_use]
pub fn link_changed(desired: Option<&Link>, actual: Option<&Link>) -> bool {
    match (desired, actual) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(desired), Some(actual)) => desired.id() != actual.id(),
    }
}

#[derive(Debug, Default)]
struct OutputsInner {
    outputs: OutputMap,
    members: HashMap<TaskKey, BTreeSet<String>>,
}

/// Outputs published during a run, shared by every task.
#[derive(Debug, Clone, Default)]
pub struct Outputs {
    inner: Arc<RwLock<OutputsInner>>,
}

impl Outputs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, key: TaskKey, output: TaskOutput) {
        let mut inner = self.inner.write().await;
        if !output.members.is_empty() {
            inner
                .members
                .entry(key.clone())
                .or_default()
                .extend(output.members.iter().cloned());
        }
        inner.outputs.insert(key, output);
    }

    pub async fn get(&self, key: &TaskKey) -> Option<TaskOutput> {
        self.inner.read().await.outputs.get(key).cloned()
    }

    pub async fn snapshot(&self) -> OutputMap {
        self.inner.read().await.outputs.clone()
    }

    /// Record `id` as a member of `group`. Concurrent appends are a set
    /// union.
    pub async fn add_member(&self, group: &TaskKey, id: impl Into<String>) {
        self.inner
            .write()
            .await
            .members
            .entry(group.clone())
            .or_default()
            .insert(id.into());
    }

    /// Every server group's recorded members.
    pub async fn all_members(&self) -> BTreeMap<TaskKey, BTreeSet<String>> {
        self.inner
            .read()
            .await
            .members
            .iter()
            .map(|(group, members)| (group.clone(), members.clone()))
            .collect()
    }

    pub async fn members(&self, group: &TaskKey) -> BTreeSet<String> {
        self.inner
            .read()
            .await
            .members
            .get(group)
            .cloned()
            .unwrap_or_default()
    }
}

/// Everything a task may touch while running.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub cloud: Cloud,
    pub outputs: Outputs,
    /// Plan without calling any mutating facade operation.
    pub dry_run: bool,
}

impl TaskContext {
    #[must_use]
    pub fn new(cloud: Cloud) -> Self {
        Self {
            cloud,
            outputs: Outputs::new(),
            dry_run: false,
        }
    }

    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Lifecycle state of a task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Desired state only; links not yet resolved.
    Unresolved,
    /// Live state fetched.
    Found,
    /// Diff validated and action decided.
    Planned,
    /// Mutation applied.
    Rendered,
    /// Outputs published. Terminal.
    Reconciled,
    Failed,
    /// A dependency failed, so the task never started.
    Blocked,
    /// Never started because the run stopped early.
    Cancelled,
}

impl TaskState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Found => "found",
            Self::Planned => "planned",
            Self::Rendered => "rendered",
            Self::Reconciled => "reconciled",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a run did (or, in a dry run, would do) to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    NoOp,
    Create,
    Update,
}

impl Action {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoOp => "no-op",
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field of a resource that can differ between desired and live state.
pub trait TaskField: Copy + Ord + fmt::Debug + Send + Sync {
    fn name(self) -> &'static str;
}

/// Reject the first change to a field in `immutable`.
///
/// # Errors
/// `CannotChangeField` naming the field.
pub fn reject_immutable<F: TaskField>(
    key: &TaskKey,
    changes: &BTreeSet<F>,
    immutable: &[F],
) -> Result<()> {
    match immutable.iter().find(|field| changes.contains(field)) {
        Some(field) => Err(Error::cannot_change_field(
            key.kind,
            key.name.clone(),
            field.name(),
        )),
        None => Ok(()),
    }
}

/// One resource kind's reconciliation behavior.
///
/// `self` is always the desired state; `actual` is what [`find`] built from
/// the cloud.
///
/// [`find`]: ResourceTask::find
#[async_trait]
pub trait ResourceTask: Clone + fmt::Debug + Send + Sync + 'static {
    type Field: TaskField;

    fn key(&self) -> TaskKey;

    /// Tasks that must be reconciled before this one.
    fn dependencies(&self) -> Vec<TaskKey>;

    /// Fill in links from published outputs.
    fn resolve(&mut self, outputs: &OutputMap);

    /// Read the live resource. `None` means it must be created.
    ///
    /// # Errors
    /// `Ambiguous` when more than one resource matches.
    async fn find(&self, ctx: &TaskContext) -> Result<Option<Self>>;

    /// Take over cloud-assigned values from the live resource so they do
    /// not show up as changes.
    fn adopt(&mut self, actual: &Self);

    fn changes(&self, actual: &Self) -> BTreeSet<Self::Field>;

    /// # Errors
    /// `CannotChangeField` or `RequiredField` when the plan is illegal.
    fn check_changes(&self, actual: Option<&Self>, changes: &BTreeSet<Self::Field>)
        -> Result<()>;

    fn should_create(&self, actual: Option<&Self>, _changes: &BTreeSet<Self::Field>) -> bool {
        actual.is_none()
    }

    /// Apply the plan.
    ///
    /// # Errors
    /// Any facade failure; the render is safe to retry from the top.
    async fn render(
        &mut self,
        ctx: &TaskContext,
        actual: Option<&Self>,
        changes: &BTreeSet<Self::Field>,
    ) -> Result<()>;

    /// # Errors
    /// Facade failures while reading values to publish.
    async fn output(&self, ctx: &TaskContext) -> Result<TaskOutput>;
}

/// Result of running one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub action: Action,
    pub output: TaskOutput,
}

/// Object-safe view of a task, as the graph and executor hold it.
#[async_trait]
pub trait Task: fmt::Debug + Send + Sync {
    fn key(&self) -> TaskKey;

    fn dependencies(&self) -> Vec<TaskKey>;

    /// Find, plan, and render the resource.
    ///
    /// # Errors
    /// The first failure of any step, with the resource's context.
    async fn run(&self, ctx: &TaskContext) -> Result<TaskOutcome>;
}

#[async_trait]
impl<T: ResourceTask> Task for T {
    fn key(&self) -> TaskKey {
        ResourceTask::key(self)
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        ResourceTask::dependencies(self)
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskOutcome> {
        let key = ResourceTask::key(self);
        let mut desired = self.clone();
        desired.resolve(&ctx.outputs.snapshot().await);
        debug!(task = %key, state = %TaskState::Unresolved, "Links resolved");

        let actual = desired.find(ctx).await?;
        if let Some(actual) = &actual {
            desired.adopt(actual);
        }
        debug!(task = %key, state = %TaskState::Found, exists = actual.is_some(), "Live state fetched");

        let changes = actual
            .as_ref()
            .map(|actual| desired.changes(actual))
            .unwrap_or_default();
        desired.check_changes(actual.as_ref(), &changes)?;
        let should_create = desired.should_create(actual.as_ref(), &changes);
        let action = match &actual {
            None => Action::Create,
            Some(_) if should_create || !changes.is_empty() => Action::Update,
            Some(_) => Action::NoOp,
        };
        debug!(task = %key, state = %TaskState::Planned, %action, ?changes, "Planned");

        if action == Action::NoOp {
            let output = desired.output(ctx).await?;
            return Ok(TaskOutcome { action, output });
        }

        if ctx.dry_run {
            info!(task = %key, %action, ?changes, "Dry run, not rendering");
            let output = match actual {
                Some(_) => desired.output(ctx).await?,
                None => TaskOutput::default(),
            };
            return Ok(TaskOutcome { action, output });
        }

        desired.render(ctx, actual.as_ref(), &changes).await?;
        info!(task = %key, state = %TaskState::Rendered, %action, "Rendered");

        let output = desired.output(ctx).await?;
        Ok(TaskOutcome { action, output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_changed_compares_ids() {
        let key = TaskKey::port("port-a");
        let a = Link::with_id(key.clone(), "p-1");
        let b = Link::with_id(key.clone(), "p-2");
        assert!(!link_changed(None, Some(&a)));
        assert!(link_changed(Some(&a), None));
        assert!(link_changed(Some(&a), Some(&b)));
        assert!(!link_changed(Some(&a), Some(&a.clone())));
    }

    #[test]
    fn test_require_id_names_unrendered_producer() {
        let link = Link::to(TaskKey::port("port-a"));
        let consumer = TaskKey::instance("nodes-1");
        let err = link.require_id(&consumer);
        assert!(matches!(err, Err(Error::Render { .. })));
    }

    #[test]
    fn test_resolve_picks_up_published_output() {
        let key = TaskKey::port("port-a");
        let mut outputs = OutputMap::new();
        outputs.insert(key.clone(), TaskOutput::with_id("p-1"));
        let mut link = Link::to(key);
        link.resolve(&outputs);
        assert_eq!(link.id(), Some("p-1"));
    }

    #[tokio::test]
    async fn test_member_appends_are_a_set_union() {
        let outputs = Outputs::new();
        let group = TaskKey::server_group("cluster-nodes");
        outputs.add_member(&group, "a").await;
        outputs.add_member(&group, "b").await;
        outputs.add_member(&group, "a").await;
        let members = outputs.members(&group).await;
        assert_eq!(members.len(), 2);
    }
}

// ── Convergence applier ──
//
// Walks a plan as a DAG. A resource starts once every producer it waits on
// has finished; ready resources run concurrently up to a limit, with ties
// going to the earlier entry in the plan. Each task owns exactly one
// resource and hands its result back to the walker, which is the only
// place state is written (and persisted, once per finished resource).
//
// A failure skips everything downstream of it while unrelated branches
// keep going. Cancellation stops new work from starting; whatever is in
// flight runs to a terminal state.

pub mod retry;

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use stackform_api::{Attributes, CreateRequest, Platform};
use strum::Display;
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use self::retry::{RetryPolicy, WaitConfig, call_with_retry, wait_until_ready};
use crate::error::CoreError;
use crate::graph::ResourceGraph;
use crate::model::{Address, Value};
use crate::plan::{Action, Plan, ResourcePlan, diff};
use crate::state::{ResourceState, StateStore};

/// Knobs for one walk.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Maximum resources in flight at once.
    pub concurrency: usize,
    /// Per-call timeout; expiry is retried like any transient error.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Readiness polling for create-before-destroy replacements.
    pub readiness: WaitConfig,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            readiness: WaitConfig::default(),
        }
    }
}

// ── Events ──────────────────────────────────────────────────────────

/// Lifecycle phase of one resource instance during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Planned,
    Applying,
    Applied,
    Failed,
    Destroying,
    Destroyed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyEvent {
    pub address: Address,
    pub phase: Phase,
    /// The instance this event concerns; during a replacement the old and
    /// new instances carry different ids.
    pub instance_id: Option<String>,
}

pub type EventSender = mpsc::UnboundedSender<ApplyEvent>;

// ── Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    DependencyFailed { upstream: Address },
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DependencyFailed { upstream } => write!(f, "dependency {upstream} failed"),
            Self::Cancelled => f.write_str("apply cancelled"),
        }
    }
}

#[derive(Debug)]
pub enum ResourceStatus {
    Unchanged,
    Applied,
    Destroyed,
    Failed(CoreError),
    Skipped(SkipReason),
}

impl ResourceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Applied => "applied",
            Self::Destroyed => "destroyed",
            Self::Failed(_) => "failed",
            Self::Skipped(_) => "skipped",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Unchanged | Self::Applied | Self::Destroyed)
    }
}

#[derive(Debug)]
pub struct ResourceResult {
    pub address: Address,
    pub action: Action,
    pub status: ResourceStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyCounts {
    pub applied: usize,
    pub unchanged: usize,
    pub destroyed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl fmt::Display for ApplyCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} applied, {} destroyed, {} unchanged, {} failed, {} skipped",
            self.applied, self.destroyed, self.unchanged, self.failed, self.skipped
        )
    }
}

/// Partial-success report of one walk.
#[derive(Debug, Default)]
pub struct ApplySummary {
    /// Deletions first, then declared resources in apply order.
    pub results: Vec<ResourceResult>,
    pub cancelled: bool,
}

impl ApplySummary {
    pub fn counts(&self) -> ApplyCounts {
        let mut c = ApplyCounts::default();
        for r in &self.results {
            match r.status {
                ResourceStatus::Unchanged => c.unchanged += 1,
                ResourceStatus::Applied => c.applied += 1,
                ResourceStatus::Destroyed => c.destroyed += 1,
                ResourceStatus::Failed(_) => c.failed += 1,
                ResourceStatus::Skipped(_) => c.skipped += 1,
            }
        }
        c
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.results.iter().all(|r| r.status.is_ok())
    }

    pub fn status_of(&self, address: &Address) -> Option<&ResourceStatus> {
        self.results
            .iter()
            .rev()
            .find(|r| &r.address == address)
            .map(|r| &r.status)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Address, &CoreError)> {
        self.results.iter().filter_map(|r| match &r.status {
            ResourceStatus::Failed(e) => Some((&r.address, e)),
            _ => None,
        })
    }
}

// ── Walk ────────────────────────────────────────────────────────────

/// Everything a task needs; shared read-only by every task of a walk.
struct Shared<P> {
    platform: Arc<P>,
    graph: Option<Arc<ResourceGraph>>,
    options: ApplyOptions,
    cancel: CancellationToken,
    events: Option<EventSender>,
}

impl<P> Shared<P> {
    fn emit(&self, address: &Address, phase: Phase, instance_id: Option<&str>) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(ApplyEvent {
                address: address.clone(),
                phase,
                instance_id: instance_id.map(str::to_owned),
            });
        }
    }
}

enum StateChange {
    Keep,
    Upsert(ResourceState),
    Remove,
}

struct TaskOutcome {
    change: StateChange,
    result: Result<ResourceStatus, CoreError>,
}

impl TaskOutcome {
    fn failed(change: StateChange, error: CoreError) -> Self {
        Self {
            change,
            result: Err(error),
        }
    }
}

/// Execute `plan`: deletions first, then declared resources. `graph` is
/// required whenever the plan creates, updates, or replaces anything.
pub async fn execute<P: Platform>(
    platform: Arc<P>,
    graph: Option<Arc<ResourceGraph>>,
    plan: &Plan,
    state: &mut StateStore,
    options: ApplyOptions,
    cancel: CancellationToken,
    events: Option<EventSender>,
) -> Result<ApplySummary, CoreError> {
    if graph.is_none() && plan.resources.iter().any(|p| p.action != Action::NoOp) {
        return Err(CoreError::Internal(
            "applying declared resources needs a resource graph".into(),
        ));
    }
    // A failed state write stops this walk without cancelling the caller.
    let shared = Arc::new(Shared {
        platform,
        graph,
        options,
        cancel: cancel.child_token(),
        events,
    });
    for p in plan.changes() {
        shared.emit(&p.address, Phase::Planned, p.prior_id.as_deref());
    }

    // Deletions wait on the deletions of their recorded consumers.
    let deletion_waits: Vec<Vec<usize>> = plan
        .deletions
        .iter()
        .map(|p| {
            plan.deletions
                .iter()
                .enumerate()
                .filter(|(_, other)| {
                    state
                        .get(&other.address)
                        .is_some_and(|s| s.dependencies.contains(&p.address))
                })
                .map(|(j, _)| j)
                .collect()
        })
        .collect();
    let deleted = walk(&shared, &plan.deletions, &deletion_waits, state).await;

    // Declared resources wait on their producers within the plan.
    let resource_waits: Vec<Vec<usize>> = plan
        .resources
        .iter()
        .map(|p| {
            let producers = shared
                .graph
                .as_deref()
                .and_then(|g| g.node(&p.address))
                .map(|n| n.producers.as_slice())
                .unwrap_or_default();
            plan.resources
                .iter()
                .enumerate()
                .filter(|(_, other)| producers.contains(&other.address))
                .map(|(j, _)| j)
                .collect()
        })
        .collect();
    let applied = walk(&shared, &plan.resources, &resource_waits, state).await;

    let results = plan
        .deletions
        .iter()
        .zip(deleted)
        .chain(plan.resources.iter().zip(applied))
        .map(|(p, status)| ResourceResult {
            address: p.address.clone(),
            action: p.action,
            status,
        })
        .collect();
    let summary = ApplySummary {
        results,
        cancelled: cancel.is_cancelled(),
    };
    info!(stack = %plan.stack, counts = %summary.counts(), cancelled = summary.cancelled, "walk finished");
    Ok(summary)
}

/// Run `jobs` respecting `waits_on`, committing every finished job.
///
/// Never bails out early: a panicked task fails only its own resource, and a
/// state write that fails stops new work while in-flight tasks drain.
async fn walk<P: Platform>(
    shared: &Arc<Shared<P>>,
    jobs: &[ResourcePlan],
    waits_on: &[Vec<usize>],
    state: &mut StateStore,
) -> Vec<ResourceStatus> {
    let n = jobs.len();
    let mut remaining: Vec<usize> = waits_on.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, deps) in waits_on.iter().enumerate() {
        for d in deps {
            dependents[*d].push(i);
        }
    }

    let mut status: Vec<Option<ResourceStatus>> = (0..n).map(|_| None).collect();
    let mut ready: BinaryHeap<Reverse<usize>> =
        (0..n).filter(|i| remaining[*i] == 0).map(Reverse).collect();
    let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
    let mut owners: HashMap<task::Id, usize> = HashMap::new();
    let limit = shared.options.concurrency.max(1);

    loop {
        while tasks.len() < limit && !shared.cancel.is_cancelled() {
            let Some(Reverse(i)) = ready.pop() else {
                break;
            };
            let job = &jobs[i];
            if job.action == Action::NoOp {
                debug!(address = %job.address, "unchanged");
                status[i] = Some(ResourceStatus::Unchanged);
                release(i, &dependents, &mut remaining, &mut ready);
                continue;
            }
            debug!(address = %job.address, action = %job.action, in_flight = tasks.len(), "scheduling");
            let task_shared = Arc::clone(shared);
            let job = job.clone();
            let snapshot = state.snapshot();
            let handle = tasks.spawn(async move { run(&task_shared, &job, &snapshot).await });
            owners.insert(handle.id(), i);
        }

        let Some(joined) = tasks.join_next_with_id().await else {
            break;
        };
        let (i, outcome) = match joined {
            Ok((id, outcome)) => (owners.remove(&id), Ok(outcome)),
            Err(e) => (owners.remove(&e.id()), Err(e)),
        };
        let Some(i) = i else {
            warn!("finished task has no owning resource");
            continue;
        };
        let job = &jobs[i];

        let result = match outcome {
            Ok(outcome) => match commit(state, &job.address, outcome.change) {
                Ok(()) => outcome.result,
                Err(e) => {
                    warn!(address = %job.address, error = %e, "state write failed, stopping the walk");
                    shared.cancel.cancel();
                    Err(e)
                }
            },
            Err(e) => Err(CoreError::Internal(format!("apply task aborted: {e}"))),
        };
        match result {
            Ok(done) => {
                status[i] = Some(done);
                release(i, &dependents, &mut remaining, &mut ready);
            }
            Err(error) => {
                warn!(address = %job.address, error = %error, "resource failed");
                shared.emit(&job.address, Phase::Failed, None);
                status[i] = Some(ResourceStatus::Failed(error));
                skip_downstream(shared, jobs, i, &dependents, &mut status);
            }
        }
    }

    status
        .into_iter()
        .zip(jobs)
        .map(|(s, job)| {
            s.unwrap_or_else(|| {
                shared.emit(&job.address, Phase::Skipped, None);
                ResourceStatus::Skipped(SkipReason::Cancelled)
            })
        })
        .collect()
}

fn commit(state: &mut StateStore, address: &Address, change: StateChange) -> Result<(), CoreError> {
    match change {
        StateChange::Keep => Ok(()),
        StateChange::Upsert(s) => state.commit(address, Some(s)),
        StateChange::Remove => state.commit(address, None),
    }
}

fn release(
    done: usize,
    dependents: &[Vec<usize>],
    remaining: &mut [usize],
    ready: &mut BinaryHeap<Reverse<usize>>,
) {
    for &d in &dependents[done] {
        remaining[d] -= 1;
        if remaining[d] == 0 {
            ready.push(Reverse(d));
        }
    }
}

fn skip_downstream<P>(
    shared: &Shared<P>,
    jobs: &[ResourcePlan],
    failed: usize,
    dependents: &[Vec<usize>],
    status: &mut [Option<ResourceStatus>],
) {
    let upstream = jobs[failed].address.clone();
    let mut queue: VecDeque<usize> = dependents[failed].iter().copied().collect();
    while let Some(j) = queue.pop_front() {
        if status[j].is_some() {
            continue;
        }
        shared.emit(&jobs[j].address, Phase::Skipped, None);
        status[j] = Some(ResourceStatus::Skipped(SkipReason::DependencyFailed {
            upstream: upstream.clone(),
        }));
        queue.extend(dependents[j].iter().copied());
    }
}

// ── Tasks ───────────────────────────────────────────────────────────

async fn run<P: Platform>(
    shared: &Shared<P>,
    job: &ResourcePlan,
    snapshot: &BTreeMap<Address, ResourceState>,
) -> TaskOutcome {
    match job.action {
        Action::NoOp => TaskOutcome {
            change: StateChange::Keep,
            result: Ok(ResourceStatus::Unchanged),
        },
        Action::Create => {
            shared.emit(&job.address, Phase::Applying, None);
            match create_instance(shared, job, snapshot).await {
                Ok(new) => {
                    shared.emit(&job.address, Phase::Applied, Some(&new.id));
                    TaskOutcome {
                        change: StateChange::Upsert(new),
                        result: Ok(ResourceStatus::Applied),
                    }
                }
                Err(e) => TaskOutcome::failed(StateChange::Keep, e),
            }
        }
        Action::Update => {
            shared.emit(&job.address, Phase::Applying, job.prior_id.as_deref());
            match update_instance(shared, job, snapshot).await {
                Ok(next) => {
                    shared.emit(&job.address, Phase::Applied, Some(&next.id));
                    TaskOutcome {
                        change: StateChange::Upsert(next),
                        result: Ok(ResourceStatus::Applied),
                    }
                }
                Err(e) => TaskOutcome::failed(StateChange::Keep, e),
            }
        }
        Action::Replace if job.create_before_destroy => replace_create_first(shared, job, snapshot).await,
        Action::Replace => replace_destroy_first(shared, job, snapshot).await,
        Action::Delete => {
            let Some(id) = job.prior_id.as_deref() else {
                return TaskOutcome::failed(
                    StateChange::Keep,
                    CoreError::Internal(format!("{} has no recorded id", job.address)),
                );
            };
            shared.emit(&job.address, Phase::Destroying, Some(id));
            match delete_instance(shared, job, id).await {
                Ok(()) => {
                    shared.emit(&job.address, Phase::Destroyed, Some(id));
                    TaskOutcome {
                        change: StateChange::Remove,
                        result: Ok(ResourceStatus::Destroyed),
                    }
                }
                Err(e) => TaskOutcome::failed(StateChange::Keep, e),
            }
        }
    }
}

async fn replace_create_first<P: Platform>(
    shared: &Shared<P>,
    job: &ResourcePlan,
    snapshot: &BTreeMap<Address, ResourceState>,
) -> TaskOutcome {
    shared.emit(&job.address, Phase::Applying, None);
    let new = match create_instance(shared, job, snapshot).await {
        Ok(new) => new,
        Err(e) => return TaskOutcome::failed(StateChange::Keep, e),
    };

    let platform = &*shared.platform;
    let kind = job.kind.as_str();
    let new_id = new.id.as_str();
    let ready = wait_until_ready(&shared.options.readiness, &shared.cancel, &job.address, || async move {
        platform.is_ready(kind, new_id).await.map_err(CoreError::from)
    })
    .await;
    if let Err(e) = ready {
        warn!(address = %job.address, id = %new_id, error = %e, "replacement never became ready, removing it");
        if let Err(cleanup) = delete_instance(shared, job, new_id).await {
            warn!(address = %job.address, id = %new_id, error = %cleanup, "could not remove abandoned replacement");
        }
        return TaskOutcome::failed(StateChange::Keep, e);
    }
    info!(address = %job.address, id = %new_id, "replacement ready");
    shared.emit(&job.address, Phase::Applied, Some(new_id));

    if let Some(old_id) = job.prior_id.as_deref() {
        shared.emit(&job.address, Phase::Destroying, Some(old_id));
        if let Err(e) = delete_instance(shared, job, old_id).await {
            return TaskOutcome::failed(StateChange::Upsert(new), e);
        }
        shared.emit(&job.address, Phase::Destroyed, Some(old_id));
    }
    TaskOutcome {
        change: StateChange::Upsert(new),
        result: Ok(ResourceStatus::Applied),
    }
}

async fn replace_destroy_first<P: Platform>(
    shared: &Shared<P>,
    job: &ResourcePlan,
    snapshot: &BTreeMap<Address, ResourceState>,
) -> TaskOutcome {
    if let Some(old_id) = job.prior_id.as_deref() {
        shared.emit(&job.address, Phase::Destroying, Some(old_id));
        if let Err(e) = delete_instance(shared, job, old_id).await {
            return TaskOutcome::failed(StateChange::Keep, e);
        }
        shared.emit(&job.address, Phase::Destroyed, Some(old_id));
    }

    shared.emit(&job.address, Phase::Applying, None);
    match create_instance(shared, job, snapshot).await {
        Ok(new) => {
            shared.emit(&job.address, Phase::Applied, Some(&new.id));
            TaskOutcome {
                change: StateChange::Upsert(new),
                result: Ok(ResourceStatus::Applied),
            }
        }
        // The old instance is gone either way.
        Err(e) => TaskOutcome::failed(StateChange::Remove, e),
    }
}

// ── Platform calls ──────────────────────────────────────────────────

struct Desired {
    inputs: BTreeMap<String, Value>,
    producers: Vec<Address>,
    ignore_changes: Vec<String>,
}

/// Re-evaluate a resource's attributes now that its producers are done.
fn evaluate_desired<P>(
    shared: &Shared<P>,
    job: &ResourcePlan,
    snapshot: &BTreeMap<Address, ResourceState>,
) -> Result<Desired, CoreError> {
    let node = shared
        .graph
        .as_deref()
        .and_then(|g| g.node(&job.address).map(|n| (g, n)));
    let Some((graph, node)) = node else {
        return Err(CoreError::Internal(format!("{} is not in the graph", job.address)));
    };
    let no_pending = HashSet::new();
    let inputs = graph
        .context(snapshot, &no_pending)
        .eval_attributes(&node.attributes, &node.address)?;
    Ok(Desired {
        inputs,
        producers: node.producers.clone(),
        ignore_changes: node.lifecycle.ignore_changes.clone(),
    })
}

fn wire(address: &Address, name: &str, value: Option<&Value>) -> Result<serde_json::Value, CoreError> {
    match value {
        None => Ok(serde_json::Value::Null),
        Some(v) => v.to_wire().ok_or_else(|| {
            CoreError::Internal(format!(
                "{address}.{name} is still unknown after its producers applied"
            ))
        }),
    }
}

async fn create_instance<P: Platform>(
    shared: &Shared<P>,
    job: &ResourcePlan,
    snapshot: &BTreeMap<Address, ResourceState>,
) -> Result<ResourceState, CoreError> {
    let desired = evaluate_desired(shared, job, snapshot)?;
    let mut attributes = Attributes::new();
    for (name, v) in &desired.inputs {
        attributes.insert(name.clone(), wire(&job.address, name, Some(v))?);
    }
    let request = CreateRequest {
        kind: job.kind.as_str().to_owned(),
        name: job.address.name().to_owned(),
        attributes,
        idempotency_key: Uuid::new_v4(),
    };

    let platform = &*shared.platform;
    let options = &shared.options;
    let record = call_with_retry(&options.retry, options.timeout, &job.address, "create", || {
        platform.create(&request)
    })
    .await?;
    info!(address = %job.address, id = %record.id, "created");
    Ok(ResourceState::from_record(
        job.kind,
        &record,
        desired.inputs,
        desired.producers,
    ))
}

async fn update_instance<P: Platform>(
    shared: &Shared<P>,
    job: &ResourcePlan,
    snapshot: &BTreeMap<Address, ResourceState>,
) -> Result<ResourceState, CoreError> {
    let prior = snapshot
        .get(&job.address)
        .ok_or_else(|| CoreError::Internal(format!("{} has no recorded state", job.address)))?;
    let desired = evaluate_desired(shared, job, snapshot)?;
    let lifecycle = crate::model::Lifecycle {
        create_before_destroy: job.create_before_destroy,
        ignore_changes: desired.ignore_changes.clone(),
    };

    let (_, changes) = diff(job.kind, &desired.inputs, Some(prior), &lifecycle);
    let mut patch = Attributes::new();
    for change in &changes {
        patch.insert(
            change.name.clone(),
            wire(&job.address, &change.name, desired.inputs.get(&change.name))?,
        );
    }

    let platform = &*shared.platform;
    let options = &shared.options;
    let kind = job.kind.as_str();
    let id = prior.id.as_str();
    let record = call_with_retry(&options.retry, options.timeout, &job.address, "update", || {
        platform.update(kind, id, &patch)
    })
    .await?;
    info!(address = %job.address, id = %record.id, changed = patch.len(), "updated");

    // Ignored attributes keep following the platform, not the config.
    let mut inputs = desired.inputs;
    for name in &desired.ignore_changes {
        match prior.inputs.get(name) {
            Some(v) => inputs.insert(name.clone(), v.clone()),
            None => inputs.remove(name),
        };
    }
    Ok(ResourceState::from_record(
        job.kind,
        &record,
        inputs,
        desired.producers,
    ))
}

async fn delete_instance<P: Platform>(
    shared: &Shared<P>,
    job: &ResourcePlan,
    id: &str,
) -> Result<(), CoreError> {
    let platform = &*shared.platform;
    let options = &shared.options;
    let kind = job.kind.as_str();
    call_with_retry(&options.retry, options.timeout, &job.address, "delete", || {
        platform.delete(kind, id)
    })
    .await?;
    info!(address = %job.address, id, "deleted");
    Ok(())
}

//! Concurrent graph executor.
//!
//! The executor walks a [`DependencyGraph`] with a dynamic ready set: a node
//! starts as soon as every one of its dependencies resolved and a
//! concurrency permit is free. Each node runs in its own task, resolves its
//! inputs, asks the reconciler for an operation, executes it through the
//! resource adapter, and publishes its completion signal so that outputs
//! waiting on it wake up.
//!
//! After the graph, a cleanup phase deletes instances retired by
//! create-before-delete replacements and recorded resources that are no
//! longer declared, dependents first. Retired instances it does not get to
//! stay in the recorded state until a later run deletes them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{ExecutionFailure, Result, StackweaveError};
use crate::graph::{DependencyGraph, NodeState, ResourceId, ResourceNode};
use crate::output::signal::{self, NodeSignal};
use crate::output::PropertySet;
use crate::provider::{OperationResult, Provider, ResourceAdapter, RetryPolicy};
use crate::reconciler::{Decision, OperationKind, Reconciler};
use crate::state::{RecordedExport, ResourceState, RetiredInstance, StackState};

use super::plan::ExecutionPlan;
use super::report::{ExportValue, NodeOutcome, NodeReport, RunReport, RunStatus};

/// Default number of resources operated on at once.
pub const DEFAULT_MAX_PARALLEL: usize = 10;

/// What happens to the rest of the graph when a node fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Start nothing new; let in-flight nodes finish.
    #[default]
    FailFast,
    /// Skip only the failed node's dependents.
    Continue,
}

/// Knobs for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Maximum number of nodes executing at once.
    pub max_parallel: usize,
    /// Failure handling.
    pub failure_policy: FailurePolicy,
    /// Wall-clock budget after which no new node starts.
    pub deadline: Option<Duration>,
    /// Re-read unchanged resources from the provider.
    pub refresh: bool,
    /// Backoff for transient provider failures.
    pub retry: RetryPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            failure_policy: FailurePolicy::default(),
            deadline: None,
            refresh: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl RunOptions {
    /// Sets the concurrency bound.
    #[must_use]
    pub const fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Sets the run deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Enables provider refresh of unchanged resources.
    #[must_use]
    pub const fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// The result of a run: what happened and what is now provisioned.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Per-node and overall report.
    pub report: RunReport,
    /// Recorded state after the run, ready to be persisted.
    pub state: StackState,
}

/// What a node task hands back to the scheduler.
#[derive(Debug)]
struct NodeCompletion {
    index: usize,
    decision: Option<Decision>,
    inputs: Option<PropertySet>,
    result: std::result::Result<OperationResult, ExecutionFailure>,
    duration: Duration,
}

impl NodeCompletion {
    fn aborted(index: usize, message: String, duration: Duration) -> Self {
        Self {
            index,
            decision: None,
            inputs: None,
            result: Err(ExecutionFailure::Aborted { message }),
            duration,
        }
    }
}

/// A resource instance the cleanup phase has to remove.
#[derive(Debug, Clone)]
struct PendingDeletion {
    id: ResourceId,
    provider_id: String,
    protect: bool,
    orphan: bool,
}

/// Scheduler bookkeeping for one run.
struct Schedule {
    states: Vec<NodeState>,
    waiting: Vec<usize>,
    ready: BTreeSet<usize>,
    halt: Option<(String, Option<ResourceId>)>,
    failed: bool,
    deadline_hit: bool,
    reports: Vec<NodeReport>,
    completions: Vec<NodeCompletion>,
}

impl Schedule {
    fn new(graph: &DependencyGraph) -> Self {
        let waiting: Vec<usize> = (0..graph.len())
            .map(|i| graph.dependencies_of(i).len())
            .collect();
        let ready = waiting
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| i)
            .collect();

        Self {
            states: vec![NodeState::Pending; graph.len()],
            waiting,
            ready,
            halt: None,
            failed: false,
            deadline_hit: false,
            reports: Vec::with_capacity(graph.len()),
            completions: Vec::new(),
        }
    }

    fn transition(&mut self, index: usize, next: NodeState) {
        debug_assert!(
            self.states[index].can_transition_to(next),
            "illegal transition {} -> {next}",
            self.states[index]
        );
        self.states[index] = next;
    }
}

/// Runs dependency graphs against a provider.
pub struct Engine {
    provider: Arc<dyn Provider>,
    reconciler: Reconciler,
    options: RunOptions,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, options: RunOptions) -> Self {
        Self {
            provider,
            reconciler: Reconciler::new(),
            options,
        }
    }

    /// Returns the run options.
    #[must_use]
    pub const fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Executes a graph against the recorded state of its stack.
    ///
    /// Node failures never surface as errors; they are part of the returned
    /// report. The recorded state reflects exactly what succeeded.
    ///
    /// # Errors
    ///
    /// Returns an error only if the scheduler itself breaks down.
    pub async fn run(&self, graph: DependencyGraph, prior: &StackState) -> Result<RunOutcome> {
        let graph = Arc::new(graph);
        let adapter = Arc::new(
            ResourceAdapter::new(Arc::clone(&self.provider))
                .with_retry(self.options.retry)
                .with_refresh(self.options.refresh),
        );

        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = self.options.deadline.map(|budget| started + budget);
        let semaphore = Arc::new(Semaphore::new(self.options.max_parallel.max(1)));

        info!(
            "Running stack '{}': {} resources, up to {} in parallel",
            graph.stack(),
            graph.len(),
            self.options.max_parallel.max(1)
        );

        let mut schedule = Schedule::new(&graph);
        let mut in_flight: JoinSet<NodeCompletion> = JoinSet::new();

        loop {
            while schedule.halt.is_none() {
                let Some(&index) = schedule.ready.first() else {
                    break;
                };
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };
                schedule.ready.remove(&index);
                schedule.transition(index, NodeState::Scheduled);
                schedule.transition(index, NodeState::Executing);
                self.spawn_node(&mut in_flight, &graph, &adapter, prior, index, permit);
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                joined = in_flight.join_next() => {
                    let Some(joined) = joined else {
                        continue;
                    };
                    let completion = joined.map_err(|e| {
                        StackweaveError::internal(format!("node supervisor failed: {e}"))
                    })?;
                    self.settle(&graph, &mut schedule, completion);
                }
                () = wait_until(deadline), if !schedule.deadline_hit => {
                    schedule.deadline_hit = true;
                    warn!("Deadline reached, starting nothing new");
                    schedule.halt.get_or_insert_with(|| {
                        (String::from("deadline exceeded before the resource started"), None)
                    });
                }
            }
        }

        Self::cancel_unstarted(&graph, &mut schedule);

        let fail_fast_stop =
            schedule.failed && self.options.failure_policy == FailurePolicy::FailFast;
        let retired = retired_instances(prior, &schedule);
        let mut deletions = Vec::new();
        if schedule.deadline_hit || fail_fast_stop {
            if retired.is_empty() {
                info!("Skipping cleanup phase after an interrupted run");
            } else {
                warn!(
                    "Skipping cleanup phase after an interrupted run, {} replaced instances kept for the next run",
                    retired.len()
                );
            }
        } else {
            deletions = self.pending_deletions(&graph, prior, &retired);
        }
        let (cleanup, deleted, cleanup_failed) = Self::cleanup(&adapter, deletions).await;

        let exports = collect_exports(&graph).await;
        let mut state = self.record_state(&graph, prior, &schedule, retired, &deleted);
        state.exports = exports
            .iter()
            .map(|e| RecordedExport::new(e.name.clone(), e.value.clone(), e.secret, e.error.clone()))
            .collect();

        let unresolved_exports = exports.iter().filter(|e| e.error.is_some()).count();
        let status = if schedule.deadline_hit {
            RunStatus::Incomplete
        } else if schedule.failed || cleanup_failed {
            RunStatus::Failed
        } else if unresolved_exports > 0 {
            warn!("{unresolved_exports} stack exports did not resolve");
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        let report = RunReport {
            stack: graph.stack().to_string(),
            started_at,
            duration_ms: millis(started.elapsed()),
            status,
            nodes: schedule.reports,
            cleanup,
            exports,
        };

        info!(
            "Run {status} for stack '{}' in {}ms",
            report.stack, report.duration_ms
        );

        Ok(RunOutcome { report, state })
    }

    fn spawn_node(
        &self,
        in_flight: &mut JoinSet<NodeCompletion>,
        graph: &Arc<DependencyGraph>,
        adapter: &Arc<ResourceAdapter>,
        prior: &StackState,
        index: usize,
        permit: OwnedSemaphorePermit,
    ) {
        let task = evaluate_node(
            Arc::clone(graph),
            index,
            Arc::clone(adapter),
            self.reconciler,
            prior.get(&graph.node(index).id).cloned(),
        );
        let graph = Arc::clone(graph);

        // The inner task isolates panics so the node still publishes a
        // terminal signal and releases its permit.
        in_flight.spawn(async move {
            let _permit = permit;
            let started = Instant::now();
            match tokio::spawn(task).await {
                Ok(completion) => completion,
                Err(e) => {
                    let message = e.to_string();
                    error!("Task for {} aborted: {message}", graph.node(index).id);
                    signal::publish(
                        graph.signal(index),
                        NodeSignal::Failed {
                            cause: format!("node task aborted: {message}"),
                        },
                    );
                    NodeCompletion::aborted(index, message, started.elapsed())
                }
            }
        });
    }

    fn settle(&self, graph: &DependencyGraph, schedule: &mut Schedule, completion: NodeCompletion) {
        let index = completion.index;
        let id = graph.node(index).id.clone();

        match &completion.result {
            Ok(result) => {
                schedule.transition(index, NodeState::Resolved);
                info!(
                    "{id}: {} resolved ({} attempts, {}ms)",
                    result.operation,
                    result.attempts,
                    millis(completion.duration)
                );
                for &dependent in graph.dependents_of(index) {
                    schedule.waiting[dependent] -= 1;
                    if schedule.waiting[dependent] == 0
                        && schedule.states[dependent] == NodeState::Pending
                    {
                        schedule.ready.insert(dependent);
                    }
                }
            }
            Err(failure) => {
                schedule.transition(index, NodeState::Failed);
                schedule.failed = true;
                error!("{id} failed: {failure}");
            }
        }

        schedule.reports.push(completion_report(&id, &completion));

        if let Err(failure) = &completion.result {
            let (origin, cause) = match failure {
                ExecutionFailure::Blocked { resource, cause } => (resource.clone(), cause.clone()),
                other => (id.clone(), other.to_string()),
            };

            match self.options.failure_policy {
                FailurePolicy::FailFast => {
                    schedule.halt.get_or_insert_with(|| {
                        (format!("run stopped after {id} failed: {failure}"), Some(id.clone()))
                    });
                }
                FailurePolicy::Continue => {
                    for dependent in graph.transitive_dependents(index) {
                        if schedule.states[dependent] != NodeState::Pending {
                            continue;
                        }
                        schedule.transition(dependent, NodeState::Skipped);
                        schedule.ready.remove(&dependent);
                        let skipped = &graph.node(dependent).id;
                        warn!("Skipping {skipped}: blocked by {origin}");
                        signal::publish(
                            graph.signal(dependent),
                            NodeSignal::Skipped {
                                blocked_by: origin.clone(),
                                cause: cause.clone(),
                            },
                        );
                        schedule.reports.push(NodeReport::not_started(
                            skipped.clone(),
                            NodeOutcome::Skipped,
                            format!("blocked by {origin}: {cause}"),
                            Some(origin.clone()),
                        ));
                    }
                }
            }
        }

        schedule.completions.push(completion);
    }

    fn cancel_unstarted(graph: &DependencyGraph, schedule: &mut Schedule) {
        let (reason, blocked_by) = schedule.halt.clone().unwrap_or_else(|| {
            (String::from("run ended before the resource started"), None)
        });

        for index in 0..graph.len() {
            if schedule.states[index] != NodeState::Pending {
                continue;
            }
            schedule.transition(index, NodeState::Cancelled);
            let id = &graph.node(index).id;
            debug!("Cancelled {id}: {reason}");
            signal::publish(
                graph.signal(index),
                NodeSignal::Cancelled {
                    reason: reason.clone(),
                },
            );
            schedule.reports.push(NodeReport::not_started(
                id.clone(),
                NodeOutcome::Cancelled,
                reason.clone(),
                blocked_by.clone(),
            ));
        }
    }

    /// Orphans first, then instances retired by replacements; each group
    /// ordered dependents first.
    fn pending_deletions(
        &self,
        graph: &DependencyGraph,
        prior: &StackState,
        retired: &[RetiredInstance],
    ) -> Vec<PendingDeletion> {
        let mut deletions: Vec<PendingDeletion> = self
            .reconciler
            .orphans(graph, prior)
            .into_iter()
            .filter_map(|decision| prior.get(&decision.id))
            .map(|record| PendingDeletion {
                id: record.id.clone(),
                provider_id: record.provider_id.clone(),
                protect: record.protect,
                orphan: true,
            })
            .collect();

        let order: Vec<ResourceId> = ExecutionPlan::from_graph(graph)
            .batches
            .into_iter()
            .flatten()
            .collect();
        let mut replaced: Vec<PendingDeletion> = retired
            .iter()
            .map(|r| PendingDeletion {
                id: r.id.clone(),
                provider_id: r.provider_id.clone(),
                protect: r.protect,
                orphan: false,
            })
            .collect();
        // Stable, so instances left over from earlier runs go first.
        replaced.sort_by_key(|d| std::cmp::Reverse(order.iter().position(|id| id == &d.id)));
        deletions.extend(replaced);
        deletions
    }

    async fn cleanup(
        adapter: &ResourceAdapter,
        deletions: Vec<PendingDeletion>,
    ) -> (Vec<NodeReport>, Vec<PendingDeletion>, bool) {
        let mut reports = Vec::with_capacity(deletions.len());
        let mut deleted = Vec::new();
        let mut stopped: Option<ResourceId> = None;

        for deletion in deletions {
            if let Some(failed) = &stopped {
                reports.push(NodeReport::not_started(
                    deletion.id,
                    NodeOutcome::Cancelled,
                    format!("cleanup stopped after deleting {failed} failed"),
                    Some(failed.clone()),
                ));
                continue;
            }

            let started = Instant::now();
            let outcome = adapter
                .delete(&deletion.id, &deletion.provider_id, deletion.protect)
                .await;
            let duration_ms = millis(started.elapsed());

            match outcome {
                Ok(attempts) => {
                    reports.push(NodeReport {
                        id: deletion.id.clone(),
                        operation: Some(OperationKind::Delete),
                        outcome: NodeOutcome::Resolved,
                        duration_ms,
                        attempts,
                        error: None,
                        blocked_by: None,
                        diffs: Vec::new(),
                    });
                    deleted.push(deletion);
                }
                Err(failure) => {
                    error!("Failed to delete {} ({}): {failure}", deletion.id, deletion.provider_id);
                    stopped = Some(deletion.id.clone());
                    reports.push(NodeReport {
                        id: deletion.id,
                        operation: Some(OperationKind::Delete),
                        outcome: NodeOutcome::Failed,
                        duration_ms,
                        attempts: attempts_of(&failure),
                        error: Some(failure.to_string()),
                        blocked_by: None,
                        diffs: Vec::new(),
                    });
                }
            }
        }

        (reports, deleted, stopped.is_some())
    }

    fn record_state(
        &self,
        graph: &DependencyGraph,
        prior: &StackState,
        schedule: &Schedule,
        retired: Vec<RetiredInstance>,
        deleted: &[PendingDeletion],
    ) -> StackState {
        let mut state = prior.clone();
        state.stack = graph.stack().to_string();

        for completion in &schedule.completions {
            let node = graph.node(completion.index);
            match (&completion.result, &completion.inputs, &completion.decision) {
                (Ok(result), Some(inputs), Some(decision)) => {
                    let record = self.record(graph, node, inputs, decision, result, prior.get(&node.id));
                    state.set(record);
                }
                (Err(ExecutionFailure::ReplaceIncomplete { .. }), _, _) => {
                    warn!("{} no longer exists in the cloud, dropping its record", node.id);
                    state.remove(&node.id);
                }
                _ => {}
            }
        }

        for deletion in deleted.iter().filter(|d| d.orphan) {
            state.remove(&deletion.id);
        }
        state.retired = retired
            .into_iter()
            .filter(|r| !deleted.iter().any(|d| !d.orphan && d.provider_id == r.provider_id))
            .collect();
        state.last_updated = Utc::now();
        state
    }

    fn record(
        &self,
        graph: &DependencyGraph,
        node: &ResourceNode,
        inputs: &PropertySet,
        decision: &Decision,
        result: &OperationResult,
        prior: Option<&ResourceState>,
    ) -> ResourceState {
        let now = Utc::now();
        let same_instance = prior.filter(|p| p.provider_id == result.provider_id);
        let updated_at = match same_instance {
            Some(p) if result.operation == OperationKind::NoOp => p.updated_at,
            _ => now,
        };

        ResourceState {
            id: node.id.clone(),
            provider_id: result.provider_id.clone(),
            inputs: self.reconciler.hasher().recordable(inputs),
            secret_inputs: inputs.secret.clone(),
            input_hash: decision.input_hash.clone(),
            outputs: self.reconciler.hasher().recordable_outputs(&result.outputs, inputs),
            secret_outputs: result.outputs.secret.clone(),
            dependencies: graph
                .dependencies_of(node.index)
                .iter()
                .map(|&d| graph.node(d).id.clone())
                .collect(),
            protect: node.options.protect,
            created_at: same_instance.map_or(now, |p| p.created_at),
            updated_at,
        }
    }
}

/// Replaced instances still awaiting deletion: those carried over from
/// earlier runs followed by the ones this run superseded.
fn retired_instances(prior: &StackState, schedule: &Schedule) -> Vec<RetiredInstance> {
    let now = Utc::now();
    let mut retired = prior.retired.clone();
    retired.extend(
        schedule
            .completions
            .iter()
            .filter_map(|c| c.result.as_ref().ok()?.retired.clone())
            .map(|r| RetiredInstance {
                id: r.id,
                provider_id: r.provider_id,
                protect: r.protect,
                retired_at: now,
            }),
    );
    retired
}

/// Resolves inputs, decides, executes, and publishes the node's signal.
async fn evaluate_node(
    graph: Arc<DependencyGraph>,
    index: usize,
    adapter: Arc<ResourceAdapter>,
    reconciler: Reconciler,
    prior: Option<ResourceState>,
) -> NodeCompletion {
    let started = Instant::now();
    let node = graph.node(index);
    debug!("Evaluating {}", node.id);

    let (decision, inputs, result) = match resolve_inputs(node).await {
        Err(failure) => (None, None, Err(failure)),
        Ok(inputs) => {
            let schema = adapter.schema(node.id.type_token());
            let decision = reconciler.decide(&node.id, &inputs, prior.as_ref(), schema.as_ref());
            info!("{decision}");
            let result = adapter
                .execute(&decision, &inputs, prior.as_ref(), node.options)
                .await;
            (Some(decision), Some(inputs), result)
        }
    };

    let published = match &result {
        Ok(done) => NodeSignal::Resolved(Arc::new(done.outputs.clone())),
        Err(failure) => NodeSignal::Failed {
            cause: failure.to_string(),
        },
    };
    signal::publish(graph.signal(index), published);

    NodeCompletion {
        index,
        decision,
        inputs,
        result,
        duration: started.elapsed(),
    }
}

async fn resolve_inputs(node: &ResourceNode) -> std::result::Result<PropertySet, ExecutionFailure> {
    let mut inputs = PropertySet::new();
    for (name, input) in &node.inputs {
        let resolved = input.resolve().await?;
        inputs.insert(name.clone(), resolved.value, resolved.secret);
    }
    Ok(inputs)
}

async fn collect_exports(graph: &DependencyGraph) -> Vec<ExportValue> {
    let mut exports = Vec::with_capacity(graph.exports().len());
    for export in graph.exports() {
        let value = match export.value.resolve().await {
            Ok(resolved) => ExportValue {
                name: export.name.clone(),
                value: Some(resolved.value),
                secret: resolved.secret,
                error: None,
            },
            Err(e) => ExportValue {
                name: export.name.clone(),
                value: None,
                secret: export.value.is_secret(),
                error: Some(e.to_string()),
            },
        };
        exports.push(value);
    }
    exports
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}

fn completion_report(id: &ResourceId, completion: &NodeCompletion) -> NodeReport {
    let decision = completion.decision.as_ref();
    let diffs = decision.map(|d| d.diffs.clone()).unwrap_or_default();

    match &completion.result {
        Ok(result) => NodeReport {
            id: id.clone(),
            operation: Some(result.operation),
            outcome: NodeOutcome::Resolved,
            duration_ms: millis(completion.duration),
            attempts: result.attempts,
            error: None,
            blocked_by: None,
            diffs,
        },
        Err(failure) => NodeReport {
            id: id.clone(),
            operation: decision.map(|d| d.operation),
            outcome: NodeOutcome::Failed,
            duration_ms: millis(completion.duration),
            attempts: if decision.is_some() { attempts_of(failure) } else { 0 },
            error: Some(failure.to_string()),
            blocked_by: match failure {
                ExecutionFailure::Blocked { resource, .. } => Some(resource.clone()),
                _ => None,
            },
            diffs,
        },
    }
}

const fn attempts_of(failure: &ExecutionFailure) -> u32 {
    match failure {
        ExecutionFailure::RetriesExhausted { attempts, .. } => *attempts,
        _ => 1,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

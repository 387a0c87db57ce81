use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::action::{self, ActionExecutor};
use crate::component::{ComponentId, ComponentTree};
use crate::error::{Error, Hint, Result};
use crate::variable::{OutputStore, VariableLookup};

use super::graph::DependencyGraph;
use super::scheduler::ExecutionPlan;

/// Shared stop signal, checked between batches. Never interrupts a running action.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Upper bound on components executing at once within a batch.
    pub concurrency: usize,
    pub cancellation: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            cancellation: CancellationToken::new(),
        }
    }
}

pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Collaborators shared by every worker during a run.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub executor: &'a dyn ActionExecutor,
    pub lookup: &'a dyn VariableLookup,
    pub outputs: &'a OutputStore,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentResult {
    pub id: String,
    pub action: String,
    pub batch: usize,
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
}

impl ComponentResult {
    fn new(id: &str, action: &str, batch: usize, status: ComponentStatus) -> Self {
        Self {
            id: id.to_string(),
            action: action.to_string(),
            batch,
            status,
            started_at: None,
            duration_ms: None,
            error_code: None,
            error: None,
            diagnostics: None,
            hints: Vec::new(),
            warnings: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    fn fail(mut self, err: &Error) -> Self {
        self.status = ComponentStatus::Failed;
        self.error_code = Some(err.code.as_str().to_string());
        self.error = Some(err.message.clone());
        self.hints = err.hints.clone();
        if self.diagnostics.is_none() {
            self.diagnostics = err
                .details
                .get("diagnostics")
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_components: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub next_actions: Vec<String>,
}

/// Outcome of every component, keyed by identity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    pub batches: Vec<Vec<String>>,
    pub components: BTreeMap<String, ComponentResult>,
    pub summary: RunSummary,
}

impl RunResult {
    pub fn get(&self, id: &str) -> Option<&ComponentResult> {
        self.components.get(id)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Execute `plan` batch by batch.
///
/// A failure cancels the run: the rest of the current batch still finishes,
/// every later component is reported as skipped. Outputs of successful
/// components are published before the next batch starts.
pub fn run(
    tree: &ComponentTree,
    graph: &DependencyGraph,
    plan: &ExecutionPlan,
    ctx: RunContext<'_>,
    options: &RunOptions,
) -> Result<RunResult> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let total_batches = plan.batches().len();
    let mut results: BTreeMap<String, ComponentResult> = BTreeMap::new();
    // Component skipped -> the failed component that blocked it.
    let mut blocked_by: BTreeMap<ComponentId, ComponentId> = BTreeMap::new();

    tracing::info!(%run_id, batches = total_batches, components = plan.len(), "starting run");

    for (index, batch) in plan.batches().iter().enumerate() {
        if options.cancellation.is_cancelled() {
            for &id in batch {
                let result = skipped_result(tree, id, index, blocked_by.get(&id).copied());
                results.insert(result.id.clone(), result);
            }
            continue;
        }

        log_status!(
            "apply",
            "Batch {}/{}: {}",
            index + 1,
            total_batches,
            batch
                .iter()
                .map(|id| tree.get(*id).identity.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let batch_results = execute_batch(tree, batch, index, ctx, options.concurrency)?;
        for (id, result) in batch_results {
            match result.status {
                ComponentStatus::Succeeded => {
                    ctx.outputs.publish(&result.id, &result.outputs);
                }
                ComponentStatus::Failed | ComponentStatus::Skipped => {
                    tracing::warn!(component = %result.id, error = ?result.error, "component failed");
                    for dependent in graph.transitive_dependents(id) {
                        blocked_by.entry(dependent).or_insert(id);
                    }
                    options.cancellation.cancel();
                }
            }
            results.insert(result.id.clone(), result);
        }
    }

    let status = derive_overall_status(&results, options.cancellation.is_cancelled());
    let summary = build_summary(&results, status);
    let batches = plan
        .batches()
        .iter()
        .map(|batch| batch.iter().map(|id| tree.get(*id).identity.clone()).collect())
        .collect();

    tracing::info!(%run_id, ?status, "run finished");

    Ok(RunResult {
        run_id,
        status,
        batches,
        components: results,
        summary,
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn execute_batch(
    tree: &ComponentTree,
    batch: &[ComponentId],
    index: usize,
    ctx: RunContext<'_>,
    concurrency: usize,
) -> Result<Vec<(ComponentId, ComponentResult)>> {
    let workers = concurrency.max(1).min(batch.len());
    if workers <= 1 {
        return Ok(batch
            .iter()
            .map(|&id| (id, execute_component(tree, id, index, ctx)))
            .collect());
    }

    let queue: Mutex<VecDeque<ComponentId>> = Mutex::new(batch.iter().copied().collect());

    let mut results = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();
                    loop {
                        let next = lock(&queue).pop_front();
                        let Some(id) = next else { break };
                        done.push((id, execute_component(tree, id, index, ctx)));
                    }
                    done
                })
            })
            .collect();

        let mut results = Vec::with_capacity(batch.len());
        for handle in handles {
            let done = handle
                .join()
                .map_err(|_| Error::internal_unexpected("component worker thread panicked"))?;
            results.extend(done);
        }
        Ok::<_, Error>(results)
    })?;

    // Keep batch order (identity order) regardless of completion order.
    results.sort_by_key(|(id, _)| batch.iter().position(|b| b == id));
    Ok(results)
}

fn execute_component(
    tree: &ComponentTree,
    id: ComponentId,
    index: usize,
    ctx: RunContext<'_>,
) -> ComponentResult {
    let node = tree.get(id);
    let mut result = ComponentResult::new(
        &node.identity,
        node.action.kind(),
        index,
        ComponentStatus::Succeeded,
    );
    result.started_at = Some(chrono::Utc::now().to_rfc3339());
    let timer = Instant::now();

    let invocation = match action::build_invocation(node, ctx.lookup) {
        Ok(invocation) => invocation,
        Err(err) => {
            result.duration_ms = Some(timer.elapsed().as_millis() as u64);
            return result.fail(&err);
        }
    };

    let Some(invocation) = invocation else {
        tracing::debug!(component = %node.identity, "no action; completes once its subtree has");
        result.duration_ms = Some(0);
        return result;
    };

    tracing::info!(component = %node.identity, action = invocation.action.kind(), dir = %invocation.dir.display(), "dispatching");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| ctx.executor.execute(&invocation)))
        .unwrap_or_else(|payload| {
            Err(Error::internal_unexpected(format!(
                "executor panicked: {}",
                panic_message(payload.as_ref())
            )))
        });
    result.duration_ms = Some(timer.elapsed().as_millis() as u64);

    match outcome {
        Ok(outcome) if outcome.success => {
            result.diagnostics = outcome.diagnostics;
            result.outputs = outcome.outputs;
            result
        }
        Ok(outcome) => {
            let err = Error::action_execution_failed(
                &node.identity,
                invocation.action.kind(),
                outcome.diagnostics.clone(),
            );
            result.diagnostics = outcome.diagnostics;
            result.fail(&err)
        }
        Err(err) => {
            let reason = err
                .details
                .get("error")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| err.message.clone());
            let wrapped =
                Error::action_execution_failed(&node.identity, invocation.action.kind(), Some(reason));
            let mut failed = result.fail(&wrapped);
            failed.hints.extend(err.hints);
            failed
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn skipped_result(
    tree: &ComponentTree,
    id: ComponentId,
    index: usize,
    blocked_by: Option<ComponentId>,
) -> ComponentResult {
    let node = tree.get(id);
    let mut result =
        ComponentResult::new(&node.identity, node.action.kind(), index, ComponentStatus::Skipped);

    let reason = blocked_by
        .map(|failed| format!("Skipped because '{}' did not succeed", tree.get(failed).identity))
        .unwrap_or_else(|| "Skipped because the run was cancelled".to_string());
    result.warnings.push(reason);
    result
}

fn derive_overall_status(results: &BTreeMap<String, ComponentResult>, cancelled: bool) -> RunStatus {
    let has_success = results
        .values()
        .any(|r| r.status == ComponentStatus::Succeeded);
    let has_failed = results
        .values()
        .any(|r| r.status == ComponentStatus::Failed);

    if has_failed && has_success {
        return RunStatus::PartialSuccess;
    }
    if has_failed {
        return RunStatus::Failed;
    }
    if cancelled {
        return RunStatus::Cancelled;
    }
    RunStatus::Success
}

fn build_summary(results: &BTreeMap<String, ComponentResult>, status: RunStatus) -> RunSummary {
    let count = |status: ComponentStatus| results.values().filter(|r| r.status == status).count();

    let next_actions = match status {
        RunStatus::PartialSuccess | RunStatus::Failed => vec![
            "Fix the failed components and re-run apply (completed actions are re-applied)"
                .to_string(),
        ],
        RunStatus::Cancelled => vec!["Re-run apply to execute the skipped components".to_string()],
        RunStatus::Success => Vec::new(),
    };

    RunSummary {
        total_components: results.len(),
        succeeded: count(ComponentStatus::Succeeded),
        failed: count(ComponentStatus::Failed),
        skipped: count(ComponentStatus::Skipped),
        next_actions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionOutcome, Invocation};
    use crate::config::{ComponentConfig, Kubernetes, Terraform, Var};
    use crate::engine::scheduler;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Records invocations; fails the components listed in `failing` and
    /// panics on those in `panicking`.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        failing: Vec<String>,
        panicking: Vec<String>,
        running: AtomicUsize,
        peak: AtomicUsize,
        delay: Option<Duration>,
        outputs: BTreeMap<String, BTreeMap<String, String>>,
    }

    impl ActionExecutor for Recorder {
        fn execute(&self, invocation: &Invocation) -> Result<ActionOutcome> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            lock(&self.calls).push(invocation.component.clone());
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.panicking.contains(&invocation.component) {
                panic!("boom in {}", invocation.component);
            }

            if self.failing.contains(&invocation.component) {
                return Ok(ActionOutcome::failed("exit status 1"));
            }
            let mut outcome = ActionOutcome::succeeded();
            if let Some(outputs) = self.outputs.get(&invocation.component) {
                outcome.outputs = outputs.clone();
            }
            Ok(outcome)
        }
    }

    fn k8s(needs: &[&str]) -> ComponentConfig {
        ComponentConfig {
            needs: needs.iter().map(|s| s.to_string()).collect(),
            kubernetes: Some(Kubernetes {}),
            ..Default::default()
        }
    }

    fn execute(
        children: Vec<(&str, ComponentConfig)>,
        executor: &Recorder,
        options: &RunOptions,
    ) -> RunResult {
        let root = ComponentConfig {
            components: children.into_iter().collect(),
            ..Default::default()
        };
        let tree = ComponentTree::build(&root, Path::new("/")).unwrap();
        let graph = DependencyGraph::build(&tree).unwrap();
        let plan = scheduler::plan(&tree, &graph).unwrap();
        let outputs = OutputStore::new();
        let ctx = RunContext {
            executor,
            lookup: &outputs,
            outputs: &outputs,
        };
        run(&tree, &graph, &plan, ctx, options).unwrap()
    }

    fn status(result: &RunResult, id: &str) -> ComponentStatus {
        result.get(id).unwrap().status
    }

    #[test]
    fn runs_every_component_in_dependency_order() {
        let recorder = Recorder::default();
        let result = execute(
            vec![("a", k8s(&[])), ("b", k8s(&["a"])), ("c", k8s(&["b"]))],
            &recorder,
            &RunOptions::default(),
        );

        assert!(result.is_success());
        assert_eq!(*lock(&recorder.calls), vec!["a", "b", "c"]);
        assert_eq!(result.summary.succeeded, 3);
        assert_eq!(result.get("c").unwrap().batch, 2);
    }

    #[test]
    fn failure_finishes_current_batch_and_skips_later_ones() {
        let recorder = Recorder {
            failing: vec!["b".to_string()],
            ..Default::default()
        };
        let result = execute(
            vec![
                ("a", k8s(&[])),
                ("b", k8s(&["a"])),
                ("c", k8s(&["a"])),
                ("d", k8s(&["b"])),
                ("e", k8s(&["c"])),
            ],
            &recorder,
            &RunOptions::default(),
        );

        assert_eq!(status(&result, "b"), ComponentStatus::Failed);
        assert_eq!(status(&result, "c"), ComponentStatus::Succeeded);
        assert_eq!(status(&result, "d"), ComponentStatus::Skipped);
        assert_eq!(status(&result, "e"), ComponentStatus::Skipped);
        assert_eq!(
            result.get("d").unwrap().warnings,
            vec!["Skipped because 'b' did not succeed"]
        );
        assert_eq!(
            result.get("e").unwrap().warnings,
            vec!["Skipped because the run was cancelled"]
        );
        assert_eq!(result.status, RunStatus::PartialSuccess);
        assert!(!lock(&recorder.calls).contains(&"d".to_string()));
    }

    #[test]
    fn skip_reason_names_the_failed_component_through_chains() {
        let recorder = Recorder {
            failing: vec!["a".to_string()],
            ..Default::default()
        };
        let result = execute(
            vec![("a", k8s(&[])), ("b", k8s(&["a"])), ("c", k8s(&["b"]))],
            &recorder,
            &RunOptions::default(),
        );

        assert_eq!(
            result.get("c").unwrap().warnings,
            vec!["Skipped because 'a' did not succeed"]
        );
    }

    #[test]
    fn executor_panic_fails_only_that_component() {
        for concurrency in [1, 4] {
            let recorder = Recorder {
                panicking: vec!["c".to_string()],
                ..Default::default()
            };
            let options = RunOptions {
                concurrency,
                ..Default::default()
            };
            let result = execute(
                vec![("a", k8s(&[])), ("b", k8s(&[])), ("c", k8s(&[])), ("d", k8s(&["c"]))],
                &recorder,
                &options,
            );

            assert_eq!(status(&result, "a"), ComponentStatus::Succeeded);
            assert_eq!(status(&result, "b"), ComponentStatus::Succeeded);
            assert_eq!(status(&result, "d"), ComponentStatus::Skipped);
            let c = result.get("c").unwrap();
            assert_eq!(c.status, ComponentStatus::Failed);
            assert_eq!(c.error_code.as_deref(), Some("action.execution_failed"));
            assert_eq!(c.diagnostics.as_deref(), Some("executor panicked: boom in c"));
            assert_eq!(result.status, RunStatus::PartialSuccess);
        }
    }

    #[test]
    fn failed_component_reports_execution_error() {
        let recorder = Recorder {
            failing: vec!["a".to_string()],
            ..Default::default()
        };
        let result = execute(vec![("a", k8s(&[]))], &recorder, &RunOptions::default());
        let a = result.get("a").unwrap();

        assert_eq!(a.error_code.as_deref(), Some("action.execution_failed"));
        assert_eq!(a.diagnostics.as_deref(), Some("exit status 1"));
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.summary.next_actions.len(), 1);
    }

    #[test]
    fn unresolved_variable_fails_only_that_component() {
        let broken = ComponentConfig {
            terraform: Some(Terraform {
                target: "x".to_string(),
                vars: vec![Var {
                    name: "v".to_string(),
                    value_from: Some("nowhere".to_string()),
                    value: None,
                }],
            }),
            ..Default::default()
        };
        let recorder = Recorder::default();
        let result = execute(
            vec![("broken", broken), ("fine", k8s(&[])), ("after", k8s(&["broken"]))],
            &recorder,
            &RunOptions::default(),
        );

        assert_eq!(
            result.get("broken").unwrap().error_code.as_deref(),
            Some("variable.unresolved")
        );
        assert_eq!(status(&result, "fine"), ComponentStatus::Succeeded);
        assert_eq!(status(&result, "after"), ComponentStatus::Skipped);
        assert_eq!(*lock(&recorder.calls), vec!["fine"]);
    }

    #[test]
    fn outputs_feed_later_batches() {
        let consumer = ComponentConfig {
            needs: vec!["producer".to_string()],
            terraform: Some(Terraform {
                target: String::new(),
                vars: vec![Var {
                    name: "image".to_string(),
                    value_from: Some("producer.id".to_string()),
                    value: None,
                }],
            }),
            ..Default::default()
        };
        let mut outputs = BTreeMap::new();
        outputs.insert(
            "producer".to_string(),
            [("id".to_string(), "sha256:abc".to_string())].into_iter().collect(),
        );
        let recorder = Recorder {
            outputs,
            ..Default::default()
        };

        let result = execute(
            vec![("producer", k8s(&[])), ("consumer", consumer)],
            &recorder,
            &RunOptions::default(),
        );
        assert!(result.is_success());
        assert_eq!(result.get("producer").unwrap().outputs["id"], "sha256:abc");
    }

    #[test]
    fn grouping_nodes_succeed_without_dispatch() {
        let group = ComponentConfig {
            components: vec![("api", k8s(&[]))].into_iter().collect(),
            ..Default::default()
        };
        let recorder = Recorder::default();
        let result = execute(vec![("app", group)], &recorder, &RunOptions::default());

        assert_eq!(status(&result, "app"), ComponentStatus::Succeeded);
        assert_eq!(result.get("app").unwrap().action, "none");
        assert_eq!(*lock(&recorder.calls), vec!["app.api"]);
    }

    #[test]
    fn concurrency_limit_bounds_parallel_workers() {
        let recorder = Recorder {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let options = RunOptions {
            concurrency: 2,
            ..Default::default()
        };
        let result = execute(
            vec![("a", k8s(&[])), ("b", k8s(&[])), ("c", k8s(&[])), ("d", k8s(&[])), ("e", k8s(&[]))],
            &recorder,
            &options,
        );

        assert!(result.is_success());
        assert!(recorder.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(lock(&recorder.calls).len(), 5);
    }

    #[test]
    fn external_cancellation_skips_everything() {
        let options = RunOptions::default();
        options.cancellation.cancel();
        let recorder = Recorder::default();
        let result = execute(vec![("a", k8s(&[])), ("b", k8s(&["a"]))], &recorder, &options);

        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.summary.skipped, 2);
        assert!(lock(&recorder.calls).is_empty());
    }

    #[test]
    fn results_serialize_keyed_by_identity() {
        let recorder = Recorder::default();
        let result = execute(vec![("a", k8s(&[]))], &recorder, &RunOptions::default());
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["status"], "success");
        assert_eq!(json["components"]["a"]["status"], "succeeded");
        assert_eq!(json["components"]["a"]["action"], "kubernetes");
        assert_eq!(json["summary"]["totalComponents"], 1);
    }
}

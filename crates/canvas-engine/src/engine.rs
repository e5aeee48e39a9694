//! Workflow execution engine
//!
//! Validates a canvas, orders its blocks and runs them one by one. Each
//! block gets its references substituted, is handed to the executor under
//! the retry policy of whatever error category it fails with, and ends
//! `completed`, `failed` or `skipped`. A failed block never stops the run;
//! only graph-time errors and cancellation do.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::classify::{ErrorClassifier, ErrorInfo, ErrorKind, ExecutionContext};
use crate::config::{EngineConfig, UpstreamFailurePolicy};
use crate::cycle::detect_cycles;
use crate::error::{BlockError, CanvasEngineError, GraphError, Result};
use crate::error_log::ErrorLog;
use crate::events::{EventSink, NullEventSink, WorkflowEvent};
use crate::executor::{BlockExecutor, BlockOutput};
use crate::graph::DependencyGraph;
use crate::registry::{ControlSignal, ExecutionRegistry, ExecutionSnapshot};
use crate::resolver::{referenced_labels, resolve_references, ReferenceState};
use crate::scheduler::{schedule, Schedule};
use crate::types::{
    Block, BlockResult, BlockStatus, CanvasState, ExecutionResult, ExecutionStatistics,
    WorkflowStatus,
};

/// Validated graph and its execution order
struct Plan {
    graph: DependencyGraph,
    schedule: Schedule,
}

fn build_plan(canvas: &CanvasState) -> std::result::Result<Plan, GraphError> {
    let graph = DependencyGraph::build(&canvas.blocks, &canvas.connections)?;
    detect_cycles(&graph)?;
    let schedule = schedule(&graph)?;
    Ok(Plan { graph, schedule })
}

/// A run driven on its own tokio task
pub struct ExecutionHandle {
    pub execution_id: String,
    pub join: JoinHandle<ExecutionResult>,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Wait for the run to finish
    pub async fn wait(self) -> Result<ExecutionResult> {
        self.join
            .await
            .map_err(|e| CanvasEngineError::TaskFailed(e.to_string()))
    }
}

/// Per-run bookkeeping. Lives only as long as one run.
struct RunState<'c> {
    statuses: HashMap<&'c str, BlockStatus>,
    outputs: HashMap<&'c str, BlockOutput>,
    /// Block label to block id; the first block carrying a label wins
    labels: HashMap<&'c str, &'c str>,
}

impl<'c> RunState<'c> {
    fn new(canvas: &'c CanvasState) -> Self {
        let mut labels = HashMap::new();
        for block in &canvas.blocks {
            if !block.number.is_empty() {
                labels.entry(block.number.as_str()).or_insert(block.id.as_str());
            }
        }
        Self {
            // Whatever status the snapshot carries, every block starts idle.
            statuses: canvas
                .blocks
                .iter()
                .map(|b| (b.id.as_str(), BlockStatus::Idle))
                .collect(),
            outputs: HashMap::new(),
            labels,
        }
    }

    fn status(&self, block_id: &str) -> BlockStatus {
        self.statuses.get(block_id).copied().unwrap_or_default()
    }

    fn set_status(&mut self, block_id: &str, next: BlockStatus) {
        if let Some(status) = self.statuses.get_mut(block_id) {
            debug_assert!(
                status.can_transition_to(next),
                "block {} cannot go from {:?} to {:?}",
                block_id,
                status,
                next
            );
            *status = next;
        }
    }

    fn reference(&self, label: &str) -> Option<ReferenceState<'_>> {
        let block_id = *self.labels.get(label)?;
        Some(match self.outputs.get(block_id) {
            Some(output) => ReferenceState::Available(output.reference_text()),
            None => ReferenceState::Pending(self.status(block_id)),
        })
    }

    /// Why `block` must be skipped because something it depends on
    /// failed or was skipped
    fn upstream_failure(&self, block: &Block, graph: &DependencyGraph) -> Option<String> {
        for upstream in graph.predecessors(&block.id) {
            if let Some(outcome) = bad_outcome(self.status(upstream)) {
                return Some(format!("upstream block '{}' {}", upstream, outcome));
            }
        }
        for label in referenced_labels(&block.content) {
            if let Some(&upstream) = self.labels.get(label) {
                if let Some(outcome) = bad_outcome(self.status(upstream)) {
                    return Some(format!(
                        "referenced block '{}' [{}] {}",
                        upstream, label, outcome
                    ));
                }
            }
        }
        None
    }
}

fn bad_outcome(status: BlockStatus) -> Option<&'static str> {
    match status {
        BlockStatus::Failed => Some("failed"),
        BlockStatus::Skipped => Some("was skipped"),
        _ => None,
    }
}

/// Wait out a paused run. Returns false once cancellation is requested.
async fn await_clearance(
    execution_id: &str,
    control: &mut watch::Receiver<ControlSignal>,
) -> bool {
    let mut parked = false;
    loop {
        let signal = *control.borrow_and_update();
        match signal {
            ControlSignal::Run => {
                if parked {
                    log::info!("Execution {} continuing", execution_id);
                }
                return true;
            }
            ControlSignal::Cancel => return false,
            ControlSignal::Pause => {
                if !parked {
                    log::info!("Execution {} parked until resumed", execution_id);
                    parked = true;
                }
                if control.changed().await.is_err() {
                    return true;
                }
            }
        }
    }
}

/// Sleep for a retry delay. Returns false if cancellation ended the sleep.
async fn backoff(delay: Duration, control: &mut watch::Receiver<ControlSignal>) -> bool {
    if *control.borrow() == ControlSignal::Cancel {
        return false;
    }
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = control.changed() => {
                if changed.is_err() {
                    (&mut sleep).await;
                    return true;
                }
                if *control.borrow() == ControlSignal::Cancel {
                    return false;
                }
            }
        }
    }
}

/// Runs canvas workflows against a block executor
pub struct ExecutionEngine {
    executor: Arc<dyn BlockExecutor>,
    config: EngineConfig,
    classifier: ErrorClassifier,
    registry: Arc<ExecutionRegistry>,
    error_log: Arc<ErrorLog>,
    /// Set once `with_error_log` supplied the log
    shared_error_log: bool,
    event_sink: Arc<dyn EventSink>,
}

impl ExecutionEngine {
    /// Create an engine with the default configuration
    pub fn new(executor: Arc<dyn BlockExecutor>) -> Self {
        let config = EngineConfig::default();
        Self {
            executor,
            error_log: Arc::new(ErrorLog::new(config.error_log_capacity)),
            shared_error_log: false,
            config,
            classifier: ErrorClassifier::new(),
            registry: Arc::new(ExecutionRegistry::new()),
            event_sink: Arc::new(NullEventSink),
        }
    }

    /// Replace the configuration.
    ///
    /// The engine's own error log is recreated at the configured capacity.
    /// A log passed to `with_error_log` is kept whatever the call order.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        if !self.shared_error_log {
            self.error_log = Arc::new(ErrorLog::new(config.error_log_capacity));
        }
        self.config = config;
        self
    }

    pub fn with_event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    /// Share an execution registry with other engines
    pub fn with_registry(mut self, registry: Arc<ExecutionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_error_log(mut self, error_log: Arc<ErrorLog>) -> Self {
        self.error_log = error_log;
        self.shared_error_log = true;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    pub fn error_log(&self) -> &Arc<ErrorLog> {
        &self.error_log
    }

    /// Run a workflow to completion under a fresh execution id.
    ///
    /// Graph errors (missing blocks, cycles, duplicate ids) are returned
    /// before anything runs. Block failures are reported in the result.
    pub async fn execute_workflow(&self, canvas: &CanvasState) -> Result<ExecutionResult> {
        self.execute_workflow_with_id(Uuid::new_v4().to_string(), canvas)
            .await
    }

    /// Run a workflow under a caller-chosen execution id
    pub async fn execute_workflow_with_id(
        &self,
        execution_id: impl Into<String>,
        canvas: &CanvasState,
    ) -> Result<ExecutionResult> {
        let execution_id = execution_id.into();
        let plan = self.plan(canvas)?;
        let control = self.register(&execution_id, &plan).await?;
        Ok(self.drive(&execution_id, canvas, &plan, control).await)
    }

    /// Validate and register a workflow, then run it on a tokio task.
    ///
    /// The returned id can be used with the control methods while the
    /// run is in flight.
    pub async fn spawn_workflow(self: Arc<Self>, canvas: CanvasState) -> Result<ExecutionHandle> {
        let plan = self.plan(&canvas)?;
        let execution_id = Uuid::new_v4().to_string();
        let control = self.register(&execution_id, &plan).await?;

        let engine = Arc::clone(&self);
        let id = execution_id.clone();
        let join = tokio::spawn(async move { engine.drive(&id, &canvas, &plan, control).await });

        Ok(ExecutionHandle { execution_id, join })
    }

    pub async fn get_execution_status(&self, execution_id: &str) -> Option<WorkflowStatus> {
        self.registry.status(execution_id).await
    }

    pub async fn execution_snapshot(&self, execution_id: &str) -> Option<ExecutionSnapshot> {
        self.registry.snapshot(execution_id).await
    }

    /// Pause a running execution before its next block starts.
    ///
    /// Returns whether the request was accepted; unknown or finished ids
    /// are ignored.
    pub async fn pause_execution(&self, execution_id: &str) -> bool {
        let accepted = self.registry.pause(execution_id).await;
        if accepted {
            log::info!("Pause requested for execution {}", execution_id);
            self.emit(WorkflowEvent::WorkflowPaused {
                execution_id: execution_id.to_string(),
            });
        } else {
            log::debug!("Ignoring pause for execution {}", execution_id);
        }
        accepted
    }

    pub async fn resume_execution(&self, execution_id: &str) -> bool {
        let accepted = self.registry.resume(execution_id).await;
        if accepted {
            log::info!("Resume requested for execution {}", execution_id);
            self.emit(WorkflowEvent::WorkflowResumed {
                execution_id: execution_id.to_string(),
            });
        } else {
            log::debug!("Ignoring resume for execution {}", execution_id);
        }
        accepted
    }

    /// Cancel an execution. Blocks that have not started are skipped; a
    /// block already running is allowed to finish but is not retried.
    pub async fn cancel_execution(&self, execution_id: &str) -> bool {
        let accepted = self.registry.cancel(execution_id).await;
        if accepted {
            log::info!("Cancellation requested for execution {}", execution_id);
        } else {
            log::debug!("Ignoring cancel for execution {}", execution_id);
        }
        accepted
    }

    /// Forget finished executions older than `max_age`
    pub async fn cleanup_finished(&self, max_age: Duration) -> usize {
        self.registry.cleanup_finished(max_age).await
    }

    fn plan(&self, canvas: &CanvasState) -> Result<Plan> {
        build_plan(canvas).map_err(|err| {
            log::error!("Workflow rejected: {}", err);
            CanvasEngineError::from(err)
        })
    }

    async fn register(
        &self,
        execution_id: &str,
        plan: &Plan,
    ) -> Result<watch::Receiver<ControlSignal>> {
        self.registry
            .register(execution_id, &plan.schedule.order())
            .await
            .ok_or_else(|| CanvasEngineError::DuplicateExecution(execution_id.to_string()))
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Err(e) = self.event_sink.send(event) {
            log::warn!("Failed to send workflow event: {}", e);
        }
    }

    async fn drive(
        &self,
        execution_id: &str,
        canvas: &CanvasState,
        plan: &Plan,
        mut control: watch::Receiver<ControlSignal>,
    ) -> ExecutionResult {
        let started = Instant::now();
        let mut run = RunState::new(canvas);
        let mut results = Vec::with_capacity(plan.schedule.len());
        let mut cancelled = false;

        log::info!(
            "Starting workflow execution {} with {} blocks",
            execution_id,
            plan.schedule.len()
        );
        self.emit(WorkflowEvent::WorkflowStarted {
            execution_id: execution_id.to_string(),
            total_blocks: plan.schedule.len(),
        });

        for scheduled in &plan.schedule.blocks {
            let block_id = scheduled.block_id.as_str();
            let order = scheduled.execution_order;

            if !cancelled && !await_clearance(execution_id, &mut control).await {
                log::info!("Execution {} cancelled before block '{}'", execution_id, block_id);
                cancelled = true;
            }
            if cancelled {
                let result = self
                    .skip_block(execution_id, &mut run, block_id, order, "execution cancelled")
                    .await;
                results.push(result);
                continue;
            }

            let block = &canvas.blocks[scheduled.block_index];

            if self.config.upstream_failure == UpstreamFailurePolicy::SkipDependents {
                if let Some(reason) = run.upstream_failure(block, &plan.graph) {
                    let result = self
                        .skip_block(execution_id, &mut run, block_id, order, &reason)
                        .await;
                    results.push(result);
                    continue;
                }
            }

            let (result, interrupted) = self
                .run_block(execution_id, block, order, &mut run, &mut control)
                .await;
            results.push(result);
            if interrupted {
                cancelled = true;
            }
        }

        if !cancelled && *control.borrow() == ControlSignal::Cancel {
            log::info!("Execution {} cancelled during its final block", execution_id);
            cancelled = true;
        }
        let requested = if cancelled {
            WorkflowStatus::Cancelled
        } else {
            WorkflowStatus::Completed
        };
        // A cancel accepted between the check above and here is settled by the registry.
        let status = self.registry.finish(execution_id, requested).await;
        let cancelled = status == WorkflowStatus::Cancelled;
        let statistics =
            ExecutionStatistics::from_results(&results, started.elapsed().as_millis() as u64);

        log::info!(
            "Workflow execution {} {:?}: {} completed, {} failed, {} skipped in {}ms",
            execution_id,
            status,
            statistics.completed_blocks,
            statistics.failed_blocks,
            statistics.skipped_blocks,
            statistics.total_execution_time
        );
        let event = if cancelled {
            WorkflowEvent::WorkflowCancelled {
                execution_id: execution_id.to_string(),
                statistics: statistics.clone(),
            }
        } else {
            WorkflowEvent::WorkflowCompleted {
                execution_id: execution_id.to_string(),
                statistics: statistics.clone(),
            }
        };
        self.emit(event);

        ExecutionResult {
            execution_id: execution_id.to_string(),
            status,
            results,
            statistics,
        }
    }

    async fn skip_block(
        &self,
        execution_id: &str,
        run: &mut RunState<'_>,
        block_id: &str,
        order: usize,
        reason: &str,
    ) -> BlockResult {
        log::info!("Skipping block '{}': {}", block_id, reason);
        run.set_status(block_id, BlockStatus::Skipped);
        self.registry
            .set_block_status(execution_id, block_id, BlockStatus::Skipped)
            .await;
        self.emit(WorkflowEvent::BlockSkipped {
            execution_id: execution_id.to_string(),
            block_id: block_id.to_string(),
            reason: reason.to_string(),
        });
        BlockResult::skipped(block_id, order, reason)
    }

    /// Bound one executor call by the configured block timeout
    async fn invoke(
        &self,
        block: &Block,
        content: &str,
    ) -> std::result::Result<BlockOutput, BlockError> {
        match self.config.block_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.executor.execute(block, content))
                .await
                .unwrap_or_else(|_| {
                    Err(BlockError::classified(
                        ErrorKind::Timeout,
                        format!("Block execution timed out after {}ms", limit.as_millis()),
                    ))
                }),
            None => self.executor.execute(block, content).await,
        }
    }

    /// Run one block under its retry policy.
    ///
    /// The flag is true when cancellation cut a retry backoff short.
    async fn run_block<'c>(
        &self,
        execution_id: &str,
        block: &'c Block,
        order: usize,
        run: &mut RunState<'c>,
        control: &mut watch::Receiver<ControlSignal>,
    ) -> (BlockResult, bool) {
        let started = Instant::now();
        run.set_status(&block.id, BlockStatus::Running);
        self.registry
            .set_block_status(execution_id, &block.id, BlockStatus::Running)
            .await;
        self.emit(WorkflowEvent::BlockStarted {
            execution_id: execution_id.to_string(),
            block_id: block.id.clone(),
            execution_order: order,
        });
        log::info!("Executing {} block '{}' (#{})", block.block_type, block.id, order);

        let state: &RunState<'c> = run;
        let resolved = resolve_references(&block.content, move |label| state.reference(label));
        let mut warnings = Vec::with_capacity(resolved.unresolved.len());
        for token in &resolved.unresolved {
            log::warn!("Block '{}': {}", block.id, token.warning());
            self.emit(WorkflowEvent::ReferenceUnresolved {
                execution_id: execution_id.to_string(),
                block_id: block.id.clone(),
                token: token.token.clone(),
                reason: token.reason.to_string(),
            });
            warnings.push(token.warning());
        }

        let mut attempt: u32 = 0;
        let mut interrupted = false;
        let outcome: std::result::Result<BlockOutput, ErrorInfo> = loop {
            let error = match self.invoke(block, &resolved.text).await {
                Ok(output) => break Ok(output),
                Err(error) => error,
            };

            let classification = self.classifier.classify(&error);
            let info = self.classifier.error_info(
                &error,
                ExecutionContext {
                    execution_id: execution_id.to_string(),
                    block_id: block.id.clone(),
                    operation: format!("execute_{}", block.block_type),
                    attempt,
                },
            );
            self.error_log.record(info.clone());

            let decision = self.config.retry.decide(classification, attempt);
            if !decision.should_retry {
                break Err(info);
            }

            log::warn!(
                "Block '{}' failed with {} error: {}. Retry {} in {}ms",
                block.id,
                info.kind,
                info.message,
                attempt + 1,
                decision.delay.as_millis()
            );
            self.emit(WorkflowEvent::BlockRetrying {
                execution_id: execution_id.to_string(),
                block_id: block.id.clone(),
                attempt: attempt + 1,
                delay_ms: decision.delay.as_millis() as u64,
                error: info.clone(),
            });

            if !backoff(decision.delay, control).await {
                log::info!("Retries of block '{}' stopped by cancellation", block.id);
                interrupted = true;
                break Err(info);
            }
            attempt += 1;
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(output) => {
                run.set_status(&block.id, BlockStatus::Completed);
                self.registry
                    .set_block_status(execution_id, &block.id, BlockStatus::Completed)
                    .await;
                log::info!("Block '{}' completed in {}ms", block.id, duration_ms);
                self.emit(WorkflowEvent::BlockCompleted {
                    execution_id: execution_id.to_string(),
                    block_id: block.id.clone(),
                    duration_ms,
                    retry_count: attempt,
                });
                let result = BlockResult {
                    block_id: block.id.clone(),
                    execution_order: order,
                    status: BlockStatus::Completed,
                    input: resolved.text,
                    output: Some(output.output.clone()),
                    output_url: output.output_url.clone(),
                    error: None,
                    skip_reason: None,
                    warnings,
                    duration_ms,
                    retry_count: attempt,
                };
                run.outputs.insert(block.id.as_str(), output);
                result
            }
            Err(info) => {
                run.set_status(&block.id, BlockStatus::Failed);
                self.registry
                    .set_block_status(execution_id, &block.id, BlockStatus::Failed)
                    .await;
                log::error!(
                    "Block '{}' failed after {} attempt(s): [{}] {}",
                    block.id,
                    attempt + 1,
                    info.kind,
                    info.message
                );
                self.emit(WorkflowEvent::BlockFailed {
                    execution_id: execution_id.to_string(),
                    block_id: block.id.clone(),
                    error: info.clone(),
                });
                BlockResult {
                    block_id: block.id.clone(),
                    execution_order: order,
                    status: BlockStatus::Failed,
                    input: resolved.text,
                    output: None,
                    output_url: None,
                    error: Some(info),
                    skip_reason: None,
                    warnings,
                    duration_ms,
                    retry_count: attempt,
                }
            }
        };
        (result, interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CanvasBuilder;
    use crate::events::{ChannelEventSink, VecEventSink};
    use crate::executor::DryRunExecutor;
    use crate::retry::{RetryPolicies, RetryPolicy};
    use crate::types::BlockType;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;

    type ExecResult = std::result::Result<BlockOutput, BlockError>;

    /// Executor backed by a plain function
    struct FnExecutor<F>(F);

    #[async_trait]
    impl<F> BlockExecutor for FnExecutor<F>
    where
        F: Fn(&Block, &str) -> ExecResult + Send + Sync,
    {
        async fn execute(&self, block: &Block, content: &str) -> ExecResult {
            (self.0)(block, content)
        }
    }

    /// Blocks inside the executor for one block id until released
    struct GateExecutor {
        gated: &'static str,
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl BlockExecutor for GateExecutor {
        async fn execute(&self, block: &Block, content: &str) -> ExecResult {
            if block.id == self.gated {
                self.started.notify_one();
                self.release.notified().await;
            }
            Ok(BlockOutput::text(content))
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig::default().with_retry(RetryPolicies::without_delays())
    }

    fn dry_engine() -> ExecutionEngine {
        ExecutionEngine::new(Arc::new(DryRunExecutor)).with_config(fast_config())
    }

    /// Fails every block whose content mentions FAIL
    fn failing_engine() -> ExecutionEngine {
        let executor = FnExecutor(|block: &Block, content: &str| {
            if block.content.contains("FAIL") {
                Err(BlockError::message("Mock execution error"))
            } else {
                Ok(BlockOutput::text(content))
            }
        });
        ExecutionEngine::new(Arc::new(executor)).with_config(fast_config())
    }

    fn order(result: &ExecutionResult) -> Vec<&str> {
        result.results.iter().map(|r| r.block_id.as_str()).collect()
    }

    async fn wait_for_block(engine: &ExecutionEngine, id: &str, block: &str, status: BlockStatus) {
        for _ in 0..200 {
            let snapshot = engine.execution_snapshot(id).await.unwrap();
            if snapshot.blocks.iter().any(|b| b.block_id == block && b.status == status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("block {} never reached {:?}", block, status);
    }

    #[tokio::test]
    async fn test_linear_chain() {
        let canvas = CanvasBuilder::new()
            .add_text("c", "third")
            .add_text("a", "first")
            .add_text("b", "second")
            .connect("a", "b")
            .connect("b", "c")
            .build();

        let result = dry_engine().execute_workflow(&canvas).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(order(&result), vec!["a", "b", "c"]);
        for (i, block) in result.results.iter().enumerate() {
            assert_eq!(block.execution_order, i);
            assert_eq!(block.status, BlockStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_diamond() {
        let canvas = CanvasBuilder::new()
            .add_text("a", "root")
            .add_text("b", "left")
            .add_text("c", "right")
            .add_text("d", "join")
            .connect("a", "b")
            .connect("a", "c")
            .connect("b", "d")
            .connect("c", "d")
            .build();

        let result = dry_engine().execute_workflow(&canvas).await.unwrap();
        let order = order(&result);

        assert_eq!(order.first(), Some(&"a"));
        assert_eq!(order.last(), Some(&"d"));
        assert_eq!(result.statistics.completed_blocks, 4);
    }

    #[tokio::test]
    async fn test_self_loop_rejected_without_side_effects() {
        let canvas = CanvasBuilder::new()
            .add_text("a", "loop")
            .connect("a", "a")
            .build();
        let sink = Arc::new(VecEventSink::new());
        let engine = dry_engine().with_event_sink(sink.clone());

        let err = engine.execute_workflow(&canvas).await.unwrap_err();

        assert!(matches!(
            err,
            CanvasEngineError::Graph(GraphError::CircularDependency { .. })
        ));
        assert_eq!(engine.registry().len().await, 0);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_rejected() {
        let canvas = CanvasBuilder::new()
            .add_text("a", "1")
            .add_text("b", "2")
            .add_text("c", "3")
            .connect("a", "b")
            .connect("b", "c")
            .connect("c", "b")
            .build();

        match dry_engine().execute_workflow(&canvas).await.unwrap_err() {
            CanvasEngineError::Graph(GraphError::CircularDependency { block_ids }) => {
                assert_eq!(block_ids, vec!["b", "c"]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_block_rejected() {
        let canvas = CanvasBuilder::new()
            .add_text("a", "1")
            .connect("a", "ghost")
            .build();

        let err = dry_engine().execute_workflow(&canvas).await.unwrap_err();
        assert!(matches!(
            err,
            CanvasEngineError::Graph(GraphError::MissingBlock { ref block_id, .. }) if block_id == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_fifty_independent_blocks() {
        let mut builder = CanvasBuilder::new();
        for i in 0..50 {
            builder = builder.add_text(format!("block-{}", i), format!("prompt {}", i));
        }
        let canvas = builder.build();

        let started = Instant::now();
        let result = dry_engine().execute_workflow(&canvas).await.unwrap();

        assert_eq!(result.statistics.total_blocks, 50);
        assert_eq!(result.statistics.completed_blocks, 50);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_block_failure_is_isolated() {
        let canvas = CanvasBuilder::new()
            .add_text("ok-1", "fine")
            .add_text("bad", "FAIL please")
            .add_text("ok-2", "also fine")
            .build();

        let engine = failing_engine();
        let result = engine.execute_workflow(&canvas).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Completed);
        let bad = result.block("bad").unwrap();
        assert_eq!(bad.status, BlockStatus::Failed);
        let error = bad.error.as_ref().unwrap();
        assert_eq!(error.message, "Mock execution error");
        assert_eq!(error.kind, ErrorKind::System);
        assert_eq!(error.context.operation, "execute_text");
        // system errors get one retry
        assert_eq!(bad.retry_count, 1);

        assert_eq!(result.statistics.completed_blocks, 2);
        assert_eq!(result.statistics.failed_blocks, 1);
        assert_eq!(engine.error_log().for_execution(&result.execution_id).len(), 2);
    }

    #[tokio::test]
    async fn test_recoverable_error_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let executor = FnExecutor(move |_block: &Block, content: &str| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BlockError::message("connection reset by peer"))
            } else {
                Ok(BlockOutput::text(content))
            }
        });
        let sink = Arc::new(VecEventSink::new());
        let engine = ExecutionEngine::new(Arc::new(executor))
            .with_config(fast_config())
            .with_event_sink(sink.clone());

        let canvas = CanvasBuilder::new().add_text("a", "hello").build();
        let result = engine.execute_workflow(&canvas).await.unwrap();

        let block = result.block("a").unwrap();
        assert_eq!(block.status, BlockStatus::Completed);
        assert_eq!(block.retry_count, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let retries: Vec<u32> = sink
            .events()
            .iter()
            .filter_map(|e| match e {
                WorkflowEvent::BlockRetrying { attempt, error, .. } => {
                    assert_eq!(error.kind, ErrorKind::Network);
                    Some(*attempt)
                }
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_retries_stop_at_policy_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let executor = FnExecutor(move |_block: &Block, _content: &str| -> ExecResult {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(BlockError::message("ECONNREFUSED"))
        });
        let engine = ExecutionEngine::new(Arc::new(executor)).with_config(fast_config());

        let canvas = CanvasBuilder::new().add_text("a", "hello").build();
        let result = engine.execute_workflow(&canvas).await.unwrap();

        // network: 5 retries after the first attempt
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(result.block("a").unwrap().retry_count, 5);
        assert_eq!(result.block("a").unwrap().status, BlockStatus::Failed);
    }

    #[tokio::test]
    async fn test_shared_error_log_survives_config() {
        let shared = Arc::new(ErrorLog::new(10));
        let executor = FnExecutor(|_: &Block, _: &str| -> ExecResult {
            Err(BlockError::message("Mock execution error"))
        });
        let engine = ExecutionEngine::new(Arc::new(executor))
            .with_error_log(shared.clone())
            .with_config(fast_config().with_retry(RetryPolicies::disabled()));
        assert!(Arc::ptr_eq(engine.error_log(), &shared));

        let canvas = CanvasBuilder::new().add_text("a", "1").build();
        engine.execute_workflow(&canvas).await.unwrap();
        assert_eq!(shared.len(), 1);
    }

    #[tokio::test]
    async fn test_validation_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let executor = FnExecutor(move |_block: &Block, _content: &str| -> ExecResult {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(BlockError::Http {
                status: 422,
                message: "prompt is required".into(),
            })
        });
        let engine = ExecutionEngine::new(Arc::new(executor)).with_config(fast_config());

        let canvas = CanvasBuilder::new().add_text("a", "").build();
        let result = engine.execute_workflow(&canvas).await.unwrap();

        let block = result.block("a").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(block.retry_count, 0);
        let error = block.error.as_ref().unwrap();
        assert_eq!(error.kind, ErrorKind::Validation);
        assert!(!error.recoverable);
    }

    #[tokio::test]
    async fn test_reference_substitution() {
        let canvas = CanvasBuilder::new()
            .add_block("story", BlockType::Text, "A01", "a fox in the snow")
            .add_block("art", BlockType::Image, "B01", "Illustrate [A01]")
            .add_block("summary", BlockType::Text, "A02", "Story: [A01] / Art: [B01]")
            .connect("story", "art")
            .connect("art", "summary")
            .build();

        let result = dry_engine().execute_workflow(&canvas).await.unwrap();

        assert_eq!(result.block("art").unwrap().input, "Illustrate a fox in the snow");
        assert_eq!(
            result.block("summary").unwrap().output.as_deref(),
            Some("Story: a fox in the snow / Art: dry-run://image/art")
        );
        assert!(result.block("summary").unwrap().warnings.is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_token_left_literal() {
        let sink = Arc::new(VecEventSink::new());
        let engine = dry_engine().with_event_sink(sink.clone());
        let canvas = CanvasBuilder::new()
            .add_text("a", "Describe [Z99] in detail")
            .build();

        let result = engine.execute_workflow(&canvas).await.unwrap();
        let block = result.block("a").unwrap();

        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(block.status, BlockStatus::Completed);
        assert_eq!(block.output.as_deref(), Some("Describe [Z99] in detail"));
        assert_eq!(block.warnings.len(), 1);
        assert!(sink.events().iter().any(|e| matches!(
            e,
            WorkflowEvent::ReferenceUnresolved { token, .. } if token == "[Z99]"
        )));
    }

    #[tokio::test]
    async fn test_failed_upstream_attempted_by_default() {
        let canvas = CanvasBuilder::new()
            .add_block("a", BlockType::Text, "A01", "FAIL")
            .add_block("b", BlockType::Text, "A02", "Continue from [A01]")
            .connect("a", "b")
            .build();

        let result = failing_engine().execute_workflow(&canvas).await.unwrap();
        let b = result.block("b").unwrap();

        assert_eq!(result.block("a").unwrap().status, BlockStatus::Failed);
        assert_eq!(b.status, BlockStatus::Completed);
        assert_eq!(b.output.as_deref(), Some("Continue from [A01]"));
        assert_eq!(b.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_skip_dependents_policy() {
        let canvas = CanvasBuilder::new()
            .add_block("a", BlockType::Text, "A01", "FAIL")
            .add_block("b", BlockType::Text, "A02", "after a")
            .add_block("c", BlockType::Text, "A03", "after b")
            .add_block("d", BlockType::Text, "A04", "mentions [A01] only")
            .add_block("e", BlockType::Text, "A05", "independent")
            .connect("a", "b")
            .connect("b", "c")
            .build();
        let engine = failing_engine().with_config(
            fast_config().with_upstream_failure(UpstreamFailurePolicy::SkipDependents),
        );

        let result = engine.execute_workflow(&canvas).await.unwrap();

        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(result.block("a").unwrap().status, BlockStatus::Failed);
        let b = result.block("b").unwrap();
        assert_eq!(b.status, BlockStatus::Skipped);
        assert_eq!(b.skip_reason.as_deref(), Some("upstream block 'a' failed"));
        assert_eq!(result.block("c").unwrap().status, BlockStatus::Skipped);
        assert_eq!(result.block("d").unwrap().status, BlockStatus::Skipped);
        assert_eq!(result.block("e").unwrap().status, BlockStatus::Completed);
        assert_eq!(result.statistics.skipped_blocks, 3);
    }

    #[tokio::test]
    async fn test_block_timeout() {
        struct Slow;

        #[async_trait]
        impl BlockExecutor for Slow {
            async fn execute(&self, _block: &Block, _content: &str) -> ExecResult {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(BlockOutput::default())
            }
        }

        let config = fast_config()
            .with_block_timeout(Duration::from_millis(20))
            .with_retry(
                RetryPolicies::without_delays()
                    .with_policy(ErrorKind::Timeout, RetryPolicy::exponential(1, 0)),
            );
        let engine = ExecutionEngine::new(Arc::new(Slow)).with_config(config);
        let canvas = CanvasBuilder::new().add_text("a", "slow").build();

        let result = engine.execute_workflow(&canvas).await.unwrap();
        let block = result.block("a").unwrap();

        assert_eq!(block.status, BlockStatus::Failed);
        assert_eq!(block.retry_count, 1);
        assert_eq!(block.error.as_ref().unwrap().kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_input_status_ignored_and_canvas_untouched() {
        let mut canvas = CanvasBuilder::new().add_text("a", "hi").build();
        canvas.blocks[0].status = BlockStatus::Completed;

        let result = dry_engine().execute_workflow(&canvas).await.unwrap();

        assert_eq!(result.block("a").unwrap().status, BlockStatus::Completed);
        assert_eq!(result.block("a").unwrap().output.as_deref(), Some("hi"));
        assert_eq!(canvas.blocks[0].status, BlockStatus::Completed);
    }

    #[tokio::test]
    async fn test_controls_on_unknown_id_are_noops() {
        let engine = dry_engine();
        assert!(!engine.pause_execution("missing").await);
        assert!(!engine.resume_execution("missing").await);
        assert!(!engine.cancel_execution("missing").await);
        assert_eq!(engine.get_execution_status("missing").await, None);
        assert!(engine.execution_snapshot("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_status_polling_and_cleanup() {
        let engine = dry_engine();
        let canvas = CanvasBuilder::new().add_text("a", "hi").build();

        let result = engine.execute_workflow(&canvas).await.unwrap();
        assert_eq!(
            engine.get_execution_status(&result.execution_id).await,
            Some(WorkflowStatus::Completed)
        );
        assert!(!engine.cancel_execution(&result.execution_id).await);

        assert_eq!(engine.cleanup_finished(Duration::ZERO).await, 1);
        assert_eq!(engine.get_execution_status(&result.execution_id).await, None);
    }

    #[tokio::test]
    async fn test_duplicate_execution_id() {
        let engine = dry_engine();
        let canvas = CanvasBuilder::new().add_text("a", "hi").build();

        engine.execute_workflow_with_id("run-1", &canvas).await.unwrap();
        let err = engine
            .execute_workflow_with_id("run-1", &canvas)
            .await
            .unwrap_err();
        assert!(matches!(err, CanvasEngineError::DuplicateExecution(ref id) if id == "run-1"));
    }

    #[tokio::test]
    async fn test_cancel_skips_unstarted_blocks() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let executor = GateExecutor {
            gated: "a",
            started: started.clone(),
            release: release.clone(),
        };
        let engine = Arc::new(ExecutionEngine::new(Arc::new(executor)).with_config(fast_config()));
        let canvas = CanvasBuilder::new()
            .add_text("a", "1")
            .add_text("b", "2")
            .add_text("c", "3")
            .connect("a", "b")
            .connect("b", "c")
            .build();

        let handle = engine.clone().spawn_workflow(canvas).await.unwrap();
        let id = handle.execution_id.clone();
        started.notified().await;

        assert!(engine.cancel_execution(&id).await);
        release.notify_one();

        let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.status, WorkflowStatus::Cancelled);
        assert_eq!(result.block("a").unwrap().status, BlockStatus::Completed);
        assert_eq!(result.block("b").unwrap().status, BlockStatus::Skipped);
        assert_eq!(result.block("c").unwrap().status, BlockStatus::Skipped);
        assert_eq!(result.results.len(), 3);
        assert_eq!(
            engine.get_execution_status(&id).await,
            Some(WorkflowStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_cancel_during_final_block() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let executor = GateExecutor {
            gated: "last",
            started: started.clone(),
            release: release.clone(),
        };
        let sink = Arc::new(VecEventSink::new());
        let engine = Arc::new(
            ExecutionEngine::new(Arc::new(executor))
                .with_config(fast_config())
                .with_event_sink(sink.clone()),
        );
        let canvas = CanvasBuilder::new()
            .add_text("first", "1")
            .add_text("last", "2")
            .connect("first", "last")
            .build();

        let handle = engine.clone().spawn_workflow(canvas).await.unwrap();
        let id = handle.execution_id.clone();
        started.notified().await;

        assert!(engine.cancel_execution(&id).await);
        release.notify_one();

        let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.status, WorkflowStatus::Cancelled);
        assert_eq!(result.block("first").unwrap().status, BlockStatus::Completed);
        assert_eq!(result.block("last").unwrap().status, BlockStatus::Completed);
        assert_eq!(
            engine.get_execution_status(&id).await,
            Some(WorkflowStatus::Cancelled)
        );
        assert!(matches!(
            sink.events().last(),
            Some(WorkflowEvent::WorkflowCancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let executor = GateExecutor {
            gated: "a",
            started: started.clone(),
            release: release.clone(),
        };
        let sink = Arc::new(VecEventSink::new());
        let engine = Arc::new(
            ExecutionEngine::new(Arc::new(executor))
                .with_config(fast_config())
                .with_event_sink(sink.clone()),
        );
        let canvas = CanvasBuilder::new()
            .add_text("a", "1")
            .add_text("b", "2")
            .connect("a", "b")
            .build();

        let handle = engine.clone().spawn_workflow(canvas).await.unwrap();
        let id = handle.execution_id.clone();
        started.notified().await;

        assert!(engine.pause_execution(&id).await);
        assert_eq!(engine.get_execution_status(&id).await, Some(WorkflowStatus::Paused));
        release.notify_one();

        wait_for_block(&engine, &id, "a", BlockStatus::Completed).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let snapshot = engine.execution_snapshot(&id).await.unwrap();
        assert_eq!(snapshot.blocks[1].status, BlockStatus::Idle);

        assert!(engine.resume_execution(&id).await);
        let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(result.statistics.completed_blocks, 2);
        let events = sink.events();
        assert!(events.iter().any(|e| matches!(e, WorkflowEvent::WorkflowPaused { .. })));
        assert!(events.iter().any(|e| matches!(e, WorkflowEvent::WorkflowResumed { .. })));
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let executor = FnExecutor(|_block: &Block, _content: &str| -> ExecResult {
            Err(BlockError::message("network unreachable"))
        });
        let retry = RetryPolicies::default()
            .with_policy(ErrorKind::Network, RetryPolicy::exponential(5, 60_000));
        let (sink, mut events) = ChannelEventSink::channel();
        let engine = Arc::new(
            ExecutionEngine::new(Arc::new(executor))
                .with_config(EngineConfig::default().with_retry(retry))
                .with_event_sink(Arc::new(sink)),
        );
        let canvas = CanvasBuilder::new()
            .add_text("a", "1")
            .add_text("b", "2")
            .build();

        let handle = engine.clone().spawn_workflow(canvas).await.unwrap();
        let id = handle.execution_id.clone();
        while let Some(event) = events.recv().await {
            if let WorkflowEvent::BlockRetrying { delay_ms, .. } = event {
                assert_eq!(delay_ms, 60_000);
                break;
            }
        }
        assert!(engine.cancel_execution(&id).await);

        let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.status, WorkflowStatus::Cancelled);
        let a = result.block("a").unwrap();
        assert_eq!(a.status, BlockStatus::Failed);
        assert_eq!(a.retry_count, 0);
        assert_eq!(a.error.as_ref().unwrap().kind, ErrorKind::Network);
        assert_eq!(result.block("b").unwrap().status, BlockStatus::Skipped);
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_independent() {
        let engine = Arc::new(dry_engine());
        let first = CanvasBuilder::new().add_text("a", "one").build();
        let second = CanvasBuilder::new()
            .add_text("a", "two")
            .add_text("b", "three")
            .build();

        let h1 = engine.clone().spawn_workflow(first).await.unwrap();
        let h2 = engine.clone().spawn_workflow(second).await.unwrap();
        assert_ne!(h1.execution_id, h2.execution_id);

        let r1 = h1.wait().await.unwrap();
        let r2 = h2.wait().await.unwrap();
        assert_eq!(r1.block("a").unwrap().output.as_deref(), Some("one"));
        assert_eq!(r2.block("a").unwrap().output.as_deref(), Some("two"));
        assert_eq!(r2.statistics.total_blocks, 2);
    }

    #[tokio::test]
    async fn test_event_sequence() {
        let sink = Arc::new(VecEventSink::new());
        let engine = dry_engine().with_event_sink(sink.clone());
        let canvas = CanvasBuilder::new()
            .add_text("a", "1")
            .add_text("b", "2")
            .connect("a", "b")
            .build();

        engine.execute_workflow(&canvas).await.unwrap();
        let events = sink.events();

        assert!(matches!(
            events.first(),
            Some(WorkflowEvent::WorkflowStarted { total_blocks: 2, .. })
        ));
        assert!(matches!(
            events.last(),
            Some(WorkflowEvent::WorkflowCompleted { statistics, .. }) if statistics.completed_blocks == 2
        ));
        let started: Vec<&str> = events
            .iter()
            .filter(|e| matches!(e, WorkflowEvent::BlockStarted { .. }))
            .filter_map(|e| e.block_id())
            .collect();
        assert_eq!(started, vec!["a", "b"]);
    }
}

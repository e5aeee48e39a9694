//! Registry of workflow executions
//!
//! Tracks every run an engine has started: its workflow status, per-block
//! progress and the control channel used for pause/resume/cancel. Finished
//! runs stay queryable until `cleanup_finished` drops them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

use crate::types::{BlockId, BlockStatus, WorkflowStatus};

/// Control requested for a running execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Cancel,
}

/// Progress of one block within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockProgress {
    pub block_id: BlockId,
    pub execution_order: usize,
    pub status: BlockStatus,
}

/// Point-in-time copy of a run's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub status: WorkflowStatus,
    /// Blocks in execution order
    pub blocks: Vec<BlockProgress>,
    /// Time since the run started, or its total duration once finished
    pub elapsed_ms: u64,
}

impl ExecutionSnapshot {
    pub fn count(&self, status: BlockStatus) -> usize {
        self.blocks.iter().filter(|b| b.status == status).count()
    }
}

/// State for a single workflow execution
struct ExecutionState {
    status: WorkflowStatus,
    blocks: Vec<BlockProgress>,
    control: watch::Sender<ControlSignal>,
    started_at: Instant,
    finished_at: Option<Instant>,
}

impl ExecutionState {
    fn elapsed(&self) -> Duration {
        match self.finished_at {
            Some(finished) => finished.duration_since(self.started_at),
            None => self.started_at.elapsed(),
        }
    }

    fn is_finished(&self) -> bool {
        self.status.is_finished()
    }

    fn cancel_requested(&self) -> bool {
        *self.control.borrow() == ControlSignal::Cancel
    }
}

/// Manager for all workflow executions
pub struct ExecutionRegistry {
    executions: RwLock<HashMap<String, ExecutionState>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a run in `running` state with its blocks idle.
    ///
    /// Returns the control receiver, or `None` if the id is taken.
    pub async fn register(
        &self,
        execution_id: &str,
        block_ids: &[&str],
    ) -> Option<watch::Receiver<ControlSignal>> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(execution_id) {
            return None;
        }

        let (control, receiver) = watch::channel(ControlSignal::Run);
        let blocks = block_ids
            .iter()
            .enumerate()
            .map(|(execution_order, id)| BlockProgress {
                block_id: id.to_string(),
                execution_order,
                status: BlockStatus::Idle,
            })
            .collect();

        executions.insert(
            execution_id.to_string(),
            ExecutionState {
                status: WorkflowStatus::Running,
                blocks,
                control,
                started_at: Instant::now(),
                finished_at: None,
            },
        );
        Some(receiver)
    }

    pub async fn set_block_status(&self, execution_id: &str, block_id: &str, status: BlockStatus) {
        let mut executions = self.executions.write().await;
        if let Some(block) = executions
            .get_mut(execution_id)
            .and_then(|state| state.blocks.iter_mut().find(|b| b.block_id == block_id))
        {
            block.status = status;
        }
    }

    /// Record the final status of a run and return the status stored.
    ///
    /// A cancellation accepted before this call turns a `Completed` run
    /// into `Cancelled`.
    pub async fn finish(&self, execution_id: &str, status: WorkflowStatus) -> WorkflowStatus {
        let mut executions = self.executions.write().await;
        match executions.get_mut(execution_id) {
            Some(state) => {
                let status = if state.cancel_requested() {
                    WorkflowStatus::Cancelled
                } else {
                    status
                };
                state.status = status;
                state.finished_at = Some(Instant::now());
                status
            }
            None => status,
        }
    }

    pub async fn status(&self, execution_id: &str) -> Option<WorkflowStatus> {
        self.executions
            .read()
            .await
            .get(execution_id)
            .map(|state| state.status)
    }

    pub async fn snapshot(&self, execution_id: &str) -> Option<ExecutionSnapshot> {
        let executions = self.executions.read().await;
        executions.get(execution_id).map(|state| ExecutionSnapshot {
            execution_id: execution_id.to_string(),
            status: state.status,
            blocks: state.blocks.clone(),
            elapsed_ms: state.elapsed().as_millis() as u64,
        })
    }

    /// Ask a running execution to pause before its next block.
    ///
    /// Returns false (and does nothing) unless the run is `running`.
    pub async fn pause(&self, execution_id: &str) -> bool {
        let mut executions = self.executions.write().await;
        match executions.get_mut(execution_id) {
            Some(state) if state.status == WorkflowStatus::Running && !state.cancel_requested() => {
                state.status = WorkflowStatus::Paused;
                state.control.send_replace(ControlSignal::Pause);
                true
            }
            _ => false,
        }
    }

    /// Let a paused execution continue. No-op unless the run is `paused`;
    /// a pending cancellation is never overridden.
    pub async fn resume(&self, execution_id: &str) -> bool {
        let mut executions = self.executions.write().await;
        match executions.get_mut(execution_id) {
            Some(state) if state.status == WorkflowStatus::Paused && !state.cancel_requested() => {
                state.status = WorkflowStatus::Running;
                state.control.send_replace(ControlSignal::Run);
                true
            }
            _ => false,
        }
    }

    /// Request cancellation. No-op for unknown or finished runs and for
    /// runs already asked to cancel.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        let executions = self.executions.read().await;
        match executions.get(execution_id) {
            Some(state) if !state.is_finished() => {
                let previous = state.control.send_replace(ControlSignal::Cancel);
                previous != ControlSignal::Cancel
            }
            _ => false,
        }
    }

    /// Drop finished runs older than `max_age`, returning how many were removed
    pub async fn cleanup_finished(&self, max_age: Duration) -> usize {
        let mut executions = self.executions.write().await;
        let expired: Vec<String> = executions
            .iter()
            .filter(|(_, state)| {
                state
                    .finished_at
                    .map(|finished| finished.elapsed() >= max_age)
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            executions.remove(id);
            log::debug!("Cleaned up finished execution: {}", id);
        }
        expired.len()
    }

    /// Remove a run regardless of its state
    pub async fn remove(&self, execution_id: &str) -> bool {
        self.executions.write().await.remove(execution_id).is_some()
    }

    pub async fn contains(&self, execution_id: &str) -> bool {
        self.executions.read().await.contains_key(execution_id)
    }

    /// Number of runs that have not finished
    pub async fn active_count(&self) -> usize {
        self.executions
            .read()
            .await
            .values()
            .filter(|state| !state.is_finished())
            .count()
    }

    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }
}

impl Default for ExecutionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_snapshot() {
        let registry = ExecutionRegistry::new();
        assert!(registry.register("exec-1", &["a", "b"]).await.is_some());
        assert!(registry.register("exec-1", &["a"]).await.is_none());

        registry.set_block_status("exec-1", "a", BlockStatus::Completed).await;
        let snapshot = registry.snapshot("exec-1").await.unwrap();
        assert_eq!(snapshot.status, WorkflowStatus::Running);
        assert_eq!(snapshot.blocks[0].status, BlockStatus::Completed);
        assert_eq!(snapshot.blocks[1].execution_order, 1);
        assert_eq!(snapshot.count(BlockStatus::Idle), 1);
    }

    #[tokio::test]
    async fn test_pause_resume_cancel_signals() {
        let registry = ExecutionRegistry::new();
        let control = registry.register("exec-1", &["a"]).await.unwrap();

        assert!(registry.pause("exec-1").await);
        assert!(!registry.pause("exec-1").await);
        assert_eq!(*control.borrow(), ControlSignal::Pause);
        assert_eq!(registry.status("exec-1").await, Some(WorkflowStatus::Paused));

        assert!(registry.resume("exec-1").await);
        assert!(!registry.resume("exec-1").await);
        assert_eq!(*control.borrow(), ControlSignal::Run);

        assert!(registry.cancel("exec-1").await);
        assert!(!registry.cancel("exec-1").await);
        assert_eq!(*control.borrow(), ControlSignal::Cancel);
    }

    #[tokio::test]
    async fn test_resume_does_not_override_cancel() {
        let registry = ExecutionRegistry::new();
        let control = registry.register("exec-1", &["a"]).await.unwrap();

        assert!(registry.pause("exec-1").await);
        assert!(registry.cancel("exec-1").await);
        assert!(!registry.resume("exec-1").await);
        assert_eq!(*control.borrow(), ControlSignal::Cancel);
    }

    #[tokio::test]
    async fn test_unknown_and_finished_ids_are_noops() {
        let registry = ExecutionRegistry::new();
        assert!(!registry.pause("nope").await);
        assert!(!registry.resume("nope").await);
        assert!(!registry.cancel("nope").await);
        assert_eq!(registry.status("nope").await, None);

        let _control = registry.register("done", &[]).await.unwrap();
        registry.finish("done", WorkflowStatus::Completed).await;
        assert!(!registry.pause("done").await);
        assert!(!registry.cancel("done").await);
        assert_eq!(registry.status("done").await, Some(WorkflowStatus::Completed));
    }

    #[tokio::test]
    async fn test_finish_after_accepted_cancel_is_cancelled() {
        let registry = ExecutionRegistry::new();
        let _control = registry.register("late", &["a"]).await.unwrap();
        assert!(registry.cancel("late").await);

        let status = registry.finish("late", WorkflowStatus::Completed).await;
        assert_eq!(status, WorkflowStatus::Cancelled);
        assert_eq!(registry.status("late").await, Some(WorkflowStatus::Cancelled));
        assert!(!registry.cancel("late").await);
    }

    #[tokio::test]
    async fn test_cleanup_finished() {
        let registry = ExecutionRegistry::new();
        let _a = registry.register("finished", &["a"]).await.unwrap();
        let _b = registry.register("running", &["a"]).await.unwrap();
        registry.finish("finished", WorkflowStatus::Completed).await;

        assert_eq!(registry.cleanup_finished(Duration::from_secs(3600)).await, 0);
        assert_eq!(registry.cleanup_finished(Duration::ZERO).await, 1);
        assert!(!registry.contains("finished").await);
        assert!(registry.contains("running").await);
        assert_eq!(registry.active_count().await, 1);
        assert_eq!(registry.len().await, 1);
    }
}

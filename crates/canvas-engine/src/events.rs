//! Event types for streaming workflow progress
//!
//! Events are sent from the engine to the UI (or any consumer) to report
//! block transitions, retry countdowns and run-level state changes.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::classify::ErrorInfo;
use crate::types::ExecutionStatistics;

/// Trait for sending workflow events
///
/// This abstracts over the transport mechanism (UI bridge, mpsc, etc.)
/// allowing the engine to be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkflowEvent {
    /// Graph accepted, blocks about to run
    #[serde(rename_all = "camelCase")]
    WorkflowStarted {
        execution_id: String,
        total_blocks: usize,
    },

    #[serde(rename_all = "camelCase")]
    WorkflowPaused { execution_id: String },

    #[serde(rename_all = "camelCase")]
    WorkflowResumed { execution_id: String },

    /// Every scheduled block reached a terminal status
    #[serde(rename_all = "camelCase")]
    WorkflowCompleted {
        execution_id: String,
        statistics: ExecutionStatistics,
    },

    /// A cancel request was honoured
    #[serde(rename_all = "camelCase")]
    WorkflowCancelled {
        execution_id: String,
        statistics: ExecutionStatistics,
    },

    #[serde(rename_all = "camelCase")]
    BlockStarted {
        execution_id: String,
        block_id: String,
        execution_order: usize,
    },

    #[serde(rename_all = "camelCase")]
    BlockCompleted {
        execution_id: String,
        block_id: String,
        duration_ms: u64,
        retry_count: u32,
    },

    /// A failed attempt will be retried after `delay_ms`
    #[serde(rename_all = "camelCase")]
    BlockRetrying {
        execution_id: String,
        block_id: String,
        /// One-based number of the retry about to happen
        attempt: u32,
        delay_ms: u64,
        error: ErrorInfo,
    },

    #[serde(rename_all = "camelCase")]
    BlockFailed {
        execution_id: String,
        block_id: String,
        error: ErrorInfo,
    },

    #[serde(rename_all = "camelCase")]
    BlockSkipped {
        execution_id: String,
        block_id: String,
        reason: String,
    },

    /// A reference token was left in the content as written
    #[serde(rename_all = "camelCase")]
    ReferenceUnresolved {
        execution_id: String,
        block_id: String,
        token: String,
        reason: String,
    },
}

impl WorkflowEvent {
    /// Execution id carried by every event
    pub fn execution_id(&self) -> &str {
        match self {
            Self::WorkflowStarted { execution_id, .. }
            | Self::WorkflowPaused { execution_id }
            | Self::WorkflowResumed { execution_id }
            | Self::WorkflowCompleted { execution_id, .. }
            | Self::WorkflowCancelled { execution_id, .. }
            | Self::BlockStarted { execution_id, .. }
            | Self::BlockCompleted { execution_id, .. }
            | Self::BlockRetrying { execution_id, .. }
            | Self::BlockFailed { execution_id, .. }
            | Self::BlockSkipped { execution_id, .. }
            | Self::ReferenceUnresolved { execution_id, .. } => execution_id.as_str(),
        }
    }

    /// Block the event is about, if any
    pub fn block_id(&self) -> Option<&str> {
        match self {
            Self::BlockStarted { block_id, .. }
            | Self::BlockCompleted { block_id, .. }
            | Self::BlockRetrying { block_id, .. }
            | Self::BlockFailed { block_id, .. }
            | Self::BlockSkipped { block_id, .. }
            | Self::ReferenceUnresolved { block_id, .. } => Some(block_id.as_str()),
            _ => None,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: WorkflowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Forwards events into a tokio channel
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelEventSink {
    pub fn new(sender: mpsc::UnboundedSender<WorkflowEvent>) -> Self {
        Self { sender }
    }

    /// Create a sink together with the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.sender
            .send(event)
            .map_err(|_| EventError::channel_closed())
    }
}

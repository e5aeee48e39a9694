//! Canvas Engine - execution of block workflows drawn on a canvas
//!
//! A canvas is a set of text/image/video blocks wired together by
//! connections. This crate turns a snapshot of that canvas into a
//! validated, ordered, fault-tolerant run:
//!
//! - Graph validation (dangling connections, duplicate ids, cycles)
//! - Deterministic topological scheduling (Kahn's algorithm)
//! - Reference token substitution between blocks (`[A01]`)
//! - Error classification with per-category retry and backoff
//! - Per-block failure isolation with pause/resume/cancel controls
//!
//! # Architecture
//!
//! ```text
//! CanvasState ─► DependencyGraph ─► detect_cycles ─► schedule
//!                                                       │
//!             ┌─────────────────────────────────────────┘
//!             ▼
//!   ExecutionEngine loop: resolve_references ─► BlockExecutor
//!                                   ▲               │ error
//!                                   └── RetryPolicies ◄─ ErrorClassifier
//! ```
//!
//! Content generation itself is delegated to a [`BlockExecutor`]; the engine
//! never knows which provider is behind it.
//!
//! # Example
//!
//! ```ignore
//! use canvas_engine::{CanvasBuilder, BlockType, DryRunExecutor, ExecutionEngine};
//! use std::sync::Arc;
//!
//! let canvas = CanvasBuilder::new()
//!     .add_block("a", BlockType::Text, "A01", "Write a haiku")
//!     .add_block("b", BlockType::Image, "B01", "Illustrate: [A01]")
//!     .connect("a", "b")
//!     .build();
//!
//! let engine = ExecutionEngine::new(Arc::new(DryRunExecutor));
//! let result = engine.execute_workflow(&canvas).await?;
//! ```

pub mod builder;
pub mod classify;
pub mod config;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod error_log;
pub mod events;
pub mod executor;
pub mod graph;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod types;

// Re-export key types
pub use builder::CanvasBuilder;
pub use classify::{Classification, ErrorClassifier, ErrorInfo, ErrorKind, ExecutionContext};
pub use config::{EngineConfig, UpstreamFailurePolicy};
pub use cycle::detect_cycles;
pub use engine::{ExecutionEngine, ExecutionHandle};
pub use error::{BlockError, CanvasEngineError, Endpoint, GraphError, Result};
pub use error_log::ErrorLog;
pub use events::{
    ChannelEventSink, EventError, EventSink, NullEventSink, VecEventSink, WorkflowEvent,
};
pub use executor::{BlockExecutor, BlockOutput, DryRunExecutor, ExecutorRegistry};
pub use graph::DependencyGraph;
pub use registry::{BlockProgress, ControlSignal, ExecutionRegistry, ExecutionSnapshot};
pub use resolver::{
    referenced_labels, resolve_references, ReferenceState, ResolvedContent, UnresolvedReason,
    UnresolvedToken,
};
pub use retry::{RetryDecision, RetryPolicies, RetryPolicy};
pub use scheduler::{schedule, Schedule, ScheduledBlock};
pub use types::{
    Block, BlockId, BlockResult, BlockStatus, BlockType, CanvasSettings, CanvasState, Connection,
    ConnectionId, DataFlow, ExecutionResult, ExecutionStatistics, WorkflowStatus,
};

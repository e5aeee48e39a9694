//! Core types for canvas workflows
//!
//! These types describe the canvas snapshot the engine consumes (blocks,
//! connections, settings) and the results it produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ErrorInfo;

/// Unique identifier for a block
pub type BlockId = String;

/// Unique identifier for a connection
pub type ConnectionId = String;

/// The kind of content a block generates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    /// Text generation
    Text,
    /// Image generation
    Image,
    /// Video generation
    Video,
}

impl BlockType {
    /// Lowercase name used in logs and operation labels
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Text => "text",
            BlockType::Image => "image",
            BlockType::Video => "video",
        }
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status of a single block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl BlockStatus {
    /// Whether the block has reached a final state for this run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BlockStatus::Completed | BlockStatus::Failed | BlockStatus::Skipped
        )
    }

    /// Check whether moving to `next` is allowed.
    ///
    /// `idle -> running -> {completed | failed | skipped}`, plus
    /// `idle -> skipped` for blocks that never start.
    pub fn can_transition_to(&self, next: BlockStatus) -> bool {
        match (self, next) {
            (BlockStatus::Idle, BlockStatus::Running) => true,
            (BlockStatus::Idle, BlockStatus::Skipped) => true,
            (BlockStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// Status of a whole workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Whether the run has finished
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

/// A block on the canvas
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Unique identifier for this block
    pub id: BlockId,
    /// Kind of content this block generates
    #[serde(rename = "type")]
    pub block_type: BlockType,
    /// Position on the canvas (x, y)
    #[serde(default)]
    pub position: (f64, f64),
    /// Size on the canvas (width, height)
    #[serde(default)]
    pub size: (f64, f64),
    /// Prompt template, may contain reference tokens like `[A01]`
    #[serde(default)]
    pub content: String,
    /// Status as last shown in the UI. Ignored by the engine.
    #[serde(default)]
    pub status: BlockStatus,
    /// Human label other blocks reference (e.g. "A01")
    #[serde(default)]
    pub number: String,
}

impl Block {
    /// Create a block with default geometry
    pub fn new(
        id: impl Into<String>,
        block_type: BlockType,
        number: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            block_type,
            position: (0.0, 0.0),
            size: (0.0, 0.0),
            content: content.into(),
            status: BlockStatus::Idle,
            number: number.into(),
        }
    }
}

/// Data flow metadata carried on a connection. Informational only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFlow {
    /// Whether data is flowing over this connection
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Declared type of the data passed along
    #[serde(default)]
    pub data_type: Option<BlockType>,
    /// When data last flowed over this connection
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl Default for DataFlow {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            data_type: None,
            last_updated: None,
        }
    }
}

/// A directed connection between two blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ConnectionId,
    /// Upstream block ID
    pub from_id: BlockId,
    /// Downstream block ID
    pub to_id: BlockId,
    /// Free-text instruction shown on the connection
    #[serde(default)]
    pub instruction: String,
    /// Data flow metadata
    #[serde(default)]
    pub data_flow: DataFlow,
}

impl Connection {
    /// Create a connection without an instruction
    pub fn new(
        id: impl Into<String>,
        from_id: impl Into<String>,
        to_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from_id: from_id.into(),
            to_id: to_id.into(),
            instruction: String::new(),
            data_flow: DataFlow::default(),
        }
    }
}

/// Canvas-level settings. The engine does not read them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSettings {
    #[serde(default = "default_zoom")]
    pub zoom: f64,
    #[serde(default)]
    pub grid_size: u32,
    #[serde(default)]
    pub show_grid: bool,
    #[serde(default)]
    pub auto_save: bool,
}

fn default_zoom() -> f64 {
    1.0
}

impl Default for CanvasSettings {
    fn default() -> Self {
        Self {
            zoom: default_zoom(),
            grid_size: 0,
            show_grid: false,
            auto_save: false,
        }
    }
}

/// A snapshot of everything on the canvas
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasState {
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub settings: CanvasSettings,
}

impl CanvasState {
    /// Find a block by ID
    pub fn find_block(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Find the first block carrying a label
    pub fn find_by_number(&self, number: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.number == number)
    }

    /// Get the IDs of blocks this block depends on (upstream blocks)
    pub fn get_dependencies(&self, block_id: &str) -> Vec<BlockId> {
        self.connections
            .iter()
            .filter(|c| c.to_id == block_id)
            .map(|c| c.from_id.clone())
            .collect()
    }

    /// Get the IDs of blocks that depend on this block (downstream blocks)
    pub fn get_dependents(&self, block_id: &str) -> Vec<BlockId> {
        self.connections
            .iter()
            .filter(|c| c.from_id == block_id)
            .map(|c| c.to_id.clone())
            .collect()
    }
}

/// Outcome of one block within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockResult {
    pub block_id: BlockId,
    /// Position of the block in the execution order (0-based)
    pub execution_order: usize,
    pub status: BlockStatus,
    /// Content after reference substitution (empty for skipped blocks)
    pub input: String,
    /// Produced output text
    pub output: Option<String>,
    /// Produced asset URL (image/video)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    /// Classified error for failed blocks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Reason a block was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Reference tokens that could not be substituted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Wall time spent on this block, including retries
    pub duration_ms: u64,
    /// Retries performed (attempts - 1)
    pub retry_count: u32,
}

impl BlockResult {
    /// Result for a block that never started
    pub fn skipped(
        block_id: impl Into<String>,
        execution_order: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            block_id: block_id.into(),
            execution_order,
            status: BlockStatus::Skipped,
            input: String::new(),
            output: None,
            output_url: None,
            error: None,
            skip_reason: Some(reason.into()),
            warnings: Vec::new(),
            duration_ms: 0,
            retry_count: 0,
        }
    }
}

/// Aggregate numbers for a finished run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatistics {
    pub total_blocks: usize,
    pub completed_blocks: usize,
    pub failed_blocks: usize,
    pub skipped_blocks: usize,
    /// Wall time of the whole run in milliseconds
    pub total_execution_time: u64,
    /// Mean duration of blocks that ran (completed or failed) in milliseconds
    pub average_block_time: f64,
}

impl ExecutionStatistics {
    /// Aggregate block results
    pub fn from_results(results: &[BlockResult], total_execution_time: u64) -> Self {
        let count = |status: BlockStatus| results.iter().filter(|r| r.status == status).count();
        let completed_blocks = count(BlockStatus::Completed);
        let failed_blocks = count(BlockStatus::Failed);
        let skipped_blocks = count(BlockStatus::Skipped);

        let ran = completed_blocks + failed_blocks;
        let average_block_time = if ran == 0 {
            0.0
        } else {
            let total: u64 = results
                .iter()
                .filter(|r| matches!(r.status, BlockStatus::Completed | BlockStatus::Failed))
                .map(|r| r.duration_ms)
                .sum();
            total as f64 / ran as f64
        };

        Self {
            total_blocks: results.len(),
            completed_blocks,
            failed_blocks,
            skipped_blocks,
            total_execution_time,
            average_block_time,
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: String,
    pub status: WorkflowStatus,
    /// One entry per scheduled block, in execution order
    pub results: Vec<BlockResult>,
    pub statistics: ExecutionStatistics,
}

impl ExecutionResult {
    /// Find the result for a block
    pub fn block(&self, block_id: &str) -> Option<&BlockResult> {
        self.results.iter().find(|r| r.block_id == block_id)
    }
}

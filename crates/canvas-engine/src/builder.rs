//! Fluent builder for canvas snapshots
//!
//! Provides a compact API for constructing canvases programmatically,
//! mostly for tests and headless hosts.

use crate::types::{Block, BlockType, CanvasSettings, CanvasState, Connection};

/// Fluent builder for constructing canvas states
///
/// # Example
///
/// ```ignore
/// let canvas = CanvasBuilder::new()
///     .add_block("a", BlockType::Text, "A01", "Describe a lighthouse")
///     .add_block("b", BlockType::Image, "B01", "Paint this: [A01]")
///     .connect("a", "b")
///     .build();
/// ```
#[derive(Default)]
pub struct CanvasBuilder {
    blocks: Vec<Block>,
    connections: Vec<Connection>,
    settings: CanvasSettings,
    connection_counter: usize,
}

impl CanvasBuilder {
    /// Create a new canvas builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block to the canvas
    pub fn add_block(
        mut self,
        id: impl Into<String>,
        block_type: BlockType,
        number: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.blocks.push(Block::new(id, block_type, number, content));
        self
    }

    /// Add a text block whose label is derived from its position (A01, A02, ...)
    pub fn add_text(mut self, id: impl Into<String>, content: impl Into<String>) -> Self {
        let number = format!("A{:02}", self.blocks.len() + 1);
        self.blocks
            .push(Block::new(id, BlockType::Text, number, content));
        self
    }

    /// Set the position of the most recently added block
    ///
    /// Must be called immediately after `add_block`.
    pub fn at(mut self, x: f64, y: f64) -> Self {
        if let Some(block) = self.blocks.last_mut() {
            block.position = (x, y);
        }
        self
    }

    /// Connect two blocks (auto-generates the connection ID)
    pub fn connect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.connection_counter += 1;
        let id = format!("conn-{}", self.connection_counter);
        self.connections.push(Connection::new(id, from, to));
        self
    }

    /// Connect two blocks with an explicit ID and instruction
    pub fn connect_with(
        mut self,
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        let mut connection = Connection::new(id, from, to);
        connection.instruction = instruction.into();
        self.connections.push(connection);
        self
    }

    /// Replace the canvas settings
    pub fn with_settings(mut self, settings: CanvasSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the canvas without validation
    pub fn build(self) -> CanvasState {
        CanvasState {
            blocks: self.blocks,
            connections: self.connections,
            settings: self.settings,
        }
    }
}

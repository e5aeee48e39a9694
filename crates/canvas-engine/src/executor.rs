//! Block executors
//!
//! The engine hands each block, with its references already substituted,
//! to a `BlockExecutor`. Which provider generates the text, image or video
//! is the executor's business.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::classify::ErrorKind;
use crate::error::BlockError;
use crate::types::{Block, BlockType};

/// What a block produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockOutput {
    pub output: String,
    pub output_url: Option<String>,
}

impl BlockOutput {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            output_url: None,
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            output_url: Some(url.into()),
        }
    }

    /// Text used when another block references this one
    pub fn reference_text(&self) -> &str {
        match &self.output_url {
            Some(url) if self.output.is_empty() => url,
            _ => &self.output,
        }
    }
}

/// Generates the content of one block
#[async_trait]
pub trait BlockExecutor: Send + Sync {
    async fn execute(
        &self,
        block: &Block,
        resolved_content: &str,
    ) -> Result<BlockOutput, BlockError>;
}

/// Dispatches to one executor per block type
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<BlockType, Arc<dyn BlockExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the dry-run executor for every block type
    pub fn dry_run() -> Self {
        let executor: Arc<dyn BlockExecutor> = Arc::new(DryRunExecutor);
        [BlockType::Text, BlockType::Image, BlockType::Video]
            .into_iter()
            .fold(Self::new(), |registry, block_type| {
                registry.with(block_type, executor.clone())
            })
    }

    pub fn register(&mut self, block_type: BlockType, executor: Arc<dyn BlockExecutor>) {
        self.executors.insert(block_type, executor);
    }

    pub fn with(mut self, block_type: BlockType, executor: Arc<dyn BlockExecutor>) -> Self {
        self.register(block_type, executor);
        self
    }

    pub fn get(&self, block_type: BlockType) -> Option<&Arc<dyn BlockExecutor>> {
        self.executors.get(&block_type)
    }

    pub fn has(&self, block_type: BlockType) -> bool {
        self.executors.contains_key(&block_type)
    }
}

#[async_trait]
impl BlockExecutor for ExecutorRegistry {
    async fn execute(
        &self,
        block: &Block,
        resolved_content: &str,
    ) -> Result<BlockOutput, BlockError> {
        match self.executors.get(&block.block_type) {
            Some(executor) => executor.execute(block, resolved_content).await,
            None => Err(BlockError::fatal(
                ErrorKind::Validation,
                format!("No executor registered for block type '{}'", block.block_type),
            )),
        }
    }
}

/// Produces placeholder output without contacting any provider
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl BlockExecutor for DryRunExecutor {
    async fn execute(
        &self,
        block: &Block,
        resolved_content: &str,
    ) -> Result<BlockOutput, BlockError> {
        log::debug!("Dry run of {} block '{}'", block.block_type, block.id);
        Ok(match block.block_type {
            BlockType::Text => BlockOutput::text(resolved_content),
            BlockType::Image | BlockType::Video => {
                BlockOutput::url(format!("dry-run://{}/{}", block.block_type, block.id))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_outputs() {
        let text = Block::new("t", BlockType::Text, "A01", "raw");
        let image = Block::new("i", BlockType::Image, "B01", "a cat");

        let out = DryRunExecutor.execute(&text, "resolved").await.unwrap();
        assert_eq!(out, BlockOutput::text("resolved"));

        let out = DryRunExecutor.execute(&image, "a cat").await.unwrap();
        assert_eq!(out.output_url.as_deref(), Some("dry-run://image/i"));
        assert_eq!(out.reference_text(), "dry-run://image/i");
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        struct Fixed;

        #[async_trait]
        impl BlockExecutor for Fixed {
            async fn execute(
                &self,
                _block: &Block,
                _content: &str,
            ) -> Result<BlockOutput, BlockError> {
                Ok(BlockOutput::text("fixed"))
            }
        }

        let registry = ExecutorRegistry::dry_run().with(BlockType::Text, Arc::new(Fixed));
        let text = Block::new("t", BlockType::Text, "A01", "hello");
        let video = Block::new("v", BlockType::Video, "C01", "clip");

        assert_eq!(registry.execute(&text, "hello").await.unwrap().output, "fixed");
        assert_eq!(
            registry.execute(&video, "clip").await.unwrap().output_url.as_deref(),
            Some("dry-run://video/v")
        );
    }

    #[tokio::test]
    async fn test_unregistered_type_is_fatal() {
        let registry = ExecutorRegistry::new();
        let block = Block::new("i", BlockType::Image, "B01", "x");

        match registry.execute(&block, "x").await.unwrap_err() {
            BlockError::Classified {
                kind, recoverable, ..
            } => {
                assert_eq!(kind, ErrorKind::Validation);
                assert!(!recoverable);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_registry_shared_across_types() {
        let registry = ExecutorRegistry::dry_run();
        assert!(registry.has(BlockType::Text));
        assert!(registry.has(BlockType::Video));

        let block = Block::new("v", BlockType::Video, "C01", "waves");
        let out = tokio_test::block_on(registry.execute(&block, "waves"));
        tokio_test::assert_ok!(&out);
        assert_eq!(out.unwrap().output, "");
    }

    #[test]
    fn test_reference_text_prefers_output() {
        let both = BlockOutput {
            output: "caption".into(),
            output_url: Some("https://cdn/x.png".into()),
        };
        assert_eq!(both.reference_text(), "caption");
    }
}

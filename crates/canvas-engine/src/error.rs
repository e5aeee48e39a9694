//! Error types for the canvas engine

use thiserror::Error;

use crate::classify::ErrorKind;
use crate::types::{BlockId, ConnectionId};

/// Result type alias using CanvasEngineError
pub type Result<T> = std::result::Result<T, CanvasEngineError>;

/// Errors that can occur in the canvas engine
#[derive(Debug, Error)]
pub enum CanvasEngineError {
    /// The canvas graph was rejected before any block ran
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An execution with this id is already registered
    #[error("Execution '{0}' is already registered")]
    DuplicateExecution(String),

    /// The task driving a spawned run panicked or was aborted
    #[error("Execution task failed: {0}")]
    TaskFailed(String),
}

impl CanvasEngineError {
    /// Create a configuration error with a message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Which end of a connection failed to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    From,
    To,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::From => write!(f, "fromId"),
            Self::To => write!(f, "toId"),
        }
    }
}

/// Graph-time rejections. These are fatal to the whole run and are raised
/// before any block leaves `idle`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A connection references a block that is not on the canvas
    #[error("Connection '{connection_id}' references missing block '{block_id}' ({endpoint})")]
    MissingBlock {
        connection_id: ConnectionId,
        endpoint: Endpoint,
        block_id: BlockId,
    },

    /// The graph contains a cycle (a self-loop counts)
    #[error("Circular dependency detected between blocks: {}", .block_ids.join(", "))]
    CircularDependency { block_ids: Vec<BlockId> },

    /// Two blocks share an id
    #[error("Duplicate block id '{block_id}'")]
    DuplicateBlock { block_id: BlockId },
}

/// Failure reported by a block executor.
///
/// Executors that know what went wrong should return `Classified` or `Http`;
/// `Message` is for opaque third-party errors and is classified by matching
/// its text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BlockError {
    /// The executor already knows the error category
    #[error("{message}")]
    Classified {
        kind: ErrorKind,
        message: String,
        recoverable: bool,
    },

    /// A provider answered with an HTTP error status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Opaque error text
    #[error("{0}")]
    Message(String),
}

impl BlockError {
    /// Create an opaque error from its message
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    /// Create a classified error using the category's default recoverability
    pub fn classified(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self::Classified {
            kind,
            message: msg.into(),
            recoverable: kind.is_recoverable_by_default(),
        }
    }

    /// Create a classified error that must not be retried
    pub fn fatal(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self::Classified {
            kind,
            message: msg.into(),
            recoverable: false,
        }
    }
}

impl From<std::io::Error> for BlockError {
    fn from(err: std::io::Error) -> Self {
        Self::Message(err.to_string())
    }
}

impl From<serde_json::Error> for BlockError {
    fn from(err: serde_json::Error) -> Self {
        Self::classified(ErrorKind::Validation, format!("parse error: {}", err))
    }
}

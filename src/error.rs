//! Error types for the reactive store.

use crate::action::ActionType;
use thiserror::Error;

/// Main error type for store and selector-graph operations.
///
/// These are configuration failures: they signal a mis-assembled store or
/// graph and are raised eagerly, at setup time. Runtime conditions (missing
/// reducers, failing producers, panicking subscribers) are logged and
/// contained instead of surfacing here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is already initialized")]
    AlreadyInitialized,

    #[error("duplicate slice name: {0}")]
    DuplicateSlice(String),

    #[error("slice '{slice}' already has a reducer for action type {action_type}")]
    DuplicateReducer {
        slice: String,
        action_type: ActionType,
    },

    #[error("slice '{0}' is already registered with a store")]
    SliceConsumed(String),

    #[error("selector node '{0}' still has children")]
    NodeHasChildren(String),

    #[error("reparenting '{0}' would create a cycle")]
    CycleDetected(String),

    #[error("selector belongs to a different graph")]
    GraphMismatch,

    #[error("selector node no longer exists")]
    NodeDeleted,

    #[error("a batch update is already in progress")]
    BatchInProgress,

    #[error("no batch update is in progress")]
    BatchNotActive,
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Termination status of an action producer.
///
/// `Cancelled` is the cooperative-cancellation signal injected at a
/// producer's next suspension point when a concurrency policy supersedes
/// it. The drain loop treats it as expected, silent termination; anything
/// else is a genuine failure and is logged.
#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("producer cancelled")]
    Cancelled,

    #[error("producer failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ProducerError {
    /// Wrap an arbitrary error as a producer failure.
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ProducerError::Failed(Box::new(err))
    }

    /// Build a failure from a plain message.
    pub fn message(msg: impl Into<String>) -> Self {
        ProducerError::Failed(msg.into().into())
    }

    /// Whether this is the cooperative-cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProducerError::Cancelled)
    }
}

/// Result type for producer bodies.
pub type ProducerResult<T> = std::result::Result<T, ProducerError>;

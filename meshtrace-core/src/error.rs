//! Error types for MESHTRACE operations

use crate::{EntityType, NodeNum};
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with key {key}")]
    NotFound { entity_type: EntityType, key: String },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Shorthand for a missing node row.
    pub fn node_not_found(node: NodeNum) -> Self {
        StorageError::NotFound {
            entity_type: EntityType::Node,
            key: node.to_string(),
        }
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Segment endpoints must differ, got {node} twice")]
    SelfSegment { node: NodeNum },

    #[error("Invalid segment distance {distance_km} km")]
    InvalidDistance { distance_km: f64 },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Probe transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Radio link unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Probe to {target} rejected: {reason}")]
    Rejected { target: NodeNum, reason: String },

    #[error("Probe to {target} timed out")]
    Timeout { target: NodeNum },
}

/// Master error type for all MESHTRACE errors.
#[derive(Debug, Clone, Error)]
pub enum MeshtraceError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl MeshtraceError {
    /// Whether retrying the same call later can succeed.
    ///
    /// Persistence and radio failures are transient; bad input and bad
    /// configuration are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            MeshtraceError::Storage(StorageError::NotFound { .. }) => false,
            MeshtraceError::Storage(_) | MeshtraceError::Transport(_) => true,
            MeshtraceError::Validation(_) | MeshtraceError::Config(_) => false,
        }
    }
}

/// Result type alias for MESHTRACE operations.
pub type MeshtraceResult<T> = Result<T, MeshtraceError>;

// =============================================================================
// TESTS
// =============================================================================

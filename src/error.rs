//! Error types for the enforcement engine
//!
//! Covers peer, cache, storage, and validation failures.

use thiserror::Error;

/// Primary error type for all enforcer operations
#[derive(Debug, Error)]
pub enum EnforcerError {
    // ========== Peer Errors ==========

    /// Node status poll failed or returned unparseable data
    #[error("Node at {endpoint} unreachable: {reason}")]
    PeerUnreachable { endpoint: String, reason: String },

    // ========== Cache Errors ==========

    /// Key not present in the cache
    #[error("Cache miss: {key}")]
    CacheMiss { key: String },

    /// Any cache failure other than a miss
    #[error("Cache unavailable: {message}")]
    CacheUnavailable { message: String },

    // ========== Storage Errors ==========

    /// Generic storage failure
    #[error("Storage operation failed: {message}")]
    Storage { message: String },

    /// Multi-statement transaction failed and was rolled back
    #[error("Transaction failed: {message}")]
    Transaction { message: String },

    /// Node not registered
    #[error("Node not found: {address}")]
    NodeNotFound { address: String },

    // ========== Validation Errors ==========

    /// Pagination cursor could not be decoded
    #[error("Invalid cursor: {cursor}")]
    InvalidCursor { cursor: String },

    /// Malformed node address
    #[error("Invalid address: {value}")]
    InvalidAddress { value: String },

    /// Unknown node status string
    #[error("Invalid node status: {value}")]
    InvalidNodeStatus { value: String },

    /// JSON encode/decode failure
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    // ========== Runtime Errors ==========

    /// The operation was cancelled by shutdown
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EnforcerError {
    /// Returns true if re-running the whole cycle is safe and may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EnforcerError::Storage { .. }
                | EnforcerError::Transaction { .. }
                | EnforcerError::CacheUnavailable { .. }
                | EnforcerError::PeerUnreachable { .. }
        )
    }

    /// Returns true for a plain cache miss
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, EnforcerError::CacheMiss { .. })
    }
}

/// Result type alias for enforcer operations
pub type Result<T> = std::result::Result<T, EnforcerError>;

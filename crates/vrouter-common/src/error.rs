//! Common error types for vrouter components.

use thiserror::Error;

/// Result alias used by the coordination core.
pub type Result<T> = std::result::Result<T, VrouterError>;

/// Errors produced by the store client, allocator, lease manager and registry
#[derive(Debug, Error)]
pub enum VrouterError {
    /// Store unreachable, connection dropped, or request timed out
    #[error("Connection error: {0}")]
    Connection(String),

    /// Create-if-absent found a live entry at the key
    #[error("Key already exists: {key}")]
    AlreadyExists { key: String },

    /// Compare-and-swap precondition failed
    #[error("Revision conflict on {key}: expected revision {expected}")]
    Conflict { key: String, expected: u64 },

    /// Read or delete on a missing key
    #[error("Key not found: {key}")]
    NotFound { key: String },

    /// The parent block cannot hold the requested number of blocks
    #[error("Insufficient address space: cannot carve {requested} blocks out of {parent}")]
    InsufficientAddressSpace { parent: String, requested: usize },

    /// Invalid input (bad CIDR, empty host list, etc.)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Lease timing policy violated
    #[error("Invalid lease: {0}")]
    InvalidLease(String),

    /// Exclusive ownership of the liveness key can no longer be proven
    #[error("Lease lost on {key}: {reason}")]
    LeaseLost { key: String, reason: String },

    /// Unexpected or unparseable reply from the store
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl VrouterError {
    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists { key: key.into() }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

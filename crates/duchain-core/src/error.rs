//! Usage errors of the chain.
//!
//! Misuse (mutating without the write lock, double registration, import
//! cycles) is a programming error. It is logged, asserted in debug builds and
//! refused in release builds, leaving the graph unchanged. Absence is never an
//! error: lookups return `None` or empty collections instead.

use thiserror::Error;

/// Errors reported by chain mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DUChainError {
    /// Mutation attempted without holding the write lock
    #[error("{operation} requires the DUChain write lock")]
    WriteLockRequired { operation: &'static str },

    /// Read attempted without holding any lock
    #[error("{operation} requires the DUChain read lock")]
    ReadLockRequired { operation: &'static str },

    /// Handle does not resolve (destroyed or foreign)
    #[error("invalid {kind} handle")]
    InvalidHandle { kind: &'static str },

    /// Top context is already registered
    #[error("top context is already registered as {0}")]
    AlreadyRegistered(String),

    /// Top context is not registered
    #[error("no top context registered for {0}")]
    NotRegistered(String),

    /// A manager for this environment type already exists
    #[error("a parsing environment manager for type {0} is already registered")]
    DuplicateManager(u32),

    /// No manager registered for this environment type
    #[error("no parsing environment manager for type {0}")]
    UnknownManager(u32),

    /// Environment file already registered with its manager
    #[error("parsing environment file for {0} is already registered")]
    DuplicateEnvironmentFile(String),

    /// Adding the import would make a context import itself
    #[error("importing would create a cycle")]
    ImportCycle,

    /// Observer id was never registered or already removed
    #[error("unknown observer {0}")]
    UnknownObserver(u64),

    /// Context belongs to a different document than required
    #[error("context does not belong to the document being built")]
    ForeignContext,
}

/// Result alias for chain mutations.
pub type Result<T> = std::result::Result<T, DUChainError>;

/// Report a usage error: fatal in debug builds, refused in release builds.
pub(crate) fn usage_error<T>(error: DUChainError) -> Result<T> {
    tracing::error!("DUChain usage error: {}", error);
    debug_assert!(false, "DUChain usage error: {}", error);
    Err(error)
}

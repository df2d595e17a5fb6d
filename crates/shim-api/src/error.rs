//! Error types for the shim

use shim_vm::VmError;
use thiserror::Error;

/// Recoverable shim failures.
///
/// Broken invariants never show up here; they abort through `fatal!`.
#[derive(Debug, Error)]
pub enum ShimError {
    /// The serializer's delegate refused to grow the buffer
    #[error("OutOfMemory")]
    OutOfMemory,

    /// The array-buffer allocator returned nothing
    #[error("failed to allocate {0} bytes")]
    AllocationFailed(usize),

    /// Reading a source file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed flag input
    #[error("invalid flag: {0}")]
    InvalidFlag(String),

    /// A value the serializer cannot represent
    #[error("DataCloneError: {0}")]
    DataClone(String),

    /// Truncated or malformed serialized data
    #[error("unable to deserialize: {0}")]
    Deserialize(String),

    /// Engine-level failure
    #[error(transparent)]
    Vm(#[from] VmError),
}

/// Result alias for shim operations
pub type Result<T> = std::result::Result<T, ShimError>;

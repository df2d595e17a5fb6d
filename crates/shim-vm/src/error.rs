//! Error types for the VM
//!
//! `VmError` describes an engine error before it is materialized as a thrown
//! error object. Thrown values themselves travel as `Err(Value)`.

use thiserror::Error;

/// Native error constructors known to every realm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// `Error`
    Error = 0,
    /// `TypeError`
    TypeError = 1,
    /// `RangeError`
    RangeError = 2,
    /// `ReferenceError`
    ReferenceError = 3,
    /// `SyntaxError`
    SyntaxError = 4,
}

impl ErrorKind {
    /// Every kind, in prototype-table order
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::Error,
        ErrorKind::TypeError,
        ErrorKind::RangeError,
        ErrorKind::ReferenceError,
        ErrorKind::SyntaxError,
    ];

    /// Constructor name
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::SyntaxError => "SyntaxError",
        }
    }
}

/// VM error type
#[derive(Debug, Clone, Error)]
pub enum VmError {
    /// Generic error
    #[error("Error: {0}")]
    Error(String),

    /// Type error
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Range error
    #[error("RangeError: {0}")]
    RangeError(String),

    /// Reference error
    #[error("ReferenceError: {0}")]
    ReferenceError(String),

    /// Syntax error
    #[error("SyntaxError: {0}")]
    SyntaxError(String),
}

impl VmError {
    /// Create a type error
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError(message.into())
    }

    /// Create a range error
    pub fn range_error(message: impl Into<String>) -> Self {
        Self::RangeError(message.into())
    }

    /// Create a reference error
    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::ReferenceError(message.into())
    }

    /// Create a syntax error
    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::SyntaxError(message.into())
    }

    /// Which constructor the materialized error uses
    pub fn kind(&self) -> ErrorKind {
        match self {
            VmError::Error(_) => ErrorKind::Error,
            VmError::TypeError(_) => ErrorKind::TypeError,
            VmError::RangeError(_) => ErrorKind::RangeError,
            VmError::ReferenceError(_) => ErrorKind::ReferenceError,
            VmError::SyntaxError(_) => ErrorKind::SyntaxError,
        }
    }

    /// The message without the constructor prefix
    pub fn message(&self) -> &str {
        match self {
            VmError::Error(m)
            | VmError::TypeError(m)
            | VmError::RangeError(m)
            | VmError::ReferenceError(m)
            | VmError::SyntaxError(m) => m,
        }
    }
}

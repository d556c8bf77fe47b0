//! Engine error types.

use dsbridge_types::BridgeError;

/// Errors from the dataset engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Caller supplied an invalid argument or the data violates an engine
    /// precondition.
    #[error("{0}")]
    Invalid(String),

    /// The operation is not supported by this object.
    #[error("{0}")]
    NotImplemented(String),

    /// A write would exceed its partition limit.
    #[error("{0}")]
    PartitionLimit(String),

    /// Memory pool refused an allocation.
    #[error("{0}")]
    OutOfMemory(String),

    /// Arrow compute, IPC, or FFI failure.
    #[error("arrow: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet decode or encode failure.
    #[error("parquet: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// I/O error (directory walks, file opens).
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    /// Failure raised by a host-side collaborator (listener, iterator).
    #[error("{}", .0.message)]
    Host(#[from] BridgeError),
}

impl EngineError {
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    #[must_use]
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented(message.into())
    }
}

impl From<EngineError> for BridgeError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Invalid(msg) => BridgeError::invalid_argument("INVALID", msg),
            EngineError::Host(inner) => inner,
            EngineError::NotImplemented(msg) => BridgeError::engine("NOT_IMPLEMENTED", msg),
            EngineError::OutOfMemory(msg) => BridgeError::engine("OUT_OF_MEMORY", msg),
            EngineError::PartitionLimit(msg) => BridgeError::engine("PARTITION_LIMIT", msg),
            other @ EngineError::Arrow(_) => BridgeError::engine("ARROW", other.to_string()),
            other @ EngineError::Parquet(_) => BridgeError::engine("PARQUET", other.to_string()),
            other @ EngineError::Io(_) => BridgeError::engine("IO", other.to_string()),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, EngineError>;

use std::fmt;

use thiserror::Error;

/// Errors raised by an image source when fetching original image bytes.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Object or file does not exist
    #[error("Source not found: {0}")]
    NotFound(String),

    /// Identifier escapes the source root or is otherwise unusable
    #[error("Invalid source path: {0}")]
    InvalidPath(String),

    /// Local filesystem error
    #[error("I/O error: {0}")]
    Io(String),

    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Errors raised by the imaging library while decoding, transforming or
/// encoding an image.
#[derive(Debug, Clone, Error)]
pub enum ImagingError {
    /// Source bytes could not be decoded into an image
    #[error("Failed to decode image: {message}")]
    Decode { message: String },

    /// An operation could not be applied to the decoded image
    #[error("Failed to apply {operation}: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },

    /// The result could not be encoded into the requested format
    #[error("Failed to encode image: {message}")]
    Encode { message: String },
}

/// Errors found while parsing or validating a transform request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Path contains `..` or `//`
    #[error("Illegal path: {0}")]
    IllegalPath(String),

    /// Output format is missing or unknown
    #[error("Unknown or missing output format: {0}")]
    UnknownFormat(String),

    /// Operation name is not recognized
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// Operation parameters are malformed or out of range
    #[error("Invalid parameters for {operation}: {message}")]
    InvalidParameter {
        operation: &'static str,
        message: String,
    },

    /// Too many operations in one request
    #[error("Too many operations: {count} (max {max})")]
    TooManyOperations { count: usize, max: usize },

    /// Quality outside 1-100
    #[error("Invalid quality: {0} (must be 1-100)")]
    InvalidQuality(u32),

    /// Query parameters contradict each other
    #[error("Conflicting parameters: {0}")]
    Conflict(String),
}

/// Why a request was rejected for capacity reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverloadReason {
    /// All workers busy and the admission queue is full
    QueueFull,
    /// Waited in the admission queue longer than allowed
    QueueTimeout,
    /// The manager's inbound channel is saturated
    Busy,
}

impl fmt::Display for OverloadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverloadReason::QueueFull => f.write_str("admission queue is full"),
            OverloadReason::QueueTimeout => f.write_str("timed out waiting for a worker"),
            OverloadReason::Busy => f.write_str("transform manager is busy"),
        }
    }
}

/// The error taxonomy delivered to every requester of a transform.
///
/// Workers convert collaborator failures ([`SourceError`], [`ImagingError`])
/// into one of these kinds before reporting, so the manager and the HTTP layer
/// never depend on collaborator-specific detail. The type is `Clone` because a
/// single failure fans out to every coalesced waiter.
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    /// Malformed or unsupported request (HTTP 400)
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    /// Source image does not exist (HTTP 404)
    #[error("Source image not found: {source_id}")]
    SourceNotFound { source_id: String },

    /// Decode, apply or encode failure, or an unexpected source failure (HTTP 500)
    #[error("Transform failed: {message}")]
    TransformFailure { message: String },

    /// Rejected for capacity reasons, safe to retry later (HTTP 503)
    #[error("Service overloaded: {reason}")]
    Overloaded { reason: OverloadReason },

    /// Broken invariant such as a fingerprint collision (HTTP 500)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TransformError {
    /// Convert a source failure for `source_id` into the taxonomy.
    pub fn from_source(source_id: &str, err: SourceError) -> Self {
        match err {
            SourceError::NotFound(_) | SourceError::InvalidPath(_) => {
                TransformError::SourceNotFound {
                    source_id: source_id.to_string(),
                }
            }
            other => TransformError::TransformFailure {
                message: other.to_string(),
            },
        }
    }

    pub fn overloaded(reason: OverloadReason) -> Self {
        TransformError::Overloaded { reason }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        TransformError::Internal {
            message: message.into(),
        }
    }
}

impl From<ImagingError> for TransformError {
    fn from(err: ImagingError) -> Self {
        TransformError::TransformFailure {
            message: err.to_string(),
        }
    }
}

//! Error kinds shared across the hub.

/// Errors surfaced by hub operations.
///
/// Filter rejections are not errors: a push that fails a filter is silently
/// not propagated. These variants cover the caller-visible failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HubError {
    /// Re-creation with an incompatible shape, or a route that would close a
    /// cycle.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// A path did not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// A string or JSON payload exceeds the maximum sample size.
    #[error("value of {size} bytes exceeds maximum sample size of {max}")]
    Overflow { size: usize, max: usize },

    /// Malformed JSON on extraction or conversion.
    #[error("format error: {0}")]
    FormatError(String),

    /// The remote end of the snapshot pipe closed.
    #[error("remote end closed")]
    Closed,

    /// Unrecoverable I/O condition.
    #[error("i/o fault: {0}")]
    Fault(String),

    /// A snapshot request arrived while one was already running.
    #[error("snapshot already in progress")]
    Busy,

    /// The formatter exceeded the snapshot pass limit.
    #[error("snapshot pass limit exceeded")]
    OutOfRange,

    /// Unknown snapshot format.
    #[error("unsupported format: {0}")]
    Unsupported(String),

    /// Unknown type tag or otherwise invalid argument.
    #[error("bad parameter: {0}")]
    BadParameter(String),
}

pub type Result<T> = std::result::Result<T, HubError>;

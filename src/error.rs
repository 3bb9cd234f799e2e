/// Errors from image decoding.
///
/// Every payload is a `&'static str` so the error path itself performs no
/// allocation; the engine only allocates through the caller's allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// No supported format signature matched the input.
    #[error("unrecognized image format")]
    UnsupportedFormat,

    /// A parser needed more bytes than the stream provided.
    #[error("unexpected end of {0} data")]
    Truncated(&'static str),

    /// Structurally present but semantically invalid data.
    #[error("corrupt {format} data: {reason}")]
    Corrupt {
        format: &'static str,
        reason: &'static str,
    },

    /// Valid data using a format variant this decoder does not handle.
    #[error("unsupported {format} variant: {reason}")]
    Unsupported {
        format: &'static str,
        reason: &'static str,
    },

    /// Declared dimensions exceed configured limits or would overflow
    /// size arithmetic. Raised before any pixel allocation.
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    /// The allocator returned null.
    #[error("allocator returned null")]
    OutOfMemory,
}

impl DecodeError {
    pub(crate) fn corrupt(format: &'static str, reason: &'static str) -> Self {
        DecodeError::Corrupt { format, reason }
    }

    pub(crate) fn unsupported(format: &'static str, reason: &'static str) -> Self {
        DecodeError::Unsupported { format, reason }
    }
}

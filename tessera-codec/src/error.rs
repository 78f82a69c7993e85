//! Codec errors.

/// Errors raised while decoding art files or compressed blobs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Input does not match the expected layout or declared size.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    /// LZ77 stream references bytes outside the produced output.
    #[error("corrupt stream: {0}")]
    CorruptStream(String),
}

impl CodecError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        CodecError::InvalidFormat(msg.into())
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        CodecError::CorruptStream(msg.into())
    }
}

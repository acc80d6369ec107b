/// Convenience result type used across svgaplay.
pub type SvgaResult<T> = Result<T, SvgaError>;

/// Top-level error taxonomy used by engine APIs.
#[derive(thiserror::Error, Debug)]
pub enum SvgaError {
    /// Corrupt or unsupported container, or missing movie metadata.
    #[error("decode error: {0}")]
    Decode(String),

    /// Archive entry or asset path escaping its root directory.
    #[error("security error: {0}")]
    Security(String),

    /// File, asset or network read failure (including timeouts).
    #[error("io error: {0}")]
    Io(String),

    /// Empty or otherwise unusable input stream.
    #[error("resource error: {0}")]
    Resource(String),

    /// Invalid caller-provided arguments or configuration.
    #[error("validation error: {0}")]
    Validation(String),

    /// The request was cancelled before it produced a result.
    #[error("cancelled")]
    Cancelled,

    /// Wrapped lower-level error from dependencies.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse error class, for callers that branch on failure type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Decode,
    Security,
    Io,
    Resource,
    Validation,
    Cancelled,
    Other,
}

impl SvgaError {
    /// Build a [`SvgaError::Decode`] value.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Build a [`SvgaError::Security`] value.
    pub fn security(msg: impl Into<String>) -> Self {
        Self::Security(msg.into())
    }

    /// Build a [`SvgaError::Io`] value.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Build a [`SvgaError::Resource`] value.
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    /// Build a [`SvgaError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Decode(_) => ErrorKind::Decode,
            Self::Security(_) => ErrorKind::Security,
            Self::Io(_) => ErrorKind::Io,
            Self::Resource(_) => ErrorKind::Resource,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Other(_) => ErrorKind::Other,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;

//! Error types for the numeric core.
//!
//! Mask construction, sampling, beam selection and collation return
//! [`ValleError`]. File and CLI plumbing uses `anyhow` on top of it.

/// Errors raised by the masking, sampling, beam and collation routines.
#[derive(Debug, thiserror::Error)]
pub enum ValleError {
    /// A tensor does not have the documented rank or shape.
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// Out-of-range sampling, beam or generation parameters.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input values violate the documented contract.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The inputs do not admit a result (e.g. no completed beam).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A collated example whose code length does not exceed its token length.
    #[error(
        "length invariant violated for example {index}: codes length {codes_len} must exceed tokens length {tokens_len}"
    )]
    LengthInvariant {
        index: usize,
        codes_len: usize,
        tokens_len: usize,
    },

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias for the numeric core.
pub type Result<T> = std::result::Result<T, ValleError>;

impl ValleError {
    pub fn invalid_shape(msg: impl Into<String>) -> Self {
        Self::InvalidShape(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

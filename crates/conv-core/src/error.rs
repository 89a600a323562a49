//! Shared error taxonomy for the convolution workspace.

use thiserror::Error;

/// Core error type shared by every crate in this workspace.
#[derive(Error, Debug)]
pub enum ConvError {
    /// Invariant violation between collaborators (mismatched specs,
    /// incompatible channel counts, plan size mismatch, ...). Surfaced
    /// only at construction time, never mid-stream.
    #[error("state error: {0}")]
    State(String),

    /// `len` requested of a convolver step exceeded the block size `M`
    /// it can produce. Handled locally by the caller (zero `len` and
    /// return); this variant exists for callers that want to observe
    /// it rather than silently truncate.
    #[error("buffer error: requested {requested} samples, max is {max}")]
    Buffer { requested: usize, max: usize },

    /// Failure to obtain FFT scratch space, or a worker panic that this
    /// implementation chose to upgrade to a stream-terminating fatal.
    /// Always fatal.
    #[error("allocation error: {0}")]
    Allocation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the workspace.
pub type ConvResult<T> = Result<T, ConvError>;

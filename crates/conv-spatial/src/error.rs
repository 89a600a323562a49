use thiserror::Error;

use conv_core::ConvError;

#[derive(Error, Debug)]
pub enum SpatialError {
    #[error("channel mismatch: expected {expected}, got {got}")]
    ChannelMismatch { expected: usize, got: usize },

    #[error("rate mismatch: hrtf uses {expected} Hz, got {got} Hz")]
    RateMismatch { expected: f64, got: f64 },

    #[error("hrtf database is empty")]
    HrtfEmpty,

    #[error("fft plan size mismatch: expected {expected}, got {got}")]
    PlanSizeMismatch { expected: usize, got: usize },

    #[error(transparent)]
    Conv(#[from] ConvError),
}

pub type SpatialResult<T> = Result<T, SpatialError>;

//! Sample type and stream specs.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single audio sample. The core convolution path is defined entirely
/// in terms of `f32`; there is no `f64` variant in this crate.
pub type Sample = f32;

/// Channel layout of a stream. Only `Mono` and `Stereo` are produced or
/// consumed by any module in this workspace; the rest exist so `Specs`
/// can describe an arbitrary upstream source a `Reader` might wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Channels {
    Mono,
    Stereo,
    Surround40,
    Surround51,
    Surround61,
    Surround71,
}

impl Channels {
    /// Number of interleaved samples per frame.
    pub const fn count(self) -> usize {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
            Channels::Surround40 => 4,
            Channels::Surround51 => 6,
            Channels::Surround61 => 7,
            Channels::Surround71 => 8,
        }
    }
}

/// Sample rate plus channel layout of a stream.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Specs {
    pub rate: f64,
    pub channels: Channels,
}

impl Specs {
    pub const fn new(rate: f64, channels: Channels) -> Self {
        Self { rate, channels }
    }

    pub const fn mono(rate: f64) -> Self {
        Self::new(rate, Channels::Mono)
    }

    pub const fn stereo(rate: f64) -> Self {
        Self::new(rate, Channels::Stereo)
    }
}

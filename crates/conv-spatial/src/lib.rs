//! conv-spatial: HRTF database and binaural convolution front-end.
//!
//! Builds on [`conv_dsp::Convolver`]: [`Source`] is the listener-relative
//! position an application mutates from any thread, [`Hrtf`] is the
//! (azimuth, elevation) keyed database of impulse responses, and
//! [`BinauralReader`]/[`BinauralSound`] stream a mono source through the
//! nearest HRTF pair, crossfading when the listener moves to a new pair.

mod binaural_reader;
mod error;
mod hrtf;
mod source;

pub use binaural_reader::{BinauralReader, BinauralSound, CROSSFADE_SAMPLES};
pub use error::{SpatialError, SpatialResult};
pub use hrtf::Hrtf;
pub use source::Source;

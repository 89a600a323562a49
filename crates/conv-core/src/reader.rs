//! Pull-based streaming source interface and its factory.

use crate::{ConvResult, Sample, Specs};

/// A pull-based audio stream. Implementations are driven from a single
/// consumer thread (typically a device's pull callback); `read` must
/// never block on anything other than upstream I/O.
pub trait Reader: Send {
    /// Rate and channel layout this reader produces.
    fn specs(&self) -> Specs;

    /// Whether `seek` is supported.
    fn is_seekable(&self) -> bool;

    /// Total length in samples per channel, or a negative value if
    /// unknown (e.g. an unbounded live source).
    fn length_samples(&self) -> i64;

    /// Current read position in samples per channel.
    fn position_samples(&self) -> i64;

    /// Seek to an absolute sample position. Implementations that are
    /// not seekable return `Err(ConvError::State(..))`.
    fn seek(&mut self, position: i64) -> ConvResult<()>;

    /// Fill `out` with up to `*len` interleaved samples. `*len` is
    /// IN: samples requested, OUT: samples actually produced (may be
    /// smaller at end of stream or a block boundary). `*eos` is
    /// OUT-only and is set once the stream has no more samples to
    /// give, including any drained tail.
    fn read(&mut self, out: &mut [Sample], len: &mut usize, eos: &mut bool) -> ConvResult<()>;
}

/// A durable, replayable description of a sound, as opposed to the
/// one-shot `Reader` it vends. Mirrors the Reader/Sound split the
/// wider audio library this core is drawn from uses at its boundaries:
/// a `Sound` can be asked for a fresh `Reader` as many times as needed
/// (e.g. once per voice triggered), while a `Reader` carries the
/// mutable playback position of a single stream instance.
pub trait Sound: Send + Sync {
    fn create_reader(&self) -> ConvResult<Box<dyn Reader>>;
}

//! Pre-planned real<->complex FFT pair and scratch-buffer allocation.

use std::sync::Arc;

use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use conv_core::{ConvError, ConvResult};

/// Default planning size used when a caller does not specify one.
pub const DEFAULT_FFT_SIZE: usize = 4096;

/// Owns a forward and inverse real<->complex FFT plan of a fixed size
/// N and vends correctly-sized scratch buffers. Shared (`Arc`) across
/// every `FftConvolver`/`ImpulseResponse` that was built with it, since
/// a single [`FftPlan`] must be used by both an impulse response and
/// every convolver that consumes it (mixing plan sizes is a programming
/// error by construction).
pub struct FftPlan {
    size: usize,
    measure_time_seconds: f64,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
}

impl FftPlan {
    /// Builds forward/inverse plans for a real signal of length `n`
    /// (must be a nonzero power of two). `measure_time_seconds` is kept
    /// for API parity with the planner this type is modeled on; a
    /// negative value conventionally means "plan exhaustively", but
    /// `realfft`'s planner has no tunable measurement budget to forward
    /// it to, so the value is stored and otherwise unused.
    pub fn new(n: usize, measure_time_seconds: f64) -> ConvResult<Self> {
        if n == 0 || !n.is_power_of_two() {
            return Err(ConvError::State(format!(
                "FFT plan size must be a nonzero power of two, got {n}"
            )));
        }
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(n);
        let inverse = planner.plan_fft_inverse(n);
        Ok(Self {
            size: n,
            measure_time_seconds,
            forward,
            inverse,
        })
    }

    /// Planning size N.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn measure_time_seconds(&self) -> f64 {
        self.measure_time_seconds
    }

    /// Forward real-to-complex transform. `time` holds exactly `size()`
    /// real samples; `freq` receives exactly `size()/2+1` complex bins.
    /// Unscaled, as produced by the planner.
    pub fn fft(&self, time: &mut [f32], freq: &mut [Complex32]) {
        self.forward
            .process(time, freq)
            .expect("fft: buffer sizes must match FftPlan::alloc_time_buffer/alloc_freq_buffer");
    }

    /// Inverse complex-to-real transform. Output is NOT rescaled by
    /// 1/N; callers divide by N at the per-bin multiply step.
    pub fn ifft(&self, freq: &mut [Complex32], time: &mut [f32]) {
        self.inverse
            .process(freq, time)
            .expect("ifft: buffer sizes must match FftPlan::alloc_time_buffer/alloc_freq_buffer");
    }

    /// A correctly sized, zeroed real scratch buffer (length `size()`).
    pub fn alloc_time_buffer(&self) -> Vec<f32> {
        self.forward.make_input_vec()
    }

    /// A correctly sized, zeroed complex scratch buffer (length
    /// `size()/2+1`).
    pub fn alloc_freq_buffer(&self) -> Vec<Complex32> {
        self.forward.make_output_vec()
    }
}

impl Default for FftPlan {
    fn default() -> Self {
        Self::new(DEFAULT_FFT_SIZE, 0.0).expect("default FFT size is a valid power of two")
    }
}

//! Single-partition FFT convolution core: the windowed "frequency delay
//! line" path used by [`crate::Convolver`], plus a self-contained
//! classical overlap-add path for callers that just want to convolve a
//! short IR against a stream without any partitioning machinery.

use std::sync::Arc;

use num_complex::Complex32;

use conv_core::{ConvError, ConvResult};

use crate::fft_plan::FftPlan;
use crate::impulse_response::Partition;

/// `acc[k] += x[k] * h[k] / n` for every bin. Shared by the FDL
/// accumulation path and the classical overlap-add path so the two
/// never drift apart on scaling convention.
pub(crate) fn accumulate_bins(acc: &mut [Complex32], x: &[Complex32], h: &[Complex32], n: usize) {
    debug_assert_eq!(acc.len(), x.len());
    debug_assert_eq!(acc.len(), h.len());
    let norm = 1.0 / n as f32;
    for ((a, xk), hk) in acc.iter_mut().zip(x.iter()).zip(h.iter()) {
        *a += xk * hk * norm;
    }
}

/// Windowed single-partition convolver. Holds the N=2M shift buffer and
/// the scratch accumulator for one partition's worth of work; the
/// partitioned impulse response itself lives outside this type so many
/// `FftConvolver`s (one per partition) can share one
/// [`crate::ImpulseResponse`].
///
/// Also usable standalone against a single, short (<=M sample) impulse
/// response via [`Self::next`]/[`Self::get_tail`], which take a
/// completely separate, non-windowed overlap-add code path.
pub struct FftConvolver {
    plan: Arc<FftPlan>,
    m: usize,
    n: usize,
    /// Shift buffer: previous block's M samples, then current block's M
    /// samples. Only ever the input to a forward FFT.
    shift_buffer: Vec<f32>,
    /// Single IR spectrum for the standalone `next`/`get_tail` path.
    ir: Option<Arc<Partition>>,
    /// Overlap-add tail for the standalone path, length `m - 1`.
    tail: Vec<f32>,
}

impl FftConvolver {
    pub fn new(plan: Arc<FftPlan>) -> Self {
        let n = plan.size();
        let m = n / 2;
        Self {
            shift_buffer: vec![0.0; n],
            tail: vec![0.0; m.saturating_sub(1)],
            ir: None,
            plan,
            m,
            n,
        }
    }

    /// Attaches a single-partition impulse response for the standalone
    /// `next`/`get_tail` path. The IR's own plan must match.
    pub fn set_ir(&mut self, ir: Arc<Partition>) {
        self.ir = Some(ir);
    }

    pub fn block_size(&self) -> usize {
        self.m
    }

    /// Shifts up to M samples of `input` into the windowed buffer and
    /// forward-FFTs it, producing this block's spectrum. Used by
    /// `Convolver` to compute partition 0's contribution on the hot
    /// path; the returned spectrum is also what gets stored into the
    /// frequency delay line for later partitions to consume.
    ///
    /// `input.len()` may be less than M (the remainder is zero-padded,
    /// covering a short final real block); `input.len() > M` is a
    /// buffer-capacity violation and returns `ConvError::Buffer`
    /// without touching any internal state, rather than panicking.
    pub fn next_fdl_in(&mut self, input: &[f32]) -> ConvResult<Vec<Complex32>> {
        if input.len() > self.m {
            return Err(ConvError::Buffer {
                requested: input.len(),
                max: self.m,
            });
        }
        self.shift_buffer.copy_within(self.m.., 0);
        let pad = self.m - input.len();
        self.shift_buffer[self.m..self.m + pad]
            .iter_mut()
            .for_each(|s| *s = 0.0);
        self.shift_buffer[self.m + pad..].copy_from_slice(input);
        let mut time_buf = self.shift_buffer.clone();
        let mut freq_buf = self.plan.alloc_freq_buffer();
        self.plan.fft(&mut time_buf, &mut freq_buf);
        Ok(freq_buf)
    }

    /// Accumulates one partition's contribution (`spectrum * ir / n`)
    /// into `acc`.
    pub fn next_fdl_acc(&self, spectrum: &[Complex32], ir: &Partition, acc: &mut [Complex32]) {
        accumulate_bins(acc, spectrum, ir.bins(), self.n);
    }

    /// Inverse-transforms the fully accumulated spectrum and writes the
    /// valid M-sample output block: the second half of the N-sample
    /// IFFT result. The first half corresponds to inter-block aliasing
    /// that the shift-buffer windowing already cancels out, matching
    /// the overlap-save structure this scheme follows.
    pub fn ifft_fdl(&self, acc: &mut [Complex32], out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.m);
        let mut time_buf = self.plan.alloc_time_buffer();
        self.plan.ifft(acc, &mut time_buf);
        out.copy_from_slice(&time_buf[self.m..]);
    }

    /// Classical overlap-add convolution of one M-sample block against
    /// the attached single-partition IR. Zero-pads the block to N,
    /// transforms, multiplies, inverse-transforms, adds the stored tail
    /// from the previous call, and stashes the new tail.
    pub fn next(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), self.m);
        debug_assert_eq!(output.len(), self.m);
        let ir = self
            .ir
            .clone()
            .expect("FftConvolver::next called without an attached impulse response");

        let mut time_buf = self.plan.alloc_time_buffer();
        time_buf[..self.m].copy_from_slice(input);
        let mut freq_buf = self.plan.alloc_freq_buffer();
        self.plan.fft(&mut time_buf, &mut freq_buf);

        let mut acc = self.plan.alloc_freq_buffer();
        accumulate_bins(&mut acc, &freq_buf, ir.bins(), self.n);

        let mut time_out = self.plan.alloc_time_buffer();
        self.plan.ifft(&mut acc, &mut time_out);

        let tail_len = self.tail.len();
        for i in 0..self.m {
            let carried = if i < tail_len { self.tail[i] } else { 0.0 };
            output[i] = time_out[i] + carried;
        }
        for i in 0..tail_len {
            self.tail[i] = time_out[self.m + i];
        }
    }

    /// Flushes the stored overlap-add tail (the portion of the last
    /// block's convolution that extends past its own block boundary)
    /// and clears it.
    pub fn get_tail(&mut self, output: &mut [f32]) {
        let n = output.len().min(self.tail.len());
        output[..n].copy_from_slice(&self.tail[..n]);
        for s in &mut output[n.max(0)..] {
            *s = 0.0;
        }
        self.tail.iter_mut().for_each(|s| *s = 0.0);
    }

    /// Clears all internal state: the windowed shift buffer and the
    /// overlap-add tail. Does not detach the IR.
    pub fn clear(&mut self) {
        self.shift_buffer.iter_mut().for_each(|s| *s = 0.0);
        self.tail.iter_mut().for_each(|s| *s = 0.0);
    }
}

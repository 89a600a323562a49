//! Multi-partition real-time convolution engine: partition 0 is
//! computed synchronously on the caller's thread for minimum latency;
//! partitions 1..P-1 are computed on a background thread pool and
//! pipelined one block behind, hiding their cost behind the time
//! between calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use num_complex::Complex32;
use parking_lot::Mutex;

use conv_core::{ConvError, ConvResult};

use crate::fft_convolver::{accumulate_bins, FftConvolver};
use crate::fft_plan::FftPlan;
use crate::impulse_response::ImpulseResponse;
use crate::thread_pool::{JoinHandle, ThreadPool};

/// Single-channel real-time partitioned convolver.
///
/// Holds one ring buffer of past input spectra (the "frequency delay
/// line") of depth `P` = number of partitions in the attached impulse
/// response, plus a single [`FftConvolver`] used only to window and
/// forward-transform the live input stream (all partitions share that
/// one transform of the input; only the impulse response is
/// partitioned).
pub struct Convolver {
    plan: Arc<FftPlan>,
    ir: Arc<ImpulseResponse>,
    channel: usize,
    pool: Arc<ThreadPool>,

    input_transform: FftConvolver,
    /// Ring buffer of past input spectra, depth `num_partitions()`.
    delay_line: Vec<Arc<Vec<Complex32>>>,
    /// Index of the most recently written (i.e. "0 blocks old") slot.
    head: usize,

    acc: Arc<Mutex<Vec<Complex32>>>,
    pending: Vec<JoinHandle<()>>,
    reset_flag: Arc<AtomicBool>,

    /// Number of consecutive zero-input (`None`) blocks fed since the
    /// last real input block. The reverberation tail of the last real
    /// block needs one block per partition to fully drain through the
    /// frequency delay line, so end-of-stream is only declared once
    /// this reaches `num_partitions()`.
    tail_counter: usize,
    eos: bool,
    /// Set once a background partition worker panics. A poisoned
    /// convolver fails every subsequent `get_next` call with
    /// `ConvError::Allocation` until an explicit `reset()`.
    poisoned: bool,
}

impl Convolver {
    pub fn new(ir: Arc<ImpulseResponse>, channel: usize, pool: Arc<ThreadPool>) -> ConvResult<Self> {
        if channel >= ir.specs().channels.count() {
            return Err(ConvError::State(format!(
                "channel index {channel} out of range for impulse response with {} channels",
                ir.specs().channels.count()
            )));
        }
        let plan = Arc::clone(ir.plan());
        let p = ir.num_partitions();
        let empty_spectrum: Arc<Vec<Complex32>> = Arc::new(plan.alloc_freq_buffer());
        Ok(Self {
            input_transform: FftConvolver::new(Arc::clone(&plan)),
            delay_line: vec![empty_spectrum; p.max(1)],
            head: 0,
            acc: Arc::new(Mutex::new(plan.alloc_freq_buffer())),
            pending: Vec::new(),
            reset_flag: Arc::new(AtomicBool::new(false)),
            tail_counter: 0,
            eos: false,
            poisoned: false,
            plan,
            ir,
            channel,
            pool,
        })
    }

    pub fn block_size(&self) -> usize {
        self.input_transform.block_size()
    }

    pub fn num_partitions(&self) -> usize {
        self.delay_line.len()
    }

    /// Length, in samples, of the final meaningful output block once
    /// the tail has fully drained: `ir_length mod M`, or `M` if that
    /// remainder is zero. Everything past this many samples in the
    /// last block is padding, not signal.
    pub fn final_block_len(&self) -> usize {
        let m = self.block_size();
        let rem = self.ir.length() % m;
        if rem == 0 {
            m
        } else {
            rem
        }
    }

    /// True once a run of `None` inputs has drained the impulse
    /// response's reverberation tail completely.
    pub fn is_eos(&self) -> bool {
        self.eos
    }

    /// True once a background partition worker has panicked; every
    /// `get_next` call fails with `ConvError::Allocation` until `reset`.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Produces the next output block. `input` is `Some(at most M
    /// samples)` while the source is still live, or `None` to drain the
    /// tail after the source has ended (equivalent to feeding a zero
    /// block, except it also advances the tail counter that determines
    /// end-of-stream).
    ///
    /// `*len` is in/out, mirroring `conv_core::Reader::read`: on entry
    /// it is the caller's requested length and must not exceed the
    /// block size `M`; violating that precondition zeroes `*len` and
    /// returns `Err(ConvError::Buffer)` without touching any other
    /// state or `*eos`, for the caller to handle locally (this crate's
    /// own readers never violate it, since they always request exactly
    /// one block). On success `*len` is set to `M`, or to
    /// [`Self::final_block_len`] on the call that drains the last of
    /// the tail, and `*eos` is set accordingly. Once poisoned by a
    /// background worker panic (see [`Self::is_poisoned`]), every call
    /// fails with `ConvError::Allocation` until an explicit `reset()`.
    pub fn get_next(
        &mut self,
        input: Option<&[f32]>,
        output: &mut [f32],
        len: &mut usize,
        eos: &mut bool,
    ) -> ConvResult<()> {
        let block_size = self.block_size();
        debug_assert_eq!(output.len(), block_size);
        if let Some(inp) = input {
            debug_assert_eq!(inp.len(), block_size);
        }

        let requested = *len;
        if requested > block_size {
            *len = 0;
            return Err(ConvError::Buffer {
                requested,
                max: block_size,
            });
        }

        if self.poisoned {
            *len = 0;
            return Err(ConvError::Allocation(
                "convolver is poisoned by an earlier background worker panic".into(),
            ));
        }

        if self.eos {
            *len = 0;
            *eos = true;
            return Ok(());
        }

        // Background partitions dispatched last call contribute to
        // THIS block; wait for them to land in `acc`.
        for handle in self.pending.drain(..) {
            if let Err(err) = handle.join_quiet() {
                self.poisoned = true;
                *len = 0;
                return Err(err);
            }
        }

        let num_partitions = self.delay_line.len();
        let zero_block;
        let block = match input {
            Some(inp) => {
                self.tail_counter = 0;
                inp
            }
            None => {
                self.tail_counter += 1;
                zero_block = vec![0.0f32; block_size];
                &zero_block
            }
        };
        let spectrum = self.input_transform.next_fdl_in(block)?;

        {
            let mut acc = self.acc.lock();
            let partition0 = &self.ir.channel(self.channel)[0];
            accumulate_bins(&mut acc, &spectrum, partition0.bins(), self.plan.size());
        }

        {
            let mut acc = self.acc.lock();
            self.input_transform.ifft_fdl(&mut acc, output);
            acc.iter_mut().for_each(|c| *c = Complex32::new(0.0, 0.0));
        }

        let new_head = (self.head + num_partitions - 1) % num_partitions;
        self.delay_line[new_head] = Arc::new(spectrum);
        self.head = new_head;

        for p in 1..num_partitions {
            let slot = (new_head + p) % num_partitions;
            let old_spectrum = Arc::clone(&self.delay_line[slot]);
            let ir_partition = Arc::clone(&self.ir.channel(self.channel)[p]);
            let acc = Arc::clone(&self.acc);
            let n = self.plan.size();
            let reset_flag = Arc::clone(&self.reset_flag);
            let handle = self.pool.enqueue(move || {
                if reset_flag.load(Ordering::Acquire) {
                    return;
                }
                let mut local = vec![Complex32::new(0.0, 0.0); old_spectrum.len()];
                accumulate_bins(&mut local, &old_spectrum, ir_partition.bins(), n);
                let mut acc = acc.lock();
                for (a, l) in acc.iter_mut().zip(local.iter()) {
                    *a += l;
                }
            });
            self.pending.push(handle);
        }

        self.eos = input.is_none() && self.tail_counter >= num_partitions;
        *eos = self.eos;
        *len = if self.eos { self.final_block_len() } else { block_size };
        Ok(())
    }

    /// Clears all internal state: the windowed input buffer, the
    /// frequency delay line, and the accumulator. Any in-flight
    /// background jobs are signalled to discard their contribution
    /// rather than writing into the cleared accumulator.
    pub fn reset(&mut self) {
        self.reset_flag.store(true, Ordering::Release);
        for handle in self.pending.drain(..) {
            // Discard rather than propagate: a panic from a worker
            // dispatched before this reset is moot once every partition
            // is about to be zeroed anyway.
            let _ = handle.join_quiet();
        }
        self.input_transform.clear();
        let empty_spectrum: Arc<Vec<Complex32>> = Arc::new(self.plan.alloc_freq_buffer());
        self.delay_line.iter_mut().for_each(|s| *s = Arc::clone(&empty_spectrum));
        self.head = 0;
        self.tail_counter = 0;
        self.eos = false;
        self.poisoned = false;
        self.acc.lock().iter_mut().for_each(|c| *c = Complex32::new(0.0, 0.0));
        self.reset_flag.store(false, Ordering::Release);
    }

    /// Swaps in a new impulse response. The replacement's partition
    /// count and FFT plan size must match the one this convolver was
    /// built with; mismatches are a configuration error the caller
    /// resolves by building a fresh `Convolver` instead.
    pub fn set_impulse_response(&mut self, ir: Arc<ImpulseResponse>) -> ConvResult<()> {
        if ir.num_partitions() != self.delay_line.len() {
            return Err(ConvError::State(format!(
                "partition count mismatch: convolver has {}, new impulse response has {}",
                self.delay_line.len(),
                ir.num_partitions()
            )));
        }
        if ir.plan().size() != self.plan.size() {
            return Err(ConvError::State(format!(
                "FFT plan size mismatch: convolver has {}, new impulse response has {}",
                self.plan.size(),
                ir.plan().size()
            )));
        }
        if self.channel >= ir.specs().channels.count() {
            return Err(ConvError::State(format!(
                "channel index {} out of range for replacement impulse response",
                self.channel
            )));
        }
        self.reset();
        self.ir = ir;
        Ok(())
    }
}

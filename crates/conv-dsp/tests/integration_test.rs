//! End-to-end scenarios exercising the public `conv-dsp` surface:
//! identity and short low-pass impulse responses, multi-partition
//! delay behavior, and deterministic reset.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use conv_core::{ConvResult, Reader, Sample, Sound, Specs};
use conv_dsp::{Convolver, ConvolverReader, ConvolverSound, FftPlan, ImpulseResponse, ThreadPool};

/// Drives one full-block `get_next` call, discarding the `len`/`eos`
/// out-parameters for scenarios that only care about the samples.
fn step(conv: &mut Convolver, input: Option<&[f32]>, out: &mut [f32]) -> bool {
    let mut len = out.len();
    let mut eos = false;
    conv.get_next(input, out, &mut len, &mut eos).unwrap();
    eos
}

struct VecReader {
    specs: Specs,
    data: Vec<Sample>,
    pos: usize,
}

impl Reader for VecReader {
    fn specs(&self) -> Specs {
        self.specs
    }
    fn is_seekable(&self) -> bool {
        true
    }
    fn length_samples(&self) -> i64 {
        self.data.len() as i64
    }
    fn position_samples(&self) -> i64 {
        self.pos as i64
    }
    fn seek(&mut self, position: i64) -> ConvResult<()> {
        self.pos = position as usize;
        Ok(())
    }
    fn read(&mut self, out: &mut [Sample], len: &mut usize, eos: &mut bool) -> ConvResult<()> {
        let remaining = self.data.len().saturating_sub(self.pos);
        let n = (*len).min(out.len()).min(remaining);
        out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        *len = n;
        *eos = self.pos >= self.data.len();
        Ok(())
    }
}

struct VecSound {
    specs: Specs,
    data: Vec<Sample>,
}

impl Sound for VecSound {
    fn create_reader(&self) -> ConvResult<Box<dyn Reader>> {
        Ok(Box::new(VecReader {
            specs: self.specs,
            data: self.data.clone(),
            pos: 0,
        }))
    }
}

fn drain(reader: &mut dyn Reader) -> Vec<Sample> {
    let mut collected = Vec::new();
    let mut buf = vec![0.0f32; 32];
    loop {
        let mut len = buf.len();
        let mut eos = false;
        reader.read(&mut buf, &mut len, &mut eos).unwrap();
        collected.extend_from_slice(&buf[..len]);
        if eos {
            break;
        }
    }
    collected
}

#[test]
fn s1_identity_ir_reproduces_input_through_the_reader() {
    let plan = Arc::new(FftPlan::new(16, 0.0).unwrap());
    let ir = Arc::new(ImpulseResponse::from_buffer(&[1.0], Specs::mono(48000.0), plan).unwrap());
    let pool = Arc::new(ThreadPool::new(2).unwrap());

    let data: Vec<Sample> = (0..40).map(|i| ((i as f32) * 0.37).sin()).collect();
    let sound = ConvolverSound::new(
        Arc::new(VecSound {
            specs: Specs::mono(48000.0),
            data: data.clone(),
        }),
        ir,
        pool,
    );
    let mut reader = sound.create_reader().unwrap();
    let out = drain(&mut *reader);

    assert!(out.len() >= data.len());
    for (got, expected) in out.iter().zip(data.iter()) {
        assert!((got - expected).abs() < 1e-2, "{got} vs {expected}");
    }
}

#[test]
fn s2_two_tap_lowpass_smooths_a_step() {
    // y[n] = 0.5*x[n] + 0.5*x[n-1]
    let plan = Arc::new(FftPlan::new(16, 0.0).unwrap());
    let ir = Arc::new(
        ImpulseResponse::from_buffer(&[0.5, 0.5], Specs::mono(48000.0), plan).unwrap(),
    );
    let pool = Arc::new(ThreadPool::new(2).unwrap());
    let mut conv = Convolver::new(ir, 0, pool).unwrap();
    let m = conv.block_size();

    let block = vec![1.0f32; m];
    let mut out1 = vec![0.0f32; m];
    step(&mut conv, Some(&block), &mut out1);
    // first sample of the step response should be exactly half, not the full step
    assert!((out1[0] - 0.5).abs() < 1e-2, "{}", out1[0]);
    for s in &out1[1..] {
        assert!((s - 1.0).abs() < 1e-2, "{s}");
    }
}

#[test]
fn s3_two_partitions_split_an_impulse_response_longer_than_one_block() {
    // fft size 8 -> M = 4; IR length 6 spans two partitions.
    let plan = Arc::new(FftPlan::new(8, 0.0).unwrap());
    let mut ir_samples = vec![0.0f32; 6];
    ir_samples[0] = 1.0;
    ir_samples[5] = 0.5;
    let ir = Arc::new(ImpulseResponse::from_buffer(&ir_samples, Specs::mono(48000.0), plan).unwrap());
    assert_eq!(ir.num_partitions(), 2);

    let pool = Arc::new(ThreadPool::new(3).unwrap());
    let mut conv = Convolver::new(ir, 0, pool).unwrap();
    let m = conv.block_size();

    let impulse = {
        let mut v = vec![0.0f32; m];
        v[0] = 1.0;
        v
    };
    let zero = vec![0.0f32; m];
    let mut out = vec![0.0f32; m];

    step(&mut conv, Some(&impulse), &mut out);
    assert!((out[0] - 1.0).abs() < 1e-2);

    let mut total_tail_energy = 0.0f32;
    for _ in 0..3 {
        step(&mut conv, Some(&zero), &mut out);
        total_tail_energy += out.iter().map(|s| s.abs()).sum::<f32>();
    }
    assert!(total_tail_energy > 0.1, "expected the delayed tap to surface within a few blocks");
}

#[test]
fn s4_reset_makes_subsequent_output_deterministic() {
    let plan = Arc::new(FftPlan::new(16, 0.0).unwrap());
    let ir = Arc::new(
        ImpulseResponse::from_buffer(&[1.0, 0.3, 0.1], Specs::mono(48000.0), plan).unwrap(),
    );
    let pool = Arc::new(ThreadPool::new(2).unwrap());
    let mut conv = Convolver::new(ir, 0, pool).unwrap();
    let m = conv.block_size();

    let probe: Vec<f32> = (0..m).map(|i| (i as f32) * 0.2).collect();
    let mut out_before = vec![0.0f32; m];
    step(&mut conv, Some(&probe), &mut out_before);

    conv.reset();

    let noise = vec![9.0f32; m];
    let mut discard = vec![0.0f32; m];
    step(&mut conv, Some(&noise), &mut discard);
    conv.reset();

    let mut out_after = vec![0.0f32; m];
    step(&mut conv, Some(&probe), &mut out_after);

    for (a, b) in out_before.iter().zip(out_after.iter()) {
        assert!((a - b).abs() < 1e-4, "{a} vs {b}");
    }
}

#[test]
fn s5_k_threaded_and_single_threaded_pools_agree_within_tolerance() {
    // fft size 8 -> M = 4; IR spans four partitions so there is real
    // background-thread work for a multi-worker pool to parallelize.
    let mut ir_samples = vec![0.0f32; 16];
    let mut rng = StdRng::seed_from_u64(42);
    for s in &mut ir_samples {
        *s = rng.gen_range(-0.5..0.5);
    }

    let mut input_rng = StdRng::seed_from_u64(7);
    let input: Vec<f32> = (0..64).map(|_| input_rng.gen_range(-1.0..1.0)).collect();

    let run_with = |workers: usize| -> Vec<f32> {
        let plan = Arc::new(FftPlan::new(8, 0.0).unwrap());
        let ir =
            Arc::new(ImpulseResponse::from_buffer(&ir_samples, Specs::mono(48000.0), plan).unwrap());
        let pool = Arc::new(ThreadPool::new(workers).unwrap());
        let mut conv = Convolver::new(ir, 0, pool).unwrap();
        let m = conv.block_size();

        let mut collected = Vec::new();
        for block in input.chunks(m) {
            let mut padded = vec![0.0f32; m];
            padded[..block.len()].copy_from_slice(block);
            let mut out = vec![0.0f32; m];
            step(&mut conv, Some(&padded), &mut out);
            collected.extend_from_slice(&out);
        }
        for _ in 0..conv.num_partitions() {
            let mut out = vec![0.0f32; m];
            if step(&mut conv, None, &mut out) {
                collected.extend_from_slice(&out[..conv.final_block_len()]);
                break;
            }
            collected.extend_from_slice(&out);
        }
        collected
    };

    let single = run_with(1);
    let multi = run_with(4);
    assert_eq!(single.len(), multi.len());
    for (a, b) in single.iter().zip(multi.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
    }
}

/// `y[n] = sum_k x[n-k] * h[k]`, the `O(len(x) * len(h))` definition a
/// partitioned FFT convolution is supposed to reproduce. Output length
/// is `x.len() + h.len() - 1`.
fn naive_convolve(x: &[f32], h: &[f32]) -> Vec<f32> {
    let mut y = vec![0.0f32; x.len() + h.len() - 1];
    for (n, xn) in x.iter().enumerate() {
        for (k, hk) in h.iter().enumerate() {
            y[n + k] += xn * hk;
        }
    }
    y
}

#[test]
fn property1_random_ir_and_signal_reproduce_direct_convolution() {
    // fft size 8 -> M = 4; a 17-tap IR spans five partitions so the
    // tail has to drain across several background-thread blocks.
    let mut ir_rng = StdRng::seed_from_u64(99);
    let ir_samples: Vec<f32> = (0..17).map(|_| ir_rng.gen_range(-0.5..0.5)).collect();

    let mut input_rng = StdRng::seed_from_u64(123);
    let input: Vec<f32> = (0..50).map(|_| input_rng.gen_range(-1.0..1.0)).collect();

    let plan = Arc::new(FftPlan::new(8, 0.0).unwrap());
    let ir = Arc::new(ImpulseResponse::from_buffer(&ir_samples, Specs::mono(48000.0), plan).unwrap());
    let pool = Arc::new(ThreadPool::new(3).unwrap());
    let mut conv = Convolver::new(ir, 0, pool).unwrap();
    let m = conv.block_size();

    let mut collected = Vec::new();
    for block in input.chunks(m) {
        let mut padded = vec![0.0f32; m];
        padded[..block.len()].copy_from_slice(block);
        let mut out = vec![0.0f32; m];
        step(&mut conv, Some(&padded), &mut out);
        collected.extend_from_slice(&out);
    }
    for _ in 0..conv.num_partitions() {
        let mut out = vec![0.0f32; m];
        if step(&mut conv, None, &mut out) {
            collected.extend_from_slice(&out[..conv.final_block_len()]);
            break;
        }
        collected.extend_from_slice(&out);
    }

    let want = naive_convolve(&input, &ir_samples);
    assert_eq!(want.len(), input.len() + ir_samples.len() - 1);
    collected.truncate(want.len());
    assert_eq!(collected.len(), want.len(), "drained output must cover the full tail");

    for (i, (got, want)) in collected.iter().zip(want.iter()).enumerate() {
        let tolerance = 1e-4 * want.abs().max(1.0);
        assert!(
            (got - want).abs() <= tolerance,
            "sample {i}: got {got}, want {want} (tolerance {tolerance})"
        );
    }
}

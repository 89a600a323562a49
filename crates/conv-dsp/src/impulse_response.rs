//! Frequency-domain partitioning of a fully-buffered impulse response.

use std::sync::Arc;

use num_complex::Complex32;

use conv_core::{Channels, ConvError, ConvResult, Reader, Sample, Specs};

use crate::fft_plan::FftPlan;

/// One partition's frequency-domain spectrum: `size()/2+1` complex
/// bins, the result of zero-padding a `size()/2`-sample time-domain
/// segment to `size()` and forward-FFT-ing it. Cheap to share: every
/// [`crate::FftConvolver`] that reads this partition holds its own
/// `Arc` clone, never a mutable view.
#[derive(Debug, Clone)]
pub struct Partition {
    bins: Vec<Complex32>,
}

impl Partition {
    pub fn bins(&self) -> &[Complex32] {
        &self.bins
    }
}

/// A fully-realized impulse response, pre-split per channel into
/// fixed-size frequency-domain partitions. Immutable after
/// construction; shared as `Arc<ImpulseResponse>` across any number of
/// convolvers built from it.
pub struct ImpulseResponse {
    specs: Specs,
    length_samples: usize,
    plan: Arc<FftPlan>,
    channels: Vec<Vec<Arc<Partition>>>,
}

impl ImpulseResponse {
    /// Splits a fully-buffered, interleaved sample buffer into
    /// partitions of length `plan.size()/2`, zero-padding the final
    /// partition of each channel.
    pub fn from_buffer(buffer: &[Sample], specs: Specs, plan: Arc<FftPlan>) -> ConvResult<Self> {
        let channel_count = specs.channels.count();
        if channel_count == 0 || buffer.is_empty() {
            return Err(ConvError::State(
                "impulse response buffer must be nonempty".into(),
            ));
        }
        let length_samples = buffer.len() / channel_count;
        if length_samples == 0 {
            return Err(ConvError::State(
                "impulse response must contain at least one sample".into(),
            ));
        }

        let n = plan.size();
        let m = n / 2;
        let num_partitions = length_samples.div_ceil(m);

        let mut channels = Vec::with_capacity(channel_count);
        for c in 0..channel_count {
            let mut partitions = Vec::with_capacity(num_partitions);
            for p in 0..num_partitions {
                let mut time_buf = plan.alloc_time_buffer();
                let start = p * m;
                let end = (start + m).min(length_samples);
                for i in start..end {
                    time_buf[i - start] = buffer[i * channel_count + c];
                }
                let mut freq_buf = plan.alloc_freq_buffer();
                plan.fft(&mut time_buf, &mut freq_buf);
                partitions.push(Arc::new(Partition { bins: freq_buf }));
            }
            channels.push(partitions);
        }

        Ok(Self {
            specs,
            length_samples,
            plan,
            channels,
        })
    }

    /// Drains a finite `Reader` into a buffer and delegates to
    /// [`Self::from_buffer`]. Rejects readers that cannot report a
    /// finite length, since an impulse response must be realized in a
    /// single pass, not streamed lazily.
    pub fn from_reader(reader: &mut dyn Reader, plan: Arc<FftPlan>) -> ConvResult<Self> {
        let specs = reader.specs();
        let total_frames = reader.length_samples();
        if total_frames < 0 {
            return Err(ConvError::State(
                "impulse response source must be a finite, fully-realized stream".into(),
            ));
        }
        let channel_count = specs.channels.count();
        let mut buffer = vec![0.0f32; total_frames as usize * channel_count];
        let mut filled = 0usize;
        loop {
            let remaining = buffer.len() - filled;
            if remaining == 0 {
                break;
            }
            let mut len = remaining;
            let mut eos = false;
            reader.read(&mut buffer[filled..], &mut len, &mut eos)?;
            filled += len;
            if len == 0 || eos {
                break;
            }
        }
        buffer.truncate(filled);
        Self::from_buffer(&buffer, specs, plan)
    }

    pub fn specs(&self) -> Specs {
        self.specs
    }

    pub fn length(&self) -> usize {
        self.length_samples
    }

    pub fn num_partitions(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn channel(&self, c: usize) -> &[Arc<Partition>] {
        &self.channels[c]
    }

    pub fn plan(&self) -> &Arc<FftPlan> {
        &self.plan
    }
}

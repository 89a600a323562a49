//! Streams a source `Reader` through a bank of per-channel
//! `Convolver`s, exposed itself as a `Reader`/`Sound` pair.

use std::sync::Arc;

use conv_core::{ConvError, ConvResult, Reader, Sample, Sound, Specs};

use crate::convolver::Convolver;
use crate::impulse_response::ImpulseResponse;
use crate::thread_pool::ThreadPool;

/// Convolves every channel of a source reader against an impulse
/// response in real time, one [`Convolver`] per channel. Channels are
/// processed in parallel via scoped threads; the channel count for any
/// stream this crate handles is small and fixed, so one thread per
/// channel (rather than routing through the partition-level
/// `ThreadPool`) keeps the fan-out simple.
pub struct ConvolverReader {
    source: Box<dyn Reader>,
    convolvers: Vec<Convolver>,
    specs: Specs,
    block_size: usize,
    in_block: Vec<f32>,
    out_blocks: Vec<Vec<f32>>,
    interleaved: Vec<Sample>,
    cursor: usize,
    filled: usize,
    source_eos: bool,
    tail_eos: bool,
}

impl ConvolverReader {
    pub fn new(
        source: Box<dyn Reader>,
        ir: Arc<ImpulseResponse>,
        pool: Arc<ThreadPool>,
    ) -> ConvResult<Self> {
        let specs = source.specs();
        let channel_count = specs.channels.count();
        let ir_channel_count = ir.specs().channels.count();
        if ir_channel_count != 1 && ir_channel_count != channel_count {
            return Err(ConvError::State(format!(
                "impulse response channel count must be 1 or match the source's {channel_count}, got {ir_channel_count}"
            )));
        }
        if ir.specs().rate != specs.rate {
            return Err(ConvError::State(format!(
                "sample rate mismatch: source is {}, impulse response is {}",
                specs.rate,
                ir.specs().rate
            )));
        }
        // A mono impulse response is shared across every channel of a
        // multichannel source; otherwise channel c of the source uses
        // channel c of the impulse response.
        let mut convolvers = Vec::with_capacity(channel_count);
        for c in 0..channel_count {
            let ir_channel = if ir_channel_count == 1 { 0 } else { c };
            convolvers.push(Convolver::new(Arc::clone(&ir), ir_channel, Arc::clone(&pool))?);
        }
        let block_size = convolvers[0].block_size();
        Ok(Self {
            in_block: vec![0.0; block_size * channel_count],
            out_blocks: vec![vec![0.0; block_size]; channel_count],
            interleaved: vec![0.0; block_size * channel_count],
            source,
            convolvers,
            specs,
            block_size,
            cursor: 0,
            filled: 0,
            source_eos: false,
            tail_eos: false,
        })
    }

    fn channel_count(&self) -> usize {
        self.convolvers.len()
    }

    /// Pulls and convolves the next block from the source, parking it
    /// in `interleaved` for `read` to drain. A short final read is
    /// zero-padded to a full block and still fed as real (`Some`)
    /// input; only once the source has nothing left at all does this
    /// switch to feeding `None`, so each convolver can count down its
    /// own reverberation tail. `read` keeps calling this until every
    /// convolver reports end-of-stream.
    fn fill_next_block(&mut self) -> ConvResult<()> {
        let channel_count = self.channel_count();
        self.in_block.iter_mut().for_each(|s| *s = 0.0);

        let mut got_real_input = false;
        if !self.source_eos {
            let mut len = self.block_size * channel_count;
            let mut eos = false;
            // read() errors here are not recoverable mid-stream; treat
            // as end of stream rather than panicking the audio thread.
            match self.source.read(&mut self.in_block, &mut len, &mut eos) {
                Ok(()) => {
                    got_real_input = len > 0;
                    if eos {
                        self.source_eos = true;
                    }
                }
                Err(_) => {
                    self.source_eos = true;
                }
            }
        }

        let block_size = self.block_size;
        let channels = &mut self.convolvers;
        let input = &self.in_block;
        let outputs = &mut self.out_blocks;

        let results: Vec<ConvResult<(usize, bool)>> = std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(channel_count);
            for (c, (conv, out)) in channels.iter_mut().zip(outputs.iter_mut()).enumerate() {
                let mut mono_in = vec![0.0f32; block_size];
                if got_real_input {
                    for i in 0..block_size {
                        mono_in[i] = input[i * channel_count + c];
                    }
                }
                handles.push(scope.spawn(move || {
                    let mut len = block_size;
                    let mut eos = false;
                    let in_arg = if got_real_input { Some(&mono_in[..]) } else { None };
                    conv.get_next(in_arg, out, &mut len, &mut eos)?;
                    Ok((len, eos))
                }));
            }
            handles
                .into_iter()
                .map(|h| h.join().expect("convolver channel worker panicked"))
                .collect()
        });

        let mut per_channel_len = 0;
        let mut all_eos = true;
        for r in results {
            let (len, eos) = r?;
            per_channel_len = len;
            all_eos &= eos;
        }

        for i in 0..block_size {
            for c in 0..channel_count {
                self.interleaved[i * channel_count + c] = self.out_blocks[c][i];
            }
        }
        self.cursor = 0;
        self.tail_eos = all_eos;
        self.filled = per_channel_len * channel_count;
        Ok(())
    }
}

impl Reader for ConvolverReader {
    fn specs(&self) -> Specs {
        self.specs
    }

    fn is_seekable(&self) -> bool {
        self.source.is_seekable()
    }

    fn length_samples(&self) -> i64 {
        self.source.length_samples()
    }

    fn position_samples(&self) -> i64 {
        self.source.position_samples()
    }

    /// Forwards to the source reader and resets every per-channel
    /// convolver; the output buffer is considered empty post-seek, so
    /// the next `read` re-fills from the new position with fresh
    /// (silent) convolver state, matching a from-scratch reader seeked
    /// to the same position.
    fn seek(&mut self, position: i64) -> ConvResult<()> {
        self.source.seek(position)?;
        for conv in &mut self.convolvers {
            conv.reset();
        }
        self.cursor = 0;
        self.filled = 0;
        self.source_eos = false;
        self.tail_eos = false;
        Ok(())
    }

    fn read(&mut self, out: &mut [Sample], len: &mut usize, eos: &mut bool) -> ConvResult<()> {
        let requested = (*len).min(out.len());
        let mut produced = 0;
        *eos = false;

        while produced < requested {
            if self.cursor >= self.filled {
                if self.tail_eos {
                    *eos = true;
                    break;
                }
                self.fill_next_block()?;
                if self.filled == 0 {
                    *eos = true;
                    break;
                }
            }
            let available = self.filled - self.cursor;
            let to_copy = available.min(requested - produced);
            out[produced..produced + to_copy]
                .copy_from_slice(&self.interleaved[self.cursor..self.cursor + to_copy]);
            self.cursor += to_copy;
            produced += to_copy;
        }

        *len = produced;
        Ok(())
    }
}

/// Durable, replayable pairing of a source `Sound` with an impulse
/// response; vends a fresh [`ConvolverReader`] (and fresh per-channel
/// `Convolver`s) on every `create_reader` call.
pub struct ConvolverSound {
    source: Arc<dyn Sound>,
    ir: Arc<ImpulseResponse>,
    pool: Arc<ThreadPool>,
}

impl ConvolverSound {
    pub fn new(source: Arc<dyn Sound>, ir: Arc<ImpulseResponse>, pool: Arc<ThreadPool>) -> Self {
        Self { source, ir, pool }
    }
}

impl Sound for ConvolverSound {
    fn create_reader(&self) -> ConvResult<Box<dyn Reader>> {
        let source_reader = self.source.create_reader()?;
        let reader = ConvolverReader::new(source_reader, Arc::clone(&self.ir), Arc::clone(&self.pool))?;
        Ok(Box::new(reader))
    }
}

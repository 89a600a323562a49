//! conv-dsp: partitioned FFT convolution.
//!
//! Layered bottom-up: [`FftPlan`] owns the transform, [`ImpulseResponse`]
//! splits a buffered IR into per-channel frequency-domain partitions,
//! [`FftConvolver`] is the single-partition windowed transform core,
//! [`Convolver`] wires a bank of those into a real-time, partition-
//! parallel engine, and [`ConvolverReader`]/[`ConvolverSound`] expose
//! the whole thing as a `conv_core::Reader`/`Sound` pair.

mod convolver;
mod convolver_reader;
mod fft_convolver;
mod fft_plan;
mod impulse_response;
mod thread_pool;

pub use convolver::Convolver;
pub use convolver_reader::{ConvolverReader, ConvolverSound};
pub use fft_convolver::FftConvolver;
pub use fft_plan::{FftPlan, DEFAULT_FFT_SIZE};
pub use impulse_response::{ImpulseResponse, Partition};
pub use thread_pool::{JoinHandle, ThreadPool};

//! Fixed-size worker pool consuming a FIFO task queue.

use std::any::Any;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};

use conv_core::{ConvError, ConvResult};

type Job = Box<dyn FnOnce() + Send + 'static>;
type PanicPayload = Box<dyn Any + Send + 'static>;

/// A handle to a task submitted to a [`ThreadPool`]. Awaiting it with
/// [`join`](JoinHandle::join) blocks until the worker that picked it up
/// finishes; a panic inside the task is captured and re-raised here
/// rather than tearing down the pool.
pub struct JoinHandle<R> {
    receiver: Receiver<Result<R, PanicPayload>>,
}

impl<R> JoinHandle<R> {
    pub fn join(self) -> R {
        match self.receiver.recv() {
            Ok(Ok(value)) => value,
            Ok(Err(payload)) => resume_unwind(payload),
            Err(_) => panic!("thread pool worker disconnected before producing a result"),
        }
    }

    /// Like [`join`](Self::join), but converts a worker panic into a
    /// `ConvError::Allocation` instead of re-raising it. [`Convolver`]
    /// uses this for its background partition workers so a panic there
    /// becomes a stream-terminating `ConvResult::Err` the caller can
    /// observe and report, rather than an unwind crossing the scoped
    /// thread boundary the readers drive these workers from.
    ///
    /// [`Convolver`]: crate::Convolver
    pub fn join_quiet(self) -> ConvResult<R> {
        match self.receiver.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "background worker panicked".to_string());
                Err(ConvError::Allocation(msg))
            }
            Err(_) => Err(ConvError::Allocation(
                "thread pool worker disconnected before producing a result".into(),
            )),
        }
    }
}

/// Bounded, fixed-size worker pool used for partition-level parallelism
/// inside [`crate::Convolver`]. Tasks are plain nullary closures
/// dequeued in FIFO order by whichever worker is free; the order tasks
/// *execute* in across different submissions is unspecified, same as
/// the contract this type implements.
pub struct ThreadPool {
    sender: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawns `count` worker threads. `count == 0` is a construction
    /// error.
    pub fn new(count: usize) -> ConvResult<Self> {
        if count == 0 {
            return Err(ConvError::State(
                "thread pool requires at least 1 worker".into(),
            ));
        }
        let (sender, receiver) = unbounded::<Job>();
        let workers = (0..count)
            .map(|id| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("conv-pool-{id}"))
                    .spawn(move || {
                        for job in receiver.iter() {
                            job();
                        }
                    })
                    .expect("failed to spawn convolution thread pool worker")
            })
            .collect();
        log::debug!("spawned thread pool with {count} workers");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Appends a task to the queue. Submitting after the pool has
    /// started tearing down (i.e. after `drop` has begun) is a
    /// programming error and panics, matching "submissions after
    /// destruction are a programming error".
    pub fn enqueue<F, R>(&self, task: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);
        let job: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(task));
            let _ = result_tx.send(outcome);
        });
        self.sender
            .as_ref()
            .expect("enqueue called on a ThreadPool that is being dropped")
            .send(job)
            .expect("thread pool workers have all exited");
        JoinHandle { receiver: result_rx }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Dropping the sender closes the channel once this was the
        // only clone; each worker's `for job in receiver.iter()` then
        // ends and the thread returns, so joining below always
        // terminates.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

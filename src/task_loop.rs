//! Single-consumer task executor
//!
//! Every mutation of session and room state runs as a task on one thread.
//! Producers on any thread append to an unbounded FIFO queue and never block;
//! the consumer runs the tasks one at a time, in enqueue order, against the
//! state it owns.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error};

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Create a connected producer handle and consumer loop.
pub fn channel<S>() -> (TaskHandle<S>, TaskLoop<S>) {
    let (tx, rx) = mpsc::channel();
    let handle = TaskHandle {
        producer: Arc::new(Mutex::new(Producer { tx, next_seq: 0 })),
    };
    (handle, TaskLoop { rx })
}

struct Producer<S> {
    tx: Sender<(u64, Task<S>)>,
    next_seq: u64,
}

/// Cloneable, thread-safe handle used to enqueue tasks.
pub struct TaskHandle<S> {
    producer: Arc<Mutex<Producer<S>>>,
}

impl<S> Clone for TaskHandle<S> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
        }
    }
}

impl<S> TaskHandle<S> {
    /// Append a task to the queue and return its sequence number.
    ///
    /// The number is assigned under the same lock that orders the queue, so
    /// execution order equals sequence order even with concurrent producers.
    pub fn enqueue<F>(&self, task: F) -> u64
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let mut producer = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let seq = producer.next_seq;
        producer.next_seq += 1;
        if producer.tx.send((seq, Box::new(task))).is_err() {
            debug!(seq, "Task loop is gone, dropping task");
        }
        seq
    }
}

/// The consuming side. Owned by the thread that runs the tasks.
pub struct TaskLoop<S> {
    rx: Receiver<(u64, Task<S>)>,
}

impl<S> TaskLoop<S> {
    /// Run tasks until every [`TaskHandle`] has been dropped, then hand the
    /// state back.
    pub fn run(self, mut state: S) -> S {
        while let Ok((seq, task)) = self.rx.recv() {
            execute(seq, task, &mut state);
        }
        state
    }

    /// Run every task that is queued right now without waiting for more.
    ///
    /// Tasks enqueued by the drained tasks themselves are run as well.
    pub fn drain(&self, state: &mut S) -> usize {
        let mut count = 0;
        loop {
            match self.rx.try_recv() {
                Ok((seq, task)) => {
                    execute(seq, task, state);
                    count += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return count,
            }
        }
    }
}

fn execute<S>(seq: u64, task: Task<S>, state: &mut S) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| task(state))) {
        error!(seq, "Task panicked: {}", panic_message(panic.as_ref()));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

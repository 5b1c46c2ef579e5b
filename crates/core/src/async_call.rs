//! Async-call worker (§4.4).
//!
//! Grounded in `original_source/trunk/src/app/srs_app_async_call.hpp`'s
//! `SrsAsyncCallWorker`: a single dedicated thread drains a FIFO queue of
//! tasks, so slow outbound calls (HTTP callback hooks, in this port: the
//! RTMP publish handshake) never block the publisher threads that enqueue
//! them.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::error::Error;

/// One unit of outbound work the worker thread executes.
pub trait AsyncCallTask: Send {
    /// Human-readable label for logging; mirrors `ISrsAsyncCallTask::call()`'s
    /// callers logging the task before/after running it.
    fn label(&self) -> &str;
    fn call(self: Box<Self>) -> Result<(), Error>;
}

struct Shared {
    queue: Mutex<VecDeque<Box<dyn AsyncCallTask>>>,
    cond: Condvar,
    stopping: Mutex<bool>,
}

/// Owns the worker thread and the task queue it drains.
pub struct AsyncCallWorker {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncCallWorker {
    /// Spawn the worker thread. It runs until [`stop`](Self::stop) is
    /// called, draining any tasks already queued before exiting.
    pub fn start() -> Result<Self, Error> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            stopping: Mutex::new(false),
        });
        let worker_shared = shared.clone();

        let handle = std::thread::Builder::new()
            .name("async-call".into())
            .spawn(move || Self::run(worker_shared))
            .map_err(|e| Error::TaskCreateFailed(e.to_string()))?;

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn run(shared: Arc<Shared>) {
        loop {
            let task = {
                let mut q = shared.queue.lock().unwrap();
                loop {
                    if let Some(task) = q.pop_front() {
                        break Some(task);
                    }
                    if *shared.stopping.lock().unwrap() {
                        break None;
                    }
                    q = shared.cond.wait(q).unwrap();
                }
            };
            let Some(task) = task else {
                break;
            };
            let label = task.label().to_string();
            if let Err(e) = task.call() {
                tracing::warn!(task = %label, error = %e, "async call task failed");
            }
        }
    }

    /// Enqueue a task. Never blocks the caller on its execution.
    pub fn execute(&self, task: Box<dyn AsyncCallTask>) {
        self.shared.queue.lock().unwrap().push_back(task);
        self.shared.cond.notify_one();
    }

    /// Signal the worker to drain the queue and exit, then join it.
    pub fn stop(&self) {
        *self.shared.stopping.lock().unwrap() = true;
        self.shared.cond.notify_all();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }
}

impl Drop for AsyncCallWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

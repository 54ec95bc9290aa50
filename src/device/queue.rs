//! In-order asynchronous command queues and their completion events.

use crate::core::error::{DeviceError, ForestError, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

type Command = Box<dyn FnOnce() + Send + 'static>;

/// Commands run one after another on a dedicated worker thread, in the
/// order they were enqueued.
pub struct CommandQueue {
    index: usize,
    sender: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl CommandQueue {
    /// Starts queue number `index`.
    pub fn new(index: usize) -> Result<Self> {
        let (sender, receiver) = unbounded::<Command>();
        let worker = thread::Builder::new()
            .name(format!("device-queue-{}", index))
            .spawn(move || {
                for command in receiver {
                    command();
                }
            })
            .map_err(|e| ForestError::threading(format!("cannot start queue {}: {}", index, e)))?;
        Ok(CommandQueue {
            index,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Queue number.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Appends `job` to the queue. The returned event resolves to the job's
    /// result once it has run.
    pub fn enqueue<T, F>(&self, kernel: &'static str, job: F) -> Result<Event<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (done, receiver) = bounded(1);
        let command: Command = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|_| {
                Err(ForestError::kernel_execution(kernel, "kernel panicked"))
            });
            let _ = done.send(result);
        });
        let sender = self.sender.as_ref().ok_or(DeviceError::QueueDisconnected {
            queue: self.index,
        })?;
        sender
            .send(command)
            .map_err(|_| DeviceError::QueueDisconnected { queue: self.index })?;
        Ok(Event { kernel, receiver })
    }

    /// Blocks until every previously enqueued command has run.
    pub fn finish(&self) -> Result<()> {
        self.enqueue("finish", || Ok(()))?.wait()
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("device queue {} worker terminated abnormally", self.index);
            }
        }
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("index", &self.index)
            .field("running", &self.sender.is_some())
            .finish()
    }
}

/// Completion handle of one enqueued command.
#[must_use = "an event must be waited on to observe kernel failures"]
#[derive(Debug)]
pub struct Event<T = ()> {
    kernel: &'static str,
    receiver: Receiver<Result<T>>,
}

impl<T> Event<T> {
    /// Kernel the event belongs to.
    pub fn kernel(&self) -> &'static str {
        self.kernel
    }

    /// Whether the command has finished.
    pub fn is_complete(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// Blocks until the command has run and returns its result.
    pub fn wait(self) -> Result<T> {
        self.receiver.recv().map_err(|_| {
            ForestError::kernel_execution(self.kernel, "queue dropped the command")
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_commands_run_in_order() {
        let queue = CommandQueue::new(0).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let events: Vec<_> = (0..8)
            .map(|expected| {
                let counter = Arc::clone(&counter);
                queue
                    .enqueue("step", move || {
                        Ok(counter.fetch_add(1, Ordering::SeqCst) == expected)
                    })
                    .unwrap()
            })
            .collect();
        for event in events {
            assert!(event.wait().unwrap());
        }
    }

    #[test]
    fn test_errors_and_panics_surface_through_events() {
        let queue = CommandQueue::new(1).unwrap();
        let failed = queue.enqueue::<(), _>("bad", || Err(ForestError::internal("boom")));
        assert!(failed.unwrap().wait().is_err());
        let panicked = queue.enqueue::<(), _>("panics", || panic!("kernel bug"));
        assert!(panicked.unwrap().wait().is_err());
        // The queue keeps working afterwards.
        queue.finish().unwrap();
        assert_eq!(queue.enqueue("value", || Ok(7)).unwrap().wait().unwrap(), 7);
    }
}

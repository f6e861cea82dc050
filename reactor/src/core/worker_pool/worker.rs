// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words condvar

//! A single background thread bound to a private blocking work queue. See [`Worker`].

use crate::{Continuation, LivenessState, ReactorError};
use std::{collections::VecDeque,
          fmt::{Debug, Formatter},
          sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError,
                 atomic::{AtomicBool, Ordering}},
          thread::{self, JoinHandle}};

/// A deferred, argument-less unit of execution. Ownership moves to the worker that
/// dequeues it, and it is dropped right after it runs.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

/// Queue state guarded by [`WorkerShared::queue`].
#[derive(Default)]
struct WorkQueue {
    items: VecDeque<WorkItem>,
    stop_requested: bool,
}

/// State shared between the [`Worker`] handle and its thread.
struct WorkerShared {
    queue: Mutex<WorkQueue>,
    /// Signalled when an item is queued or a stop is requested.
    wakeup: Condvar,
    /// Cleared by [`WorkerTerminationGuard`] when the thread exits (also on panic).
    is_running: AtomicBool,
}

impl WorkerShared {
    /// The queue lock is never held while an item runs, so a poisoned lock still guards
    /// consistent data.
    fn lock_queue(&self) -> MutexGuard<'_, WorkQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A single background execution thread with a private FIFO queue.
///
/// - [`queue_work()`] appends to the queue and wakes the thread if it is idle.
/// - The thread pops one item under the lock, releases the lock, runs the item, and
///   repeats. Items therefore run strictly in submission order.
/// - [`stop()`] asks the thread to drain what is left and exit, then joins it.
///
/// [`queue_work()`]: Self::queue_work
/// [`stop()`]: Self::stop
pub struct Worker {
    id: usize,
    shared: Arc<WorkerShared>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Debug for Worker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("pending", &self.pending())
            .field("liveness", &self.liveness())
            .finish()
    }
}

impl Worker {
    /// Spawns the worker thread, named `reactor-worker-{id}`.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::ThreadSpawn`] if the OS refuses to create the thread.
    pub fn start(id: usize) -> Result<Self, ReactorError> {
        let shared = Arc::new(WorkerShared {
            queue: Mutex::new(WorkQueue::default()),
            wakeup: Condvar::new(),
            is_running: AtomicBool::new(true),
        });

        let shared_clone = Arc::clone(&shared);
        let join_handle = thread::Builder::new()
            .name(format!("reactor-worker-{id}"))
            .spawn(move || run_worker_loop(id, &shared_clone))
            .map_err(ReactorError::ThreadSpawn)?;

        Ok(Self {
            id,
            shared,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    #[must_use]
    pub fn id(&self) -> usize { self.id }

    /// Number of items queued but not yet started.
    #[must_use]
    pub fn pending(&self) -> usize { self.shared.lock_queue().items.len() }

    #[must_use]
    pub fn liveness(&self) -> LivenessState {
        self.shared.is_running.load(Ordering::SeqCst).into()
    }

    /// Appends `item` to this worker's queue.
    pub fn queue_work(&self, item: impl FnOnce() + Send + 'static) {
        self.queue_boxed(Box::new(item));
    }

    /// Appends an already boxed `item` to this worker's queue.
    pub fn queue_boxed(&self, item: WorkItem) {
        let mut queue = self.shared.lock_queue();

        if queue.stop_requested || self.liveness() == LivenessState::Terminated {
            tracing::warn!(
                message = "reactor-worker: dropping work item, worker is stopped",
                worker_id = self.id
            );
            return;
        }

        queue.items.push_back(item);
        drop(queue);
        self.shared.wakeup.notify_one();
    }

    /// Asks the thread to drain its queue and exit. Does not wait.
    pub fn request_stop(&self) {
        self.shared.lock_queue().stop_requested = true;
        self.shared.wakeup.notify_all();
    }

    /// Waits for the thread to exit. Call [`request_stop()`] first, or this blocks
    /// forever.
    ///
    /// # Panics
    ///
    /// Re-raises the panic of a work item that killed this worker.
    ///
    /// [`request_stop()`]: Self::request_stop
    pub fn join(&self) {
        if let Err(payload) = self.join_thread() {
            std::panic::resume_unwind(payload);
        }
    }

    /// Graceful stop: drain remaining items, exit, join.
    ///
    /// # Panics
    ///
    /// Re-raises the panic of a work item that killed this worker.
    pub fn stop(&self) {
        self.request_stop();
        self.join();
    }

    /// Joins the thread if it has not been joined yet. Idempotent.
    ///
    /// Called on the worker's own thread (a work item dropped the last owner of this
    /// worker), the handle is detached instead: the thread exits by itself once the
    /// current item returns and the queue is drained.
    pub(crate) fn join_thread(&self) -> thread::Result<()> {
        let maybe_handle = self
            .join_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match maybe_handle {
            Some(handle) if handle.thread().id() == thread::current().id() => {
                tracing::debug!(
                    message = "reactor-worker: dropped from its own thread, detaching",
                    worker_id = self.id
                );
                Ok(())
            }
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.request_stop();
        if self.join_thread().is_err() {
            tracing::error!(
                message = "reactor-worker: thread had panicked, fault dropped with worker",
                worker_id = self.id
            );
        }
    }
}

/// RAII guard that marks the worker terminated when its loop exits, including during
/// unwinding from a panicking work item.
struct WorkerTerminationGuard<'a> {
    id: usize,
    shared: &'a WorkerShared,
}

impl Drop for WorkerTerminationGuard<'_> {
    fn drop(&mut self) {
        self.shared.is_running.store(false, Ordering::SeqCst);
        if thread::panicking() {
            let dropped = self.shared.lock_queue().items.len();
            tracing::error!(
                message = "reactor-worker: work item panicked, worker is exiting",
                worker_id = self.id,
                dropped_items = dropped
            );
        }
    }
}

fn run_worker_loop(id: usize, shared: &WorkerShared) {
    let _guard = WorkerTerminationGuard { id, shared };
    while run_next_item(shared) == Continuation::Continue {}
}

/// Blocks until an item is available, then runs it outside the lock. Returns
/// [`Continuation::Stop`] once a stop was requested and the queue is drained.
fn run_next_item(shared: &WorkerShared) -> Continuation {
    let item = {
        let mut queue = shared.lock_queue();
        loop {
            if let Some(item) = queue.items.pop_front() {
                break item;
            }
            if queue.stop_requested {
                return Continuation::Stop;
            }
            queue = shared
                .wakeup
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    };

    item();
    Continuation::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{sync::mpsc, time::Duration};

    #[test]
    fn test_items_run_in_submission_order() {
        let worker = Worker::start(0).unwrap();
        let (tx, rx) = mpsc::channel();

        for label in ["A", "B", "C"] {
            let tx = tx.clone();
            worker.queue_work(move || tx.send(label).unwrap());
        }
        worker.stop();

        let observed: Vec<&str> = rx.try_iter().collect();
        assert_eq!(observed, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_stop_drains_remaining_items() {
        let worker = Worker::start(1).unwrap();
        let (tx, rx) = mpsc::channel();

        // Block the worker so that the rest pile up in the queue.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        worker.queue_work(move || gate_rx.recv().unwrap());
        for it in 0..10 {
            let tx = tx.clone();
            worker.queue_work(move || tx.send(it).unwrap());
        }

        worker.request_stop();
        gate_tx.send(()).unwrap();
        worker.join();

        assert_eq!(rx.try_iter().count(), 10);
        assert_eq!(worker.liveness(), LivenessState::Terminated);
    }

    #[test]
    fn test_queue_after_stop_is_dropped() {
        let worker = Worker::start(2).unwrap();
        worker.stop();

        let (tx, rx) = mpsc::channel::<()>();
        worker.queue_work(move || tx.send(()).unwrap());

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(worker.pending(), 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let worker = Worker::start(3).unwrap();
        worker.stop();
        worker.stop();
        assert_eq!(worker.liveness(), LivenessState::Terminated);
    }

    #[test]
    fn test_panicking_item_is_reraised_on_stop() {
        let worker = Worker::start(4).unwrap();
        worker.queue_work(|| panic!("deliberate panic for testing"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            worker.stop();
        }));

        assert!(result.is_err());
        assert_eq!(worker.liveness(), LivenessState::Terminated);
    }

    #[test]
    fn test_worker_dropped_by_its_own_item_finishes_the_item() {
        let worker = Arc::new(Mutex::new(Some(Worker::start(8).unwrap())));
        let (tx, rx) = mpsc::channel();

        let worker_clone = Arc::clone(&worker);
        let queued = worker.lock().unwrap();
        queued.as_ref().unwrap().queue_work(move || {
            thread::sleep(Duration::from_millis(20));
            drop(worker_clone.lock().unwrap().take());
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        });
        drop(queued);

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap().as_deref(),
            Some("reactor-worker-8")
        );
        assert!(worker.lock().unwrap().is_none());
    }

    #[test]
    fn test_thread_name() {
        let worker = Worker::start(7).unwrap();
        let (tx, rx) = mpsc::channel();
        worker.queue_work(move || {
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        });
        worker.stop();

        assert_eq!(rx.recv().unwrap().as_deref(), Some("reactor-worker-7"));
    }
}

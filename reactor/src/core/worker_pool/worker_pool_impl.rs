// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use super::{WorkItem, Worker};
use crate::ReactorError;
use std::{num::NonZeroUsize,
          sync::atomic::{AtomicUsize, Ordering}};

/// Fixed set of [`Worker`]s fed in round-robin order.
///
/// The size is chosen at construction and never changes. Dropping the pool stops every
/// worker gracefully (queues are drained, threads are joined).
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Worker>,
    /// Index of the worker that receives the next item, modulo `workers.len()`.
    next_worker: AtomicUsize,
}

impl WorkerPool {
    /// Spawns `size` workers, with ids `0..size`.
    ///
    /// # Errors
    ///
    /// Returns [`ReactorError::ThreadSpawn`] if any thread can't be created. Workers
    /// spawned before the failure are stopped.
    pub fn new(size: NonZeroUsize) -> Result<Self, ReactorError> {
        let mut workers = Vec::with_capacity(size.get());
        for id in 0..size.get() {
            workers.push(Worker::start(id)?);
        }

        tracing::debug!(message = "reactor-worker-pool: started", size = size.get());

        Ok(Self {
            workers,
            next_worker: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize { self.workers.len() }

    /// Always `false`, a pool has at least one worker.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.workers.is_empty() }

    #[must_use]
    pub fn worker(&self, index: usize) -> Option<&Worker> { self.workers.get(index) }

    /// Total number of queued items across all workers.
    #[must_use]
    pub fn pending(&self) -> usize { self.workers.iter().map(Worker::pending).sum() }

    /// Hands `item` to the next worker in round-robin order.
    pub fn queue_work(&self, item: impl FnOnce() + Send + 'static) {
        self.queue_boxed(Box::new(item));
    }

    pub fn queue_boxed(&self, item: WorkItem) {
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[index].queue_boxed(item);
    }

    /// Hands `item` to the worker picked by `affinity`. Items queued with the same
    /// affinity run on one worker, in submission order, never concurrently.
    pub fn queue_work_to(&self, affinity: usize, item: impl FnOnce() + Send + 'static) {
        self.workers[affinity % self.workers.len()].queue_boxed(Box::new(item));
    }

    /// Stops every worker gracefully and waits for all of them. Stop requests go out to
    /// every worker first so that they drain in parallel.
    ///
    /// # Panics
    ///
    /// Re-raises the first panic of a work item that killed a worker, after every other
    /// worker has been joined.
    pub fn stopall(&self) {
        self.workers.iter().for_each(Worker::request_stop);

        let mut first_fault = None;
        for worker in &self.workers {
            if let Err(payload) = worker.join_thread() {
                first_fault.get_or_insert(payload);
            }
        }

        tracing::debug!(message = "reactor-worker-pool: stopped", size = self.len());

        if let Some(payload) = first_fault {
            std::panic::resume_unwind(payload);
        }
    }
}

impl Drop for WorkerPool {
    /// Each [`Worker`] joins itself on drop. Requesting the stop up front lets them
    /// drain concurrently.
    fn drop(&mut self) { self.workers.iter().for_each(Worker::request_stop); }
}

// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words condvar

//! # Architecture Overview
//!
//! Fixed size set of background threads that run deferred [`WorkItem`]s for the
//! [`Reactor`]. It is used in two ways:
//!
//! 1. [`Reactor::run_execution()`] submits a job directly, bypassing readiness waiting.
//! 2. When the reactor runs in [`DispatchMode::WorkerPool`], every ready callback is
//!    wrapped in a [`WorkItem`] and queued here instead of running on the dispatch
//!    thread.
//!
//! ```text
//! queue_work(item) ──▶ round-robin cursor ──┬──▶ Worker 0 [ A, B, C ] ──▶ runs A, B, C
//!                                           ├──▶ Worker 1 [ D ]       ──▶ runs D
//!                                           └──▶ Worker N [ ]         ──▶ parked (condvar)
//! ```
//!
//! ## Ordering
//!
//! | Submitted to        | Guarantee                                            |
//! | :------------------ | :--------------------------------------------------- |
//! | The same [`Worker`] | Strict submission order (private FIFO queue)         |
//! | Different workers   | None                                                 |
//! | Any worker          | Each item runs at most once, on exactly one worker   |
//!
//! ## Shutdown
//!
//! [`Worker::stop()`] and [`WorkerPool::stopall()`] are graceful: queued items are
//! drained before the threads exit, and the calls return only after every thread has
//! been joined. Items queued after a stop request are dropped (and logged).
//!
//! ## Faults
//!
//! Work items are not wrapped in [`catch_unwind()`]. A panicking item kills its worker
//! thread (the remaining queue of that worker is dropped), and the panic is re-raised on
//! the thread that calls [`Worker::stop()`] / [`WorkerPool::stopall()`]. A faulty
//! callback is a programming error, not a runtime condition to retry.
//!
//! [`DispatchMode::WorkerPool`]: crate::DispatchMode::WorkerPool
//! [`Reactor::run_execution()`]: crate::Reactor::run_execution
//! [`Reactor`]: crate::Reactor
//! [`catch_unwind()`]: std::panic::catch_unwind

// Attach sources.
pub mod worker;
pub mod worker_pool_impl;

// Re-export.
pub use worker::*;
pub use worker_pool_impl::*;

// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Integration tests that run a real dispatch loop on a spawned thread.
//!
//! - [`reactor_timer_tests`]: timerfd backed timers, oneshot and repeating.
//! - [`reactor_socket_tests`]: readiness of connected [`UnixStream`] pairs, inline and
//!   on the worker pool.
//! - [`reactor_signal_tests`]: signal fan out, serialized with [`serial_test`] since
//!   signal dispositions are process wide.
//! - [`reactor_deadline_tests`]: millisecond deadlines from the timer heap.
//! - [`reactor_lifecycle_tests`]: start, terminate, restart, faults, dispatch modes.
//!
//! [`UnixStream`]: std::os::unix::net::UnixStream

use super::{Reactor, ReactorConfig, ReactorError};
use crate::LivenessState;
use std::{num::NonZeroUsize,
          thread::{self, JoinHandle},
          time::{Duration, Instant}};

mod reactor_lifecycle_tests;
mod reactor_signal_tests;

/// Upper bound for anything the tests wait on. Generous, for loaded CI machines.
const WAIT_LIMIT: Duration = Duration::from_secs(5);

fn small_config() -> ReactorConfig {
    ReactorConfig::default().with_worker_count(NonZeroUsize::new(2).unwrap())
}

fn new_reactor() -> Reactor { Reactor::new(small_config()).unwrap() }

/// Polls `predicate` every few milliseconds until it holds or [`WAIT_LIMIT`] passes.
fn wait_until(mut predicate: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < WAIT_LIMIT {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

/// A reactor whose dispatch loop runs on a spawned thread. Dropping it terminates the
/// loop and joins the thread.
struct RunningReactor {
    reactor: Reactor,
    join_handle: Option<JoinHandle<Result<(), ReactorError>>>,
}

impl RunningReactor {
    fn spawn(reactor: Reactor) -> Self {
        let reactor_clone = reactor.clone();
        let join_handle = thread::Builder::new()
            .name("reactor-dispatch".into())
            .spawn(move || reactor_clone.start())
            .unwrap();
        assert!(wait_until(|| {
            reactor.dispatch_liveness() == LivenessState::Running
        }));
        Self {
            reactor,
            join_handle: Some(join_handle),
        }
    }

    /// Terminates the loop and returns what [`Reactor::start()`] returned.
    fn stop(mut self) -> Result<(), ReactorError> {
        self.reactor.terminate();
        self.join_handle.take().unwrap().join().unwrap()
    }
}

impl Drop for RunningReactor {
    fn drop(&mut self) {
        if let Some(join_handle) = self.join_handle.take() {
            self.reactor.terminate();
            drop(join_handle.join());
        }
    }
}

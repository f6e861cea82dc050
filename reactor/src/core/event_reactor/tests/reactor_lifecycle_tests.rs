// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use super::{RunningReactor, WAIT_LIMIT, new_reactor, small_config, wait_until};
use crate::{DispatchMode, LivenessState, Reactor, ReactorError};
use pretty_assertions::assert_eq;
use std::{sync::{Arc,
                 atomic::{AtomicUsize, Ordering},
                 mpsc},
          thread,
          time::Duration};

#[test]
fn test_no_callback_runs_after_terminate_and_join() {
    let reactor = new_reactor();
    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = Arc::clone(&fired);
        reactor
            .create_timer_event(0, 10_000, move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }
    let running = RunningReactor::spawn(reactor.clone());
    assert!(wait_until(|| fired.load(Ordering::SeqCst) >= 2));

    running.stop().unwrap();
    assert_eq!(reactor.dispatch_liveness(), LivenessState::Terminated);

    let after_join = fired.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(fired.load(Ordering::SeqCst), after_join);
    // Registrations survive the loop exiting.
    assert_eq!(reactor.timer_count(), 1);
}

#[test]
fn test_terminate_does_not_interrupt_a_running_callback() {
    let reactor = new_reactor();
    let (started_tx, started_rx) = mpsc::channel();
    let (finished_tx, finished_rx) = mpsc::channel();

    reactor
        .create_oneshot_timer_event(0, 10_000, move || {
            started_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(200));
            finished_tx.send(()).unwrap();
        })
        .unwrap();
    let running = RunningReactor::spawn(reactor.clone());

    started_rx.recv_timeout(WAIT_LIMIT).unwrap();
    running.stop().unwrap();
    // `stop()` joined the loop, so the callback had already completed.
    assert!(finished_rx.try_recv().is_ok());
}

#[test]
fn test_terminate_before_start_returns_immediately() {
    let reactor = new_reactor();
    reactor.terminate();
    reactor.terminate();
    reactor.start().unwrap();
    assert_eq!(reactor.dispatch_liveness(), LivenessState::Terminated);
}

#[test]
fn test_second_start_is_rejected_while_running() {
    let reactor = new_reactor();
    let running = RunningReactor::spawn(reactor.clone());

    assert!(matches!(reactor.start(), Err(ReactorError::AlreadyRunning)));

    running.stop().unwrap();
}

#[test]
fn test_reactor_can_be_restarted() {
    let reactor = new_reactor();
    RunningReactor::spawn(reactor.clone()).stop().unwrap();

    let (tx, rx) = mpsc::channel();
    reactor
        .create_oneshot_timer_event(0, 20_000, move || tx.send(()).unwrap())
        .unwrap();
    let running = RunningReactor::spawn(reactor.clone());
    rx.recv_timeout(WAIT_LIMIT).unwrap();
    running.stop().unwrap();
}

#[test]
fn test_panicking_callback_unwinds_start_and_reactor_recovers() {
    let reactor = new_reactor();
    reactor
        .create_oneshot_timer_event(0, 10_000, || panic!("deliberate panic for testing"))
        .unwrap();

    let reactor_clone = reactor.clone();
    let join_result = thread::spawn(move || reactor_clone.start()).join();
    assert!(join_result.is_err());
    assert_eq!(reactor.dispatch_liveness(), LivenessState::Terminated);

    // Dispatch resources were handed back.
    reactor.terminate();
    reactor.start().unwrap();
}

#[test]
fn test_worker_pool_mode_runs_callbacks_off_the_dispatch_thread() {
    let reactor =
        Reactor::new(small_config().with_dispatch_mode(DispatchMode::WorkerPool)).unwrap();
    let (tx, rx) = mpsc::channel();

    reactor
        .create_oneshot_timer_event(0, 10_000, move || {
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        })
        .unwrap();
    let running = RunningReactor::spawn(reactor.clone());

    let thread_name = rx.recv_timeout(WAIT_LIMIT).unwrap().unwrap();
    assert!(thread_name.starts_with("reactor-worker-"), "{thread_name}");

    running.stop().unwrap();
}

#[test]
fn test_run_execution_uses_the_pool_without_a_running_loop() {
    let reactor = new_reactor();
    let (tx, rx) = mpsc::channel();

    reactor.run_execution(move || {
        tx.send(thread::current().name().map(str::to_string)).unwrap();
    });

    let thread_name = rx.recv_timeout(WAIT_LIMIT).unwrap().unwrap();
    assert!(thread_name.starts_with("reactor-worker-"), "{thread_name}");
    assert_eq!(reactor.dispatch_liveness(), LivenessState::Terminated);
}

#[test]
fn test_weak_reactor_does_not_keep_it_alive() {
    let reactor = new_reactor();
    let weak_reactor = reactor.downgrade();
    assert!(weak_reactor.upgrade().is_some());

    drop(reactor);
    assert!(weak_reactor.upgrade().is_none());
}

#[test]
fn test_independent_reactors_coexist() {
    let first = new_reactor();
    let second = new_reactor();
    let (tx, rx) = mpsc::channel();

    for (label, reactor) in [("first", &first), ("second", &second)] {
        let tx = tx.clone();
        reactor
            .create_oneshot_timer_event(0, 20_000, move || tx.send(label).unwrap())
            .unwrap();
    }
    let running_first = RunningReactor::spawn(first);
    let running_second = RunningReactor::spawn(second);

    let mut labels = vec![
        rx.recv_timeout(WAIT_LIMIT).unwrap(),
        rx.recv_timeout(WAIT_LIMIT).unwrap(),
    ];
    labels.sort_unstable();
    assert_eq!(labels, vec!["first", "second"]);

    running_first.stop().unwrap();
    running_second.stop().unwrap();
}

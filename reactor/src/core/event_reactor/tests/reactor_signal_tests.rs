// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use super::{RunningReactor, WAIT_LIMIT, new_reactor, wait_until};
use crate::{LivenessState, ReactorError};
use pretty_assertions::assert_eq;
use serial_test::serial;
use signal_hook::{consts::{SIGKILL, SIGSTOP, SIGTERM, SIGUSR1, SIGUSR2},
                  low_level::raise};
use std::{sync::{Arc, Mutex, mpsc},
          thread,
          time::Duration};
use test_case::test_case;

#[test]
#[serial]
fn test_signal_fans_out_in_registration_order() {
    let reactor = new_reactor();
    let observed = Arc::new(Mutex::new(Vec::new()));

    for label in ["first", "second"] {
        let observed = Arc::clone(&observed);
        reactor
            .create_signal_event(SIGUSR1, move |signal| {
                observed.lock().unwrap().push((label, signal));
            })
            .unwrap();
    }
    assert_eq!(reactor.signal_subscriber_count(SIGUSR1), 2);
    let running = RunningReactor::spawn(reactor.clone());

    raise(SIGUSR1).unwrap();

    assert!(wait_until(|| observed.lock().unwrap().len() >= 2));
    assert_eq!(
        observed.lock().unwrap().clone(),
        vec![("first", SIGUSR1), ("second", SIGUSR1)]
    );

    running.stop().unwrap();
}

#[test]
#[serial]
fn test_deleted_subscriber_is_not_called() {
    let reactor = new_reactor();
    let (tx, rx) = mpsc::channel();

    let deleted = {
        let tx = tx.clone();
        reactor
            .create_signal_event(SIGUSR2, move |_| tx.send("deleted").unwrap())
            .unwrap()
    };
    reactor
        .create_signal_event(SIGUSR2, move |_| tx.send("kept").unwrap())
        .unwrap();

    assert!(reactor.delete_signal_event(deleted));
    assert!(!reactor.delete_signal_event(deleted));
    assert_eq!(reactor.signal_subscriber_count(SIGUSR2), 1);

    let running = RunningReactor::spawn(reactor.clone());
    raise(SIGUSR2).unwrap();

    assert_eq!(rx.recv_timeout(WAIT_LIMIT).unwrap(), "kept");
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    running.stop().unwrap();
}

#[test]
#[serial]
fn test_term_signal_callback_terminates_the_loop() {
    let reactor = new_reactor();
    let weak_reactor = reactor.downgrade();
    let (tx, rx) = mpsc::channel();

    let ids = reactor
        .register_term_signals(move |signal| {
            tx.send(signal).unwrap();
            if let Some(reactor) = weak_reactor.upgrade() {
                reactor.terminate();
            }
        })
        .unwrap();
    assert_eq!(ids.len(), 2);

    let reactor_clone = reactor.clone();
    let join_handle = thread::spawn(move || reactor_clone.start());
    assert!(wait_until(|| {
        reactor.dispatch_liveness() == LivenessState::Running
    }));

    raise(SIGTERM).unwrap();

    assert_eq!(rx.recv_timeout(WAIT_LIMIT).unwrap(), SIGTERM);
    join_handle.join().unwrap().unwrap();
    assert_eq!(reactor.dispatch_liveness(), LivenessState::Terminated);
}

#[test_case(SIGKILL ; "sigkill is forbidden")]
#[test_case(SIGSTOP ; "sigstop is forbidden")]
#[test_case(0 ; "zero is not a signal")]
#[test_case(1_000 ; "out of range")]
#[serial]
fn test_unhandleable_signal_is_rejected(signal: i32) {
    let reactor = new_reactor();
    assert!(matches!(
        reactor.create_signal_event(signal, |_| {}),
        Err(ReactorError::SignalRegistration { signal: it, .. }) if it == signal
    ));
    assert_eq!(reactor.signal_subscriber_count(signal), 0);
}

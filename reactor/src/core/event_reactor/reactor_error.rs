// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words timerfd epoll EBADF EPERM

use miette::Diagnostic;
use std::os::fd::RawFd;

/// Every failure the [`Reactor`] reports synchronously. Registration calls return it
/// instead of a negative status code; [`Reactor::start()`] returns it when the wait
/// itself breaks.
///
/// Failures inside user callbacks are not represented here. They are not contained,
/// see [fault policy].
///
/// [`Reactor`]: crate::Reactor
/// [`Reactor::start()`]: crate::Reactor::start
/// [fault policy]: crate::core::worker_pool#faults
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum ReactorError {
    #[error("Failed to create mio::Poll")]
    #[diagnostic(
        code(r3bl_reactor::poll_creation),
        help("This usually means the system ran out of file descriptors")
    )]
    PollCreation(#[source] std::io::Error),

    #[error("Failed to create mio::Waker")]
    #[diagnostic(
        code(r3bl_reactor::waker_creation),
        help("This usually means the system ran out of file descriptors")
    )]
    WakerCreation(#[source] std::io::Error),

    #[error("Failed to clone the mio::Registry")]
    #[diagnostic(
        code(r3bl_reactor::registry_clone),
        help("This usually means the system ran out of file descriptors")
    )]
    RegistryClone(#[source] std::io::Error),

    #[error("Failed to create the signal pipe")]
    #[diagnostic(
        code(r3bl_reactor::signal_creation),
        help("Signal handler creation failed - check system signal limits")
    )]
    SignalCreation(#[source] std::io::Error),

    #[error("Failed to install a handler for signal {signal}")]
    #[diagnostic(
        code(r3bl_reactor::signal_registration),
        help("SIGKILL, SIGSTOP, SIGILL, SIGFPE, and SIGSEGV can't be subscribed to")
    )]
    SignalRegistration {
        signal: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create a timerfd")]
    #[diagnostic(
        code(r3bl_reactor::timer_creation),
        help("This usually means the system ran out of file descriptors")
    )]
    TimerCreation(#[source] std::io::Error),

    #[error("Failed to arm or register a timerfd")]
    #[diagnostic(code(r3bl_reactor::timer_registration))]
    TimerRegistration(#[source] std::io::Error),

    #[error("Invalid timer period {sec}s {usec}us")]
    #[diagnostic(
        code(r3bl_reactor::invalid_timer_period),
        help("The period must be non zero, and usec must be below 1_000_000")
    )]
    InvalidTimerPeriod { sec: u64, usec: u32 },

    #[error("File descriptor {fd} can't be watched for readability")]
    #[diagnostic(
        code(r3bl_reactor::invalid_socket),
        help("Pass an open descriptor that supports epoll (sockets, pipes, ttys)")
    )]
    InvalidSocket {
        fd: RawFd,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File descriptor {fd} is already registered")]
    #[diagnostic(
        code(r3bl_reactor::socket_already_registered),
        help("Call delete_socket_event() before registering the descriptor again")
    )]
    SocketAlreadyRegistered { fd: RawFd },

    #[error("Failed to spawn a thread")]
    #[diagnostic(code(r3bl_reactor::thread_spawn))]
    ThreadSpawn(#[source] std::io::Error),

    #[error("The {which} lock is poisoned")]
    #[diagnostic(
        code(r3bl_reactor::mutex_poisoned),
        help("A thread panicked while holding the lock")
    )]
    MutexPoisoned { which: &'static str },

    #[error("Invalid deadline of {deadline_ms}ms")]
    #[diagnostic(
        code(r3bl_reactor::invalid_deadline),
        help("Deadlines must be at least 1ms")
    )]
    InvalidDeadline { deadline_ms: u64 },

    #[error("The dispatch loop is already running")]
    #[diagnostic(
        code(r3bl_reactor::already_running),
        help("Only one thread may call Reactor::start() at a time")
    )]
    AlreadyRunning,

    #[error("The readiness wait failed")]
    #[diagnostic(
        code(r3bl_reactor::wait),
        help("epoll_wait failed with something other than EINTR")
    )]
    Wait(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_display_includes_fields() {
        let error = ReactorError::InvalidTimerPeriod { sec: 0, usec: 0 };
        assert_eq!(error.to_string(), "Invalid timer period 0s 0us");

        let error = ReactorError::SocketAlreadyRegistered { fd: 9 };
        assert_eq!(error.to_string(), "File descriptor 9 is already registered");
    }

    #[test]
    fn test_diagnostic_code() {
        let error = ReactorError::AlreadyRunning;
        assert_eq!(
            error.code().map(|it| it.to_string()),
            Some("r3bl_reactor::already_running".to_string())
        );
    }

    #[test]
    fn test_optional_source() {
        use std::error::Error as _;
        let error = ReactorError::InvalidSocket { fd: -1, source: None };
        assert!(error.source().is_none());

        let error = ReactorError::InvalidSocket {
            fd: 3,
            source: Some(std::io::Error::from_raw_os_error(9)),
        };
        assert!(error.source().is_some());
    }
}

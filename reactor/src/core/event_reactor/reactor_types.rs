// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use crate::RegistrationId;
use std::{fmt::{Debug, Formatter},
          os::fd::RawFd,
          sync::Arc};

/// Callback of a timer or a plain deadline.
pub type TimerFn = Arc<dyn Fn() + Send + Sync + 'static>;

/// Callback of a socket watch or a socket deadline. Receives the watched descriptor.
pub type SocketFn = Arc<dyn Fn(RawFd) + Send + Sync + 'static>;

/// Callback of a signal subscription. Receives the signal number.
pub type SignalFn = Arc<dyn Fn(i32) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerMode {
    /// Fires once per elapsed period until deleted.
    #[default]
    Repeating,
    /// Fires once, then the registration is removed.
    OneShot,
}

/// A callback resolved from a ready source, plus the argument it is called with. This
/// is what the dispatch thread runs inline or hands to the worker pool.
#[derive(Clone)]
pub enum ReadyCallback {
    Timer(TimerFn),
    Socket { fd: RawFd, callback: SocketFn },
    Signal { signal: i32, callback: SignalFn },
}

impl ReadyCallback {
    pub fn invoke(self) {
        match self {
            ReadyCallback::Timer(callback) => callback(),
            ReadyCallback::Socket { fd, callback } => callback(fd),
            ReadyCallback::Signal { signal, callback } => callback(signal),
        }
    }
}

impl Debug for ReadyCallback {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadyCallback::Timer(_) => write!(f, "Timer"),
            ReadyCallback::Socket { fd, .. } => write!(f, "Socket(fd={fd})"),
            ReadyCallback::Signal { signal, .. } => write!(f, "Signal({signal})"),
        }
    }
}

/// A [`ReadyCallback`] tagged with the registration it was resolved from. The id picks
/// the worker in [`DispatchMode::WorkerPool`], so callbacks of one registration run in
/// order on one worker.
///
/// [`DispatchMode::WorkerPool`]: super::DispatchMode::WorkerPool
#[derive(Debug, Clone)]
pub struct ReadyDispatch {
    pub id: RegistrationId,
    pub callback: ReadyCallback,
    /// The socket watch `id` stays unarmed until this callback has run.
    pub releases_socket: bool,
}

impl ReadyDispatch {
    #[must_use]
    pub fn new(id: RegistrationId, callback: ReadyCallback) -> Self {
        Self {
            id,
            callback,
            releases_socket: false,
        }
    }
}

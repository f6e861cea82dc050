// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words timerfd epoll EPOLLET

//! Everything the dispatch thread waits on, behind one capability: [`ReadinessSource`].
//!
//! | Source           | Token                         | Owned by                        |
//! | :--------------- | :---------------------------- | :------------------------------ |
//! | [`ReactorWaker`] | [`SourceKindReady::Waker`]    | the reactor                     |
//! | [`SignalSource`] | [`SourceKindReady::Signals`]  | the reactor (behind a mutex)    |
//! | [`TimerSource`]  | [`RegistrationId::to_token()`]| the reactor (one timerfd each)  |
//! | [`SocketSource`] | [`RegistrationId::to_token()`]| the caller owns the descriptor  |
//!
//! # Edge Triggered Waits
//!
//! [`mio`] registers every source edge triggered (`EPOLLET`): a readable descriptor
//! is reported once, and again only after it transitions from "drained" to "readable".
//! Timers and signals are always drained by [`ReadinessSource::on_ready()`], so they
//! are re-reported correctly. Sockets are not drained by the reactor (the callback
//! reads, or doesn't), so the reactor calls [`ReadinessSource::rearm()`] on each
//! socket that fired, at the start of the next cycle. Re-registering makes the kernel
//! re-evaluate readiness, which yields the level triggered ("still has data, call
//! again") behavior a `select()` style loop has. When callbacks run on the worker
//! pool, the re-arm waits until the socket's callback has run.
//!
//! [`ReactorWaker`]: super::ReactorWaker
//! [`RegistrationId::to_token()`]: crate::RegistrationId::to_token

use super::timer_fd;
use crate::RegistrationId;
use mio::{Interest, Registry, Token, unix::SourceFd};
use signal_hook_mio::v1_0::Signals;
use smallvec::SmallVec;
use std::{io,
          os::fd::{AsRawFd, OwnedFd, RawFd}};

/// A descriptor the dispatch thread can wait on, and consume once it is ready.
///
/// The multiplexing primitive stays an implementation detail of the source: the
/// reactor only sees tokens, and what [`on_ready()`] returns.
///
/// [`on_ready()`]: Self::on_ready
pub trait ReadinessSource {
    /// What consuming a ready source yields.
    type Ready;

    /// Token reported by the wait when this source is ready.
    fn wait_token(&self) -> Token;

    /// Adds the source to the wait set.
    ///
    /// # Errors
    ///
    /// The OS rejected the descriptor.
    fn attach(&mut self, registry: &Registry) -> io::Result<()>;

    /// Re-registers the source, so it is reported again if it is still ready.
    ///
    /// # Errors
    ///
    /// The descriptor was closed or is otherwise gone.
    fn rearm(&mut self, registry: &Registry) -> io::Result<()>;

    /// Removes the source from the wait set.
    ///
    /// # Errors
    ///
    /// The descriptor was closed or was never attached.
    fn detach(&mut self, registry: &Registry) -> io::Result<()>;

    /// Consumes the readiness that woke the wait.
    ///
    /// # Errors
    ///
    /// Reading the source failed.
    fn on_ready(&mut self) -> io::Result<Self::Ready>;
}

/// Identifies which kind of source a [`Token`] belongs to. This is the single source of
/// truth for the reserved tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKindReady {
    /// [`terminate()`] or a registration change interrupted the wait.
    ///
    /// [`terminate()`]: crate::Reactor::terminate
    Waker,
    /// [`SignalSource`] has pending signals.
    Signals,
    /// A timer or socket, looked up in the registration tables.
    Registration(RegistrationId),
}

impl SourceKindReady {
    #[must_use]
    pub const fn to_token(self) -> Token {
        match self {
            Self::Waker => Token(0),
            Self::Signals => Token(1),
            Self::Registration(id) => id.to_token(),
        }
    }

    #[must_use]
    pub const fn from_token(token: Token) -> Self {
        match token.0 {
            0 => Self::Waker,
            1 => Self::Signals,
            _ => Self::Registration(RegistrationId::from_token(token)),
        }
    }
}

fn register_fd(registry: &Registry, fd: RawFd, token: Token) -> io::Result<()> {
    registry.register(&mut SourceFd(&fd), token, Interest::READABLE)
}

fn reregister_fd(registry: &Registry, fd: RawFd, token: Token) -> io::Result<()> {
    registry.reregister(&mut SourceFd(&fd), token, Interest::READABLE)
}

fn deregister_fd(registry: &Registry, fd: RawFd) -> io::Result<()> {
    registry.deregister(&mut SourceFd(&fd))
}

/// A [`timerfd`] owned by the reactor. The descriptor is closed when the registration
/// is removed from the timer table.
///
/// [`timerfd`]: super::timer_fd
#[derive(Debug)]
pub struct TimerSource {
    fd: OwnedFd,
    token: Token,
}

impl TimerSource {
    #[must_use]
    pub fn new(fd: OwnedFd, id: RegistrationId) -> Self {
        Self {
            fd,
            token: id.to_token(),
        }
    }

    #[must_use]
    pub fn raw_fd(&self) -> RawFd { self.fd.as_raw_fd() }
}

impl ReadinessSource for TimerSource {
    /// Expirations since the last read.
    type Ready = u64;

    fn wait_token(&self) -> Token { self.token }

    fn attach(&mut self, registry: &Registry) -> io::Result<()> {
        register_fd(registry, self.raw_fd(), self.token)
    }

    fn rearm(&mut self, registry: &Registry) -> io::Result<()> {
        reregister_fd(registry, self.raw_fd(), self.token)
    }

    fn detach(&mut self, registry: &Registry) -> io::Result<()> {
        deregister_fd(registry, self.raw_fd())
    }

    fn on_ready(&mut self) -> io::Result<u64> { timer_fd::read_expirations(&self.fd) }
}

/// A caller owned descriptor watched for readability. The reactor never reads from or
/// closes it.
#[derive(Debug, Clone, Copy)]
pub struct SocketSource {
    fd: RawFd,
    token: Token,
}

impl SocketSource {
    #[must_use]
    pub fn new(fd: RawFd, id: RegistrationId) -> Self {
        Self {
            fd,
            token: id.to_token(),
        }
    }

    #[must_use]
    pub fn raw_fd(&self) -> RawFd { self.fd }
}

impl ReadinessSource for SocketSource {
    /// The descriptor to hand to the callback.
    type Ready = RawFd;

    fn wait_token(&self) -> Token { self.token }

    fn attach(&mut self, registry: &Registry) -> io::Result<()> {
        register_fd(registry, self.fd, self.token)
    }

    fn rearm(&mut self, registry: &Registry) -> io::Result<()> {
        reregister_fd(registry, self.fd, self.token)
    }

    fn detach(&mut self, registry: &Registry) -> io::Result<()> {
        deregister_fd(registry, self.fd)
    }

    fn on_ready(&mut self) -> io::Result<RawFd> { Ok(self.fd) }
}

/// Self pipe that becomes readable when a subscribed signal is delivered.
/// [`signal_hook_mio`] installs the handlers and owns the pipe. The reactor keeps it
/// behind a lock: registration calls [`add_signal()`] from any thread, and the dispatch
/// thread drains it with [`on_ready()`].
///
/// [`add_signal()`]: Self::add_signal
/// [`on_ready()`]: ReadinessSource::on_ready
#[allow(missing_debug_implementations)]
pub struct SignalSource {
    signals: Signals,
}

impl SignalSource {
    /// Creates the pipe with no signals subscribed yet.
    ///
    /// # Errors
    ///
    /// The pipe could not be created.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            signals: Signals::new(std::iter::empty::<i32>())?,
        })
    }

    /// Installs the process wide handler for `signal`. Adding a signal twice is a no-op.
    ///
    /// # Errors
    ///
    /// The OS refused the handler.
    ///
    /// # Panics
    ///
    /// [`signal_hook`] panics on its [`FORBIDDEN`] signals, so callers filter them out.
    ///
    /// [`FORBIDDEN`]: signal_hook::consts::FORBIDDEN
    pub fn add_signal(&self, signal: i32) -> io::Result<()> { self.signals.add_signal(signal) }
}

impl ReadinessSource for SignalSource {
    /// Distinct signal numbers delivered since the last drain, in ascending order.
    type Ready = SmallVec<[i32; 4]>;

    fn wait_token(&self) -> Token { SourceKindReady::Signals.to_token() }

    fn attach(&mut self, registry: &Registry) -> io::Result<()> {
        let token = self.wait_token();
        registry.register(&mut self.signals, token, Interest::READABLE)
    }

    fn rearm(&mut self, registry: &Registry) -> io::Result<()> {
        let token = self.wait_token();
        registry.reregister(&mut self.signals, token, Interest::READABLE)
    }

    fn detach(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.signals)
    }

    fn on_ready(&mut self) -> io::Result<Self::Ready> {
        let mut acc: SmallVec<[i32; 4]> = self.signals.pending().collect();
        acc.sort_unstable();
        Ok(acc)
    }
}

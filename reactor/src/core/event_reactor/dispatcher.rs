// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EINTR epoll

use super::{DEBUG_REACTOR_SHOW_DISPATCH, DispatchMode, ReactorError, ReactorInner,
            ReactorState, ReactorWaker, ReadinessSource, ReadyDispatch, SignalSource,
            SourceKindReady,
            handler_deadlines::take_due_deadlines,
            handler_signals::{consume_pending_signals, resolve_signal_subscribers},
            handler_socket::resolve_ready_socket, handler_timer::acknowledge_ready_timer};
use crate::{Continuation, RegistrationId};
use mio::{Events, Poll, Registry, Token};
use smallvec::SmallVec;
use std::{io::ErrorKind, os::fd::RawFd, time::Instant};

/// OS resources only the dispatch thread touches. Lives in the reactor's dispatcher
/// slot while no thread is inside [`Reactor::start()`], and is moved out for the
/// duration of the loop.
///
/// [`Reactor::start()`]: crate::Reactor::start
#[allow(missing_debug_implementations)]
pub struct Dispatcher {
    /// [`mio`] poll instance (epoll on Linux).
    pub poll_handle: Poll,
    /// Buffer for events returned by [`Poll::poll()`].
    pub ready_events_buffer: Events,
}

/// The shared halves of the resources created by [`Dispatcher::create()`], used by
/// every registration call.
#[allow(missing_debug_implementations)]
pub struct DispatcherHandles {
    pub registry: Registry,
    pub waker: ReactorWaker,
    /// Already attached to the poll. Registration adds signals to it, the dispatch
    /// thread drains it.
    pub signals: SignalSource,
}

impl Dispatcher {
    /// Creates the poll, then the waker and signal pipe from its registry.
    ///
    /// # Errors
    ///
    /// Any OS resource creation or registration failure.
    pub fn create(events_capacity: usize) -> Result<(Self, DispatcherHandles), ReactorError> {
        let poll_handle = Poll::new().map_err(ReactorError::PollCreation)?;

        let registry = poll_handle
            .registry()
            .try_clone()
            .map_err(ReactorError::RegistryClone)?;

        let waker = ReactorWaker::new(poll_handle.registry())
            .map_err(ReactorError::WakerCreation)?;

        let mut signals = SignalSource::new().map_err(ReactorError::SignalCreation)?;
        signals
            .attach(poll_handle.registry())
            .map_err(ReactorError::SignalCreation)?;

        Ok((
            Self {
                poll_handle,
                ready_events_buffer: Events::with_capacity(events_capacity.max(1)),
            },
            DispatcherHandles {
                registry,
                waker,
                signals,
            },
        ))
    }
}

/// One wait cycle.
///
/// 1. Under the lock: observe [`terminate()`], reap finished oneshot timers, re-arm new
///    and fired sources, and size the wait by the next deadline.
/// 2. Block in [`Poll::poll()`] without the lock.
/// 3. Resolve what became ready (see [`resolve_ready_batch()`]).
/// 4. Run the callbacks without the lock, inline or on the worker pool.
///
/// # Errors
///
/// - [`ReactorError::Wait`] for a non [`EINTR`] poll failure.
/// - [`ReactorError::MutexPoisoned`] if the state lock is poisoned.
///
/// [`EINTR`]: std::io::ErrorKind::Interrupted
/// [`terminate()`]: crate::Reactor::terminate
pub(crate) fn run_one_cycle(
    inner: &ReactorInner,
    dispatcher: &mut Dispatcher,
) -> Result<Continuation, ReactorError> {
    let timeout = {
        let mut state = inner.lock_state()?;
        if state.terminate_requested {
            state.terminate_requested = false;
            return Ok(Continuation::Stop);
        }
        state.reap_completed_timers(&inner.registry);
        state.rearm_pending(&inner.registry);

        let snapshot = state.wait_set_snapshot(Instant::now());
        DEBUG_REACTOR_SHOW_DISPATCH.then(|| {
            tracing::debug!(message = "reactor: waiting", ?snapshot);
        });
        snapshot.timeout
    };

    if let Err(err) = dispatcher
        .poll_handle
        .poll(&mut dispatcher.ready_events_buffer, timeout)
    {
        // EINTR - retry (signal interrupted syscall).
        if err.kind() == ErrorKind::Interrupted {
            return Ok(Continuation::Continue);
        }
        return Err(ReactorError::Wait(err));
    }

    for ready in resolve_ready_batch(inner, dispatcher)? {
        inner.dispatch_ready(ready);
    }

    Ok(Continuation::Continue)
}

/// Turns the events of one wait into callbacks, in dispatch order:
///
/// 1. Timers and sockets, by ascending descriptor.
/// 2. Signal subscribers, by signal number, then registration order.
/// 3. Deadlines, by due time.
///
/// Tokens of registrations created or deleted while the wait was blocked are skipped.
fn resolve_ready_batch(
    inner: &ReactorInner,
    dispatcher: &Dispatcher,
) -> Result<SmallVec<[ReadyDispatch; 8]>, ReactorError> {
    let mut signals_ready = false;
    let mut ready_ids: SmallVec<[RegistrationId; 16]> = SmallVec::new();

    for token in collect_ready_tokens(&dispatcher.ready_events_buffer) {
        match SourceKindReady::from_token(token) {
            SourceKindReady::Waker => handle_waker(),
            SourceKindReady::Signals => signals_ready = true,
            SourceKindReady::Registration(id) => ready_ids.push(id),
        }
    }

    let delivered = if signals_ready {
        consume_pending_signals(&mut inner.lock_signals())
    } else {
        SmallVec::new()
    };

    // On the pool a socket callback may still be queued at the top of the next cycle,
    // so the watch stays unarmed until it has run.
    let hold_sockets = inner.config.dispatch_mode == DispatchMode::WorkerPool;
    let mut state = inner.lock_state()?;

    let mut by_fd: SmallVec<[(RawFd, ReadyDispatch); 8]> = ready_ids
        .into_iter()
        .filter_map(|id| resolve_ready_registration(&mut state, id, hold_sockets))
        .collect();
    by_fd.sort_by_key(|(fd, _)| *fd);

    let mut acc: SmallVec<[ReadyDispatch; 8]> =
        by_fd.into_iter().map(|(_, ready)| ready).collect();
    acc.extend(resolve_signal_subscribers(&state, &delivered));
    acc.extend(take_due_deadlines(&mut state, Instant::now()));

    Ok(acc)
}

fn resolve_ready_registration(
    state: &mut ReactorState,
    id: RegistrationId,
    hold_sockets: bool,
) -> Option<(RawFd, ReadyDispatch)> {
    if state.timers.contains_key(&id) {
        acknowledge_ready_timer(state, id)
    } else if state.socket_ids.contains_key(&id) {
        resolve_ready_socket(state, id, hold_sockets)
    } else {
        DEBUG_REACTOR_SHOW_DISPATCH.then(|| {
            tracing::debug!(message = "reactor: token of a deleted registration", %id);
        });
        None
    }
}

// Tokens are copied out so the events buffer isn't borrowed while the state is locked.
fn collect_ready_tokens(events: &Events) -> SmallVec<[Token; 16]> {
    events.iter().map(mio::event::Event::token).collect()
}

fn handle_waker() {
    DEBUG_REACTOR_SHOW_DISPATCH.then(|| {
        tracing::debug!(message = "reactor: woken");
    });
}

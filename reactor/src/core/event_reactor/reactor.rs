// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words timerfd

use super::{DEBUG_REACTOR_SHOW_DISPATCH, Dispatcher, DispatcherHandles, DispatchMode,
            ReactorConfig, ReactorError, ReactorState, ReactorWaker, ReadinessSource,
            ReadyCallback, ReadyDispatch, SignalFn, SignalSource, SocketFn,
            SocketRegistration, SocketSource, TimerFn, TimerMode, TimerRegistration,
            TimerSource, dispatcher::run_one_cycle, timer_fd};
use crate::{Continuation, DeadlineMode, LivenessState, RegistrationId, WorkerPool};
use mio::Registry;
use signal_hook::consts::FORBIDDEN;
use smallvec::SmallVec;
use std::{fmt::{Debug, Formatter},
          io,
          os::fd::RawFd,
          sync::{Arc, Mutex, MutexGuard, PoisonError, Weak,
                 atomic::{AtomicBool, Ordering}},
          time::{Duration, Instant}};

/// Highest signal number on Linux (`SIGRTMAX`).
const MAX_SIGNAL: i32 = 64;

/// A cheap, cloneable handle to one event reactor. All clones refer to the same
/// registration tables, worker pool, and dispatch loop.
///
/// Construct one explicitly with [`Reactor::new()`] and pass it (or a [`WeakReactor`])
/// to the collaborators that need it. Several independent instances can coexist, which
/// is what the tests do.
///
/// # Lifecycle
///
/// ```text
/// new() ──▶ create_*() ... ──▶ start() [blocks, runs cycles] ──▶ returns
///                                 ▲            │
///                                 │       terminate()
///                                 └── may be called again
/// ```
///
/// # Registration Changes While Running
///
/// Every `create_*()` / `delete_*()` call takes the state lock briefly and wakes the
/// dispatch thread. Additions take effect on the next wait cycle. Deletions take effect
/// immediately: once `delete_*()` returns, the deleted callback is not resolved again
/// (a callback already handed to the worker pool still runs).
///
/// # Worker Pool Dispatch
///
/// With [`DispatchMode::WorkerPool`], every callback of one registration is queued on
/// the same worker, so they never overlap. A socket isn't watched again until its
/// queued callback has run, which keeps one pending read from piling up items.
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<ReactorInner>,
}

/// Non owning counterpart of [`Reactor`], for callbacks that need to reach back into
/// the reactor that runs them without keeping it alive.
#[derive(Clone)]
pub struct WeakReactor {
    inner: Weak<ReactorInner>,
}

pub(crate) struct ReactorInner {
    pub(crate) config: ReactorConfig,
    pub(crate) state: Mutex<ReactorState>,
    pub(crate) registry: Registry,
    pub(crate) waker: ReactorWaker,
    /// Attached to [`Self::registry`]. Locked briefly to add a signal, or by the
    /// dispatch thread to drain delivered ones. Never held with the state lock.
    pub(crate) signals: Mutex<SignalSource>,
    pub(crate) pool: WorkerPool,
    /// `None` while a thread is inside [`Reactor::start()`].
    pub(crate) dispatcher_slot: Mutex<Option<Dispatcher>>,
    pub(crate) is_dispatching: AtomicBool,
    /// Lets pool items report back without keeping the reactor alive.
    pub(crate) weak_self: Weak<ReactorInner>,
}

impl ReactorInner {
    /// # Errors
    ///
    /// [`ReactorError::MutexPoisoned`] if a thread panicked while holding the lock.
    pub(crate) fn lock_state(&self) -> Result<MutexGuard<'_, ReactorState>, ReactorError> {
        self.state
            .lock()
            .map_err(|_| ReactorError::MutexPoisoned { which: "reactor state" })
    }

    /// For calls that can't report an error. No user code runs under the state lock,
    /// so the tables are consistent even if it is poisoned.
    pub(crate) fn lock_state_or_recover(&self) -> MutexGuard<'_, ReactorState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(message = "reactor: recovering poisoned state lock");
            poisoned.into_inner()
        })
    }

    pub(crate) fn lock_signals(&self) -> MutexGuard<'_, SignalSource> {
        self.signals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn dispatch_ready(&self, ready: ReadyDispatch) {
        let ReadyDispatch {
            id,
            callback,
            releases_socket,
        } = ready;

        match self.config.dispatch_mode {
            DispatchMode::Inline => callback.invoke(),
            DispatchMode::WorkerPool => {
                let weak_self = self.weak_self.clone();
                self.pool.queue_work_to(id.as_usize(), move || {
                    callback.invoke();
                    if releases_socket && let Some(inner) = weak_self.upgrade() {
                        inner.release_socket(id);
                    }
                });
            }
        }
    }

    /// Lets the dispatch thread watch a held socket again.
    fn release_socket(&self, id: RegistrationId) {
        if self.lock_state_or_recover().release_socket(id) {
            self.waker.wake();
        }
    }
}

impl Debug for Reactor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("config", &self.inner.config)
            .field("liveness", &self.dispatch_liveness())
            .field("timers", &self.timer_count())
            .field("sockets", &self.socket_count())
            .field("deadlines", &self.deadline_count())
            .finish_non_exhaustive()
    }
}

impl Debug for WeakReactor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakReactor")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl WeakReactor {
    #[must_use]
    pub fn upgrade(&self) -> Option<Reactor> {
        self.inner.upgrade().map(|inner| Reactor { inner })
    }
}

// ╭──────────────────────────────────────────────────────────╮
// │ Construction, lifecycle                                  │
// ╰──────────────────────────────────────────────────────────╯

impl Reactor {
    /// Creates the OS wait primitive, the signal pipe, and the worker pool. The dispatch
    /// loop does not run until [`start()`] is called.
    ///
    /// # Errors
    ///
    /// Any OS resource that can't be created, see [`ReactorError`].
    ///
    /// [`start()`]: Self::start
    pub fn new(config: ReactorConfig) -> Result<Self, ReactorError> {
        let (
            dispatcher,
            DispatcherHandles {
                registry,
                waker,
                signals,
            },
        ) = Dispatcher::create(config.events_capacity)?;
        let pool = WorkerPool::new(config.worker_count)?;

        tracing::debug!(
            message = "reactor: created",
            workers = config.worker_count.get(),
            dispatch_mode = %config.dispatch_mode
        );

        Ok(Self {
            inner: Arc::new_cyclic(|weak_self| ReactorInner {
                config,
                state: Mutex::new(ReactorState::default()),
                registry,
                waker,
                signals: Mutex::new(signals),
                pool,
                dispatcher_slot: Mutex::new(Some(dispatcher)),
                is_dispatching: AtomicBool::new(false),
                weak_self: weak_self.clone(),
            }),
        })
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakReactor {
        WeakReactor {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Runs the dispatch loop on the calling thread until [`terminate()`] is observed.
    ///
    /// A [`terminate()`] that arrives before [`start()`] makes the next [`start()`]
    /// return after its first check. After returning, the loop may be started again.
    ///
    /// # Errors
    ///
    /// - [`ReactorError::AlreadyRunning`] if another thread is inside [`start()`].
    /// - [`ReactorError::Wait`] if the wait primitive fails.
    ///
    /// # Panics
    ///
    /// A panicking inline callback unwinds out of this call. The reactor stays usable:
    /// the dispatch resources are returned, and [`start()`] may be called again.
    ///
    /// [`start()`]: Self::start
    /// [`terminate()`]: Self::terminate
    pub fn start(&self) -> Result<(), ReactorError> {
        let dispatcher = self
            .inner
            .dispatcher_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ReactorError::AlreadyRunning)?;

        let mut guard = DispatchGuard::new(&self.inner, dispatcher);
        tracing::debug!(message = "reactor: dispatch loop started");
        let result = guard.run_until_stopped();
        tracing::debug!(message = "reactor: dispatch loop exited", ok = result.is_ok());
        result
    }

    /// Asks the dispatch loop to exit at the top of its next cycle, and interrupts the
    /// wait. Idempotent. A callback that is already running is not interrupted, and
    /// items already queued on the worker pool still run (see [`WorkerPool::stopall()`]).
    pub fn terminate(&self) {
        self.inner.lock_state_or_recover().terminate_requested = true;
        self.inner.waker.wake();
    }

    #[must_use]
    pub fn dispatch_liveness(&self) -> LivenessState {
        self.inner.is_dispatching.load(Ordering::SeqCst).into()
    }

    #[must_use]
    pub fn config(&self) -> &ReactorConfig { &self.inner.config }

    #[must_use]
    pub fn worker_pool(&self) -> &WorkerPool { &self.inner.pool }

    /// Runs `job` on the worker pool right away, bypassing the wait.
    pub fn run_execution(&self, job: impl FnOnce() + Send + 'static) {
        self.inner.pool.queue_work(job);
    }

    fn notify_registration_changed(&self) { self.inner.waker.wake(); }
}

// ╭──────────────────────────────────────────────────────────╮
// │ Timers                                                   │
// ╰──────────────────────────────────────────────────────────╯

impl Reactor {
    /// Repeating timer, fires every `sec.usec` until deleted.
    ///
    /// # Errors
    ///
    /// See [`create_timer_event_with_mode()`](Self::create_timer_event_with_mode).
    pub fn create_timer_event(
        &self,
        sec: u64,
        usec: u32,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Result<RegistrationId, ReactorError> {
        self.create_timer_event_with_mode(TimerMode::Repeating, sec, usec, callback)
    }

    /// Fires once, `sec.usec` from now, then removes itself.
    ///
    /// # Errors
    ///
    /// See [`create_timer_event_with_mode()`](Self::create_timer_event_with_mode).
    pub fn create_oneshot_timer_event(
        &self,
        sec: u64,
        usec: u32,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Result<RegistrationId, ReactorError> {
        self.create_timer_event_with_mode(TimerMode::OneShot, sec, usec, callback)
    }

    /// Creates a timer backed by its own [`timerfd`].
    ///
    /// # Errors
    ///
    /// - [`ReactorError::InvalidTimerPeriod`] for a zero period or `usec >= 1_000_000`.
    /// - [`ReactorError::TimerCreation`] when out of descriptors.
    /// - [`ReactorError::TimerRegistration`] if the timer can't be armed or watched.
    ///
    /// [`timerfd`]: super::timer_fd
    pub fn create_timer_event_with_mode(
        &self,
        mode: TimerMode,
        sec: u64,
        usec: u32,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Result<RegistrationId, ReactorError> {
        let period = timer_fd::validate_period(sec, usec)?;
        let fd = timer_fd::create_armed_timer_fd(period, mode)?;

        let id = RegistrationId::next();
        let mut source = TimerSource::new(fd, id);
        source
            .attach(&self.inner.registry)
            .map_err(ReactorError::TimerRegistration)?;

        let callback: TimerFn = Arc::new(callback);
        self.inner.lock_state()?.timers.insert(
            id,
            TimerRegistration {
                source,
                mode,
                period,
                completed: false,
                armed: false,
                callback,
            },
        );
        self.notify_registration_changed();

        DEBUG_REACTOR_SHOW_DISPATCH.then(|| {
            tracing::debug!(message = "reactor: timer created", %id, ?mode, ?period);
        });
        Ok(id)
    }

    /// Returns `false` if `id` is not a live timer.
    pub fn delete_timer_event(&self, id: RegistrationId) -> bool {
        let Some(mut timer) = self.inner.lock_state_or_recover().timers.remove(&id) else {
            return false;
        };
        if let Err(err) = timer.source.detach(&self.inner.registry) {
            tracing::debug!(message = "reactor: timer detach failed", %id, error = %err);
        }
        self.notify_registration_changed();
        true
    }

    #[must_use]
    pub fn timer_count(&self) -> usize { self.inner.lock_state_or_recover().timers.len() }

    /// The timerfd behind a live timer. Timers and sockets that are ready in the same
    /// cycle run in ascending descriptor order.
    #[must_use]
    pub fn timer_raw_fd(&self, id: RegistrationId) -> Option<RawFd> {
        self.inner
            .lock_state_or_recover()
            .timers
            .get(&id)
            .map(|timer| timer.source.raw_fd())
    }
}

// ╭──────────────────────────────────────────────────────────╮
// │ Sockets                                                  │
// ╰──────────────────────────────────────────────────────────╯

impl Reactor {
    /// Watches `fd` for readability. The callback gets `fd`, once per wait cycle in which
    /// data is pending. The caller keeps ownership of the descriptor, and must call
    /// [`delete_socket_event()`] before closing it.
    ///
    /// # Errors
    ///
    /// - [`ReactorError::InvalidSocket`] for a negative, closed, or unpollable `fd`.
    /// - [`ReactorError::SocketAlreadyRegistered`] if `fd` is already watched.
    ///
    /// [`delete_socket_event()`]: Self::delete_socket_event
    pub fn create_socket_event(
        &self,
        fd: RawFd,
        callback: impl Fn(RawFd) + Send + Sync + 'static,
    ) -> Result<RegistrationId, ReactorError> {
        if fd < 0 {
            return Err(ReactorError::InvalidSocket { fd, source: None });
        }

        let id = RegistrationId::next();
        {
            let mut state = self.inner.lock_state()?;
            if state.sockets.contains_key(&fd) {
                return Err(ReactorError::SocketAlreadyRegistered { fd });
            }

            let mut source = SocketSource::new(fd, id);
            source.attach(&self.inner.registry).map_err(|err| {
                ReactorError::InvalidSocket {
                    fd,
                    source: Some(err),
                }
            })?;

            let callback: SocketFn = Arc::new(callback);
            state.sockets.insert(
                fd,
                SocketRegistration {
                    id,
                    source,
                    armed: false,
                    in_flight: false,
                    callback,
                },
            );
            state.socket_ids.insert(id, fd);
        }
        self.notify_registration_changed();

        DEBUG_REACTOR_SHOW_DISPATCH.then(|| {
            tracing::debug!(message = "reactor: socket watch created", %id, fd);
        });
        Ok(id)
    }

    /// Stops watching `fd`. Returns `false` if it wasn't watched. Never closes `fd`.
    pub fn delete_socket_event(&self, fd: RawFd) -> bool {
        let Some(mut socket) = self.inner.lock_state_or_recover().remove_socket(fd) else {
            return false;
        };
        // Fails if the caller closed the descriptor first, which already removed it.
        if let Err(err) = socket.source.detach(&self.inner.registry) {
            tracing::debug!(message = "reactor: socket detach failed", fd, error = %err);
        }
        self.notify_registration_changed();
        true
    }

    #[must_use]
    pub fn socket_count(&self) -> usize { self.inner.lock_state_or_recover().sockets.len() }
}

// ╭──────────────────────────────────────────────────────────╮
// │ Signals                                                  │
// ╰──────────────────────────────────────────────────────────╯

impl Reactor {
    /// Appends `callback` to the subscribers of `signal`. All subscribers run, in
    /// registration order, each time the signal is delivered.
    ///
    /// The process wide handler is installed on the first subscription, and stays
    /// installed for the lifetime of the reactor, even when every subscriber is deleted.
    ///
    /// # Errors
    ///
    /// [`ReactorError::SignalRegistration`] for signals that can't be handled
    /// ([`FORBIDDEN`] ones, or numbers out of range).
    pub fn create_signal_event(
        &self,
        signal: i32,
        callback: impl Fn(i32) + Send + Sync + 'static,
    ) -> Result<RegistrationId, ReactorError> {
        self.subscribe_signal(signal, Arc::new(callback))
    }

    /// Subscribes `callback` to every signal in [`ReactorConfig::term_signals`]
    /// (`SIGINT` and `SIGTERM` by default).
    ///
    /// # Errors
    ///
    /// See [`create_signal_event()`](Self::create_signal_event). Subscriptions made
    /// before the failing one are rolled back.
    pub fn register_term_signals(
        &self,
        callback: impl Fn(i32) + Send + Sync + 'static,
    ) -> Result<SmallVec<[RegistrationId; 2]>, ReactorError> {
        let callback: SignalFn = Arc::new(callback);
        let mut acc = SmallVec::new();

        for &signal in &self.inner.config.term_signals {
            match self.subscribe_signal(signal, callback.clone()) {
                Ok(id) => acc.push(id),
                Err(err) => {
                    for id in acc {
                        self.delete_signal_event(id);
                    }
                    return Err(err);
                }
            }
        }

        Ok(acc)
    }

    /// Returns `false` if `id` is not a live signal subscription.
    pub fn delete_signal_event(&self, id: RegistrationId) -> bool {
        let removed = self.inner.lock_state_or_recover().remove_signal_subscriber(id);
        if removed {
            self.notify_registration_changed();
        }
        removed
    }

    #[must_use]
    pub fn signal_subscriber_count(&self, signal: i32) -> usize {
        self.inner
            .lock_state_or_recover()
            .signal_subscriber_count(signal)
    }

    fn subscribe_signal(
        &self,
        signal: i32,
        callback: SignalFn,
    ) -> Result<RegistrationId, ReactorError> {
        if !(1..=MAX_SIGNAL).contains(&signal) || FORBIDDEN.contains(&signal) {
            return Err(ReactorError::SignalRegistration {
                signal,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "signal can't be handled by a process",
                ),
            });
        }

        // Installing the same signal twice is a no-op.
        self.inner
            .lock_signals()
            .add_signal(signal)
            .map_err(|source| ReactorError::SignalRegistration { signal, source })?;

        let id = RegistrationId::next();
        {
            let mut state = self.inner.lock_state()?;
            state.signals.entry(signal).or_default().push((id, callback));
            state.signal_ids.insert(id, signal);
        }
        self.notify_registration_changed();

        DEBUG_REACTOR_SHOW_DISPATCH.then(|| {
            tracing::debug!(message = "reactor: signal subscribed", %id, signal);
        });
        Ok(id)
    }
}

// ╭──────────────────────────────────────────────────────────╮
// │ Deadlines                                                │
// ╰──────────────────────────────────────────────────────────╯

impl Reactor {
    /// Fires `callback` once `deadline_ms` milliseconds have elapsed. A repeating
    /// (`oneshot == false`) deadline then fires every `deadline_ms` until deleted.
    ///
    /// Deadlines run on the dispatch thread, between waits. They bound the wait timeout,
    /// so they keep millisecond precision without a timerfd each.
    ///
    /// # Errors
    ///
    /// [`ReactorError::InvalidDeadline`] for `deadline_ms == 0`.
    pub fn create_deadline_event(
        &self,
        deadline_ms: u64,
        oneshot: bool,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Result<RegistrationId, ReactorError> {
        self.schedule_deadline(deadline_ms, oneshot, ReadyCallback::Timer(Arc::new(callback)))
    }

    /// Like [`create_deadline_event()`], but the callback receives `fd`. The descriptor
    /// is not watched, or validated beyond being non negative.
    ///
    /// # Errors
    ///
    /// - [`ReactorError::InvalidDeadline`] for `deadline_ms == 0`.
    /// - [`ReactorError::InvalidSocket`] for a negative `fd`.
    ///
    /// [`create_deadline_event()`]: Self::create_deadline_event
    pub fn create_socket_deadline_event(
        &self,
        fd: RawFd,
        deadline_ms: u64,
        oneshot: bool,
        callback: impl Fn(RawFd) + Send + Sync + 'static,
    ) -> Result<RegistrationId, ReactorError> {
        if fd < 0 {
            return Err(ReactorError::InvalidSocket { fd, source: None });
        }
        self.schedule_deadline(
            deadline_ms,
            oneshot,
            ReadyCallback::Socket {
                fd,
                callback: Arc::new(callback),
            },
        )
    }

    /// Returns `false` if `id` is not a live deadline.
    pub fn delete_deadline_event(&self, id: RegistrationId) -> bool {
        let removed = self.inner.lock_state_or_recover().deadlines.remove(id);
        if removed {
            self.notify_registration_changed();
        }
        removed
    }

    #[must_use]
    pub fn deadline_count(&self) -> usize {
        self.inner.lock_state_or_recover().deadlines.len()
    }

    fn schedule_deadline(
        &self,
        deadline_ms: u64,
        oneshot: bool,
        action: ReadyCallback,
    ) -> Result<RegistrationId, ReactorError> {
        if deadline_ms == 0 {
            return Err(ReactorError::InvalidDeadline { deadline_ms });
        }

        let id = RegistrationId::next();
        self.inner.lock_state()?.deadlines.insert(
            id,
            Duration::from_millis(deadline_ms),
            DeadlineMode::from(oneshot),
            action,
            Instant::now(),
        );
        // The wait timeout must shrink to the new deadline.
        self.notify_registration_changed();

        DEBUG_REACTOR_SHOW_DISPATCH.then(|| {
            tracing::debug!(message = "reactor: deadline created", %id, deadline_ms, oneshot);
        });
        Ok(id)
    }
}

impl Reactor {
    /// `true` while `id` refers to a live timer, socket watch, signal subscription, or
    /// deadline. A fired oneshot timer stays registered until the top of the next cycle.
    #[must_use]
    pub fn is_registered(&self, id: RegistrationId) -> bool {
        self.inner.lock_state_or_recover().is_registered(id)
    }
}

/// Holds the [`Dispatcher`] while [`Reactor::start()`] runs. On drop (normal exit, error,
/// or unwinding from a panicking callback) it marks the loop terminated and returns the
/// dispatcher to its slot.
struct DispatchGuard<'a> {
    inner: &'a ReactorInner,
    dispatcher: Option<Dispatcher>,
}

impl<'a> DispatchGuard<'a> {
    fn new(inner: &'a ReactorInner, dispatcher: Dispatcher) -> Self {
        inner.is_dispatching.store(true, Ordering::SeqCst);
        Self {
            inner,
            dispatcher: Some(dispatcher),
        }
    }

    fn run_until_stopped(&mut self) -> Result<(), ReactorError> {
        let Some(dispatcher) = self.dispatcher.as_mut() else {
            return Ok(());
        };
        while run_one_cycle(self.inner, dispatcher)? == Continuation::Continue {}
        Ok(())
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!(message = "reactor: callback panicked, dispatch loop unwinding");
        }
        *self
            .inner
            .dispatcher_slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = self.dispatcher.take();
        self.inner.is_dispatching.store(false, Ordering::SeqCst);
    }
}

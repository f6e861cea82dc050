// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words timerfd

use super::{DEBUG_REACTOR_SHOW_DISPATCH, ReadinessSource, ReadyCallback, SignalFn,
            SocketFn, SocketSource, TimerFn, TimerMode, TimerSource};
use crate::{DeadlineMonitor, RegistrationId};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::{collections::BTreeMap,
          os::fd::RawFd,
          time::{Duration, Instant}};

/// A live timer. Removed when deleted, or at the top of the cycle after a
/// [`TimerMode::OneShot`] timer fired.
#[allow(missing_debug_implementations)]
pub struct TimerRegistration {
    pub source: TimerSource,
    pub mode: TimerMode,
    pub period: Duration,
    /// Set once a oneshot timer fired.
    pub completed: bool,
    /// `false` until the dispatch thread re-registered it at the top of a cycle. Ready
    /// reports for unarmed registrations belong to a wait that started before the
    /// registration existed, and are skipped.
    pub armed: bool,
    pub callback: TimerFn,
}

/// A live socket watch, keyed by descriptor in [`ReactorState::sockets`].
#[allow(missing_debug_implementations)]
pub struct SocketRegistration {
    pub id: RegistrationId,
    pub source: SocketSource,
    /// Cleared when the socket fires, so it is re-registered (and re-reported if still
    /// readable) next cycle. See [edge triggered waits].
    ///
    /// [edge triggered waits]: super::sources#edge-triggered-waits
    pub armed: bool,
    /// Set while a callback resolved for this socket waits on, or runs on, the worker
    /// pool. The socket isn't re-armed until it clears.
    pub in_flight: bool,
    pub callback: SocketFn,
}

/// Subscribers of one signal number, in registration order.
pub type SignalSubscribers = SmallVec<[(RegistrationId, SignalFn); 2]>;

/// What the blocking wait of one cycle covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSetSnapshot {
    pub timer_count: usize,
    pub socket_count: usize,
    /// Largest descriptor in the wait set (timers, sockets, signal pipe excluded).
    pub max_fd: Option<RawFd>,
    /// Time left until the next deadline; `None` waits until a source is ready.
    pub timeout: Option<Duration>,
}

/// Registration tables plus the termination flag. Guarded by the single state lock of
/// the [`Reactor`]. User callbacks never run while it is held.
///
/// [`Reactor`]: crate::Reactor
#[allow(missing_debug_implementations)]
#[derive(Default)]
pub struct ReactorState {
    pub terminate_requested: bool,
    pub timers: FxHashMap<RegistrationId, TimerRegistration>,
    /// At most one registration per descriptor.
    pub sockets: FxHashMap<RawFd, SocketRegistration>,
    /// Token lookup for [`Self::sockets`].
    pub socket_ids: FxHashMap<RegistrationId, RawFd>,
    /// Ordered by signal number, so fan out across signals is deterministic.
    pub signals: BTreeMap<i32, SignalSubscribers>,
    pub signal_ids: FxHashMap<RegistrationId, i32>,
    pub deadlines: DeadlineMonitor<ReadyCallback>,
}

impl ReactorState {
    #[must_use]
    pub fn signal_subscriber_count(&self, signal: i32) -> usize {
        self.signals.get(&signal).map_or(0, SmallVec::len)
    }

    #[must_use]
    pub fn is_registered(&self, id: RegistrationId) -> bool {
        self.timers.contains_key(&id)
            || self.socket_ids.contains_key(&id)
            || self.signal_ids.contains_key(&id)
            || self.deadlines.contains(id)
    }

    /// Removes the socket watch for `fd`, returning its source so the caller can detach
    /// it.
    pub fn remove_socket(&mut self, fd: RawFd) -> Option<SocketRegistration> {
        let registration = self.sockets.remove(&fd)?;
        self.socket_ids.remove(&registration.id);
        Some(registration)
    }

    /// Clears [`SocketRegistration::in_flight`] once its pool callback has run. Returns
    /// `false` if the watch was deleted meanwhile.
    pub fn release_socket(&mut self, id: RegistrationId) -> bool {
        let Some(fd) = self.socket_ids.get(&id) else {
            return false;
        };
        match self.sockets.get_mut(fd) {
            Some(socket) => {
                socket.in_flight = false;
                true
            }
            None => false,
        }
    }

    /// Removes one signal subscriber. The OS level handler stays installed.
    pub fn remove_signal_subscriber(&mut self, id: RegistrationId) -> bool {
        let Some(signal) = self.signal_ids.remove(&id) else {
            return false;
        };
        if let Some(subscribers) = self.signals.get_mut(&signal) {
            subscribers.retain(|(it, _)| *it != id);
            if subscribers.is_empty() {
                self.signals.remove(&signal);
            }
        }
        true
    }

    /// Drops oneshot timers that fired during an earlier cycle.
    pub fn reap_completed_timers(&mut self, registry: &mio::Registry) {
        let completed: SmallVec<[RegistrationId; 4]> = self
            .timers
            .iter()
            .filter(|(_, it)| it.completed)
            .map(|(id, _)| *id)
            .collect();

        for id in completed {
            if let Some(mut timer) = self.timers.remove(&id) {
                // The timerfd closes when `timer` drops at the end of this block.
                drop(timer.source.detach(registry));
                DEBUG_REACTOR_SHOW_DISPATCH.then(|| {
                    tracing::debug!(message = "reactor: reaped oneshot timer", %id);
                });
            }
        }
    }

    /// Re-registers every source that is new, or that fired last cycle. Sockets whose
    /// descriptor is gone (closed without [`delete_socket_event()`]) are dropped.
    ///
    /// [`delete_socket_event()`]: crate::Reactor::delete_socket_event
    pub fn rearm_pending(&mut self, registry: &mio::Registry) {
        for (id, timer) in self.timers.iter_mut().filter(|(_, it)| !it.armed) {
            match timer.source.rearm(registry) {
                Ok(()) => timer.armed = true,
                Err(err) => {
                    // Only possible if the timerfd itself vanished.
                    tracing::warn!(message = "reactor: failed to rearm timer", %id, error = %err);
                    timer.completed = true;
                }
            }
        }

        let mut stale: SmallVec<[RawFd; 4]> = SmallVec::new();
        for (fd, socket) in self
            .sockets
            .iter_mut()
            .filter(|(_, it)| !it.armed && !it.in_flight)
        {
            match socket.source.rearm(registry) {
                Ok(()) => socket.armed = true,
                Err(err) => {
                    tracing::warn!(
                        message = "reactor: dropping socket watch, descriptor is gone",
                        fd = *fd,
                        error = %err
                    );
                    stale.push(*fd);
                }
            }
        }
        for fd in stale {
            self.remove_socket(fd);
        }
    }

    pub fn wait_set_snapshot(&mut self, now: Instant) -> WaitSetSnapshot {
        let max_fd = self
            .timers
            .values()
            .map(|it| it.source.raw_fd())
            .chain(self.sockets.keys().copied())
            .max();

        WaitSetSnapshot {
            timer_count: self.timers.len(),
            socket_count: self.sockets.len(),
            max_fd,
            timeout: self.deadlines.next_timeout(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use smallvec::smallvec;
    use std::sync::Arc;

    fn noop_signal() -> SignalFn { Arc::new(|_| {}) }

    #[test]
    fn test_remove_signal_subscriber_keeps_order_of_the_rest() {
        let mut state = ReactorState::default();
        let ids: Vec<RegistrationId> = (0..3).map(|_| RegistrationId::next()).collect();
        state.signals.insert(
            10,
            smallvec![
                (ids[0], noop_signal()),
                (ids[1], noop_signal()),
                (ids[2], noop_signal())
            ],
        );
        for id in &ids {
            state.signal_ids.insert(*id, 10);
        }

        assert!(state.remove_signal_subscriber(ids[1]));
        assert!(!state.remove_signal_subscriber(ids[1]));

        let remaining: Vec<RegistrationId> =
            state.signals[&10].iter().map(|(id, _)| *id).collect();
        assert_eq!(remaining, vec![ids[0], ids[2]]);
        assert_eq!(state.signal_subscriber_count(10), 2);
    }

    #[test]
    fn test_last_subscriber_removes_signal_entry() {
        let mut state = ReactorState::default();
        let id = RegistrationId::next();
        state.signals.insert(12, smallvec![(id, noop_signal())]);
        state.signal_ids.insert(id, 12);

        assert!(state.remove_signal_subscriber(id));
        assert_eq!(state.signal_subscriber_count(12), 0);
        assert!(!state.is_registered(id));
    }

    #[test]
    fn test_empty_snapshot_waits_forever() {
        let mut state = ReactorState::default();
        let snapshot = state.wait_set_snapshot(Instant::now());
        assert_eq!(
            snapshot,
            WaitSetSnapshot {
                timer_count: 0,
                socket_count: 0,
                max_fd: None,
                timeout: None,
            }
        );
    }
}

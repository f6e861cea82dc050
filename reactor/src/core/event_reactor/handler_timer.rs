// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words timerfd

use super::{DEBUG_REACTOR_SHOW_DISPATCH, ReactorState, ReadinessSource, ReadyCallback,
            ReadyDispatch, TimerMode};
use crate::RegistrationId;
use std::os::fd::RawFd;

/// Acknowledges a ready timer and resolves its callback. Called under the state lock.
///
/// Returns `None` when there is nothing to fire: the timer was deleted or created during
/// the wait, a oneshot already fired, or the read found no expiration (spurious wakeup).
/// Several expirations that piled up since the last read fire the callback once.
pub fn acknowledge_ready_timer(
    state: &mut ReactorState,
    id: RegistrationId,
) -> Option<(RawFd, ReadyDispatch)> {
    let timer = state.timers.get_mut(&id)?;
    if !timer.armed || timer.completed {
        return None;
    }

    let expirations = match timer.source.on_ready() {
        Ok(it) => it,
        Err(err) => {
            tracing::warn!(message = "reactor: failed to read timerfd", %id, error = %err);
            return None;
        }
    };
    if expirations == 0 {
        return None;
    }

    DEBUG_REACTOR_SHOW_DISPATCH.then(|| {
        tracing::debug!(
            message = "reactor: timer ready",
            %id,
            expirations,
            mode = ?timer.mode
        );
    });

    if timer.mode == TimerMode::OneShot {
        timer.completed = true;
    }

    Some((
        timer.source.raw_fd(),
        ReadyDispatch::new(id, ReadyCallback::Timer(timer.callback.clone())),
    ))
}

// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use super::{DEBUG_REACTOR_SHOW_DISPATCH, ReactorState, ReadinessSource, ReadyCallback,
            ReadyDispatch};
use crate::RegistrationId;
use std::os::fd::RawFd;

/// Resolves the callback of a readable socket, and marks the watch for re-arming at the
/// start of the next cycle. With `hold_until_run`, the watch is also held unarmed until
/// the callback has run (see [`ReactorState::release_socket()`]). Called under the
/// state lock.
///
/// Returns `None` if the watch was deleted or created during the wait.
pub fn resolve_ready_socket(
    state: &mut ReactorState,
    id: RegistrationId,
    hold_until_run: bool,
) -> Option<(RawFd, ReadyDispatch)> {
    let fd = *state.socket_ids.get(&id)?;
    let socket = state.sockets.get_mut(&fd)?;
    if !socket.armed || socket.in_flight {
        return None;
    }
    socket.armed = false;

    let fd = match socket.source.on_ready() {
        Ok(it) => it,
        Err(err) => {
            tracing::warn!(message = "reactor: socket source failed", fd, error = %err);
            return None;
        }
    };

    socket.in_flight = hold_until_run;

    DEBUG_REACTOR_SHOW_DISPATCH.then(|| {
        tracing::debug!(message = "reactor: socket ready", %id, fd, hold_until_run);
    });

    let callback = ReadyCallback::Socket {
        fd,
        callback: socket.callback.clone(),
    };
    Some((
        fd,
        ReadyDispatch {
            releases_socket: hold_until_run,
            ..ReadyDispatch::new(id, callback)
        },
    ))
}

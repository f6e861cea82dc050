// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use super::{DEBUG_REACTOR_SHOW_DISPATCH, ReactorState, ReadyDispatch};
use smallvec::SmallVec;
use std::time::Instant;

/// Deadlines due at `now`, in due order. Oneshots are removed, repeating deadlines are
/// rescheduled. Called under the state lock.
pub fn take_due_deadlines(
    state: &mut ReactorState,
    now: Instant,
) -> SmallVec<[ReadyDispatch; 4]> {
    state
        .deadlines
        .take_due(now)
        .into_iter()
        .map(|(id, callback)| {
            DEBUG_REACTOR_SHOW_DISPATCH.then(|| {
                tracing::debug!(message = "reactor: deadline due", %id, ?callback);
            });
            ReadyDispatch::new(id, callback)
        })
        .collect()
}

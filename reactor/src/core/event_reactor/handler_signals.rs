// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use super::{DEBUG_REACTOR_SHOW_DISPATCH, ReactorState, ReadinessSource, ReadyCallback,
            ReadyDispatch, SignalSource};
use smallvec::SmallVec;

/// Drains the signal pipe. Each signal number shows up once, however many times it was
/// delivered since the last drain.
pub fn consume_pending_signals(signals: &mut SignalSource) -> SmallVec<[i32; 4]> {
    match signals.on_ready() {
        Ok(delivered) => {
            DEBUG_REACTOR_SHOW_DISPATCH.then(|| {
                tracing::debug!(message = "reactor: signals delivered", ?delivered);
            });
            delivered
        }
        Err(err) => {
            tracing::warn!(message = "reactor: failed to drain signals", error = %err);
            SmallVec::new()
        }
    }
}

/// Every subscriber of every delivered signal. Subscribers of one signal stay in
/// registration order. Called under the state lock.
pub fn resolve_signal_subscribers(
    state: &ReactorState,
    delivered: &[i32],
) -> SmallVec<[ReadyDispatch; 4]> {
    let mut acc = SmallVec::new();

    for &signal in delivered {
        let Some(subscribers) = state.signals.get(&signal) else {
            // Handler is still installed, but everyone unsubscribed.
            DEBUG_REACTOR_SHOW_DISPATCH.then(|| {
                tracing::debug!(message = "reactor: signal has no subscribers", signal);
            });
            continue;
        };
        acc.extend(
            subscribers
                .iter()
                .map(|(id, callback)| {
                    ReadyDispatch::new(
                        *id,
                        ReadyCallback::Signal {
                            signal,
                            callback: callback.clone(),
                        },
                    )
                }),
        );
    }

    acc
}

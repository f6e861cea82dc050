// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll timerfd EINTR EPOLLET

//! # Architecture Overview
//!
//! The [`Reactor`] multiplexes timers, socket readiness, and OS signals onto one
//! [`mio::Poll`], and dispatches the callback registered for whichever source became
//! ready. Millisecond deadlines from the [`DeadlineMonitor`] bound the wait timeout.
//!
//! ```text
//!  registration API (any thread)                  dispatch thread (Reactor::start)
//! ┌──────────────────────────────┐               ┌──────────────────────────────────┐
//! │ create_timer_event()         │   state lock  │ 1. terminate? reap, rearm,       │
//! │ create_socket_event()        ├──────────────▶│    snapshot (timeout = deadline) │
//! │ create_signal_event()        │               │ 2. Poll::poll()      [no lock]   │
//! │ create_deadline_event()      │  Waker::wake  │ 3. resolve tokens    [lock]      │
//! │ delete_*(), terminate()      ├──────────────▶│ 4. run callbacks     [no lock]   │
//! └──────────────────────────────┘               └───────────────┬──────────────────┘
//!                                                                │ DispatchMode::WorkerPool
//!                                                                ▼
//!                                                          WorkerPool::queue_work()
//! ```
//!
//! # Sources And Tokens
//!
//! | Token       | Source                         | Handler                           |
//! | :---------- | :----------------------------- | :-------------------------------- |
//! | `0`         | [`ReactorWaker`]               | none, only unblocks the wait      |
//! | `1`         | [`SignalSource`]               | [`consume_pending_signals()`]     |
//! | `2..` timer | [`TimerSource`] (a `timerfd`)  | [`acknowledge_ready_timer()`]     |
//! | `2..` fd    | [`SocketSource`]               | [`resolve_ready_socket()`]        |
//!
//! Registration tokens are [`RegistrationId`]s. See [`sources`] for why sockets are
//! re-registered after they fire (mio is edge triggered, the reactor's socket
//! semantics are level triggered).
//!
//! # Ordering Within One Cycle
//!
//! 1. Ready timers and sockets, by ascending descriptor.
//! 2. Delivered signals, by signal number. Subscribers of one signal in registration
//!    order.
//! 3. Due deadlines, by due time.
//!
//! # Snapshot Semantics
//!
//! A registration created while the wait is blocked is not armed yet: its readiness is
//! ignored for the current cycle, and it is re-registered (and re-evaluated) at the top
//! of the next one. A registration deleted while the wait is blocked is skipped. So a
//! cycle never dispatches a half built set.
//!
//! # EINTR Handling
//!
//! [`Poll::poll()`] failing with [`ErrorKind::Interrupted`] retries the cycle. Any other
//! failure ends [`Reactor::start()`] with [`ReactorError::Wait`].
//!
//! # Callback Faults
//!
//! Callbacks are not wrapped in [`catch_unwind()`]. An inline callback that panics
//! unwinds out of [`Reactor::start()`]; a drop guard returns the dispatch resources and
//! marks the loop [`LivenessState::Terminated`] on the way out, so the reactor can be
//! started again.
//!
//! [`DeadlineMonitor`]: crate::DeadlineMonitor
//! [`ErrorKind::Interrupted`]: std::io::ErrorKind::Interrupted
//! [`LivenessState::Terminated`]: crate::LivenessState::Terminated
//! [`Poll::poll()`]: mio::Poll::poll
//! [`RegistrationId`]: crate::RegistrationId
//! [`acknowledge_ready_timer()`]: handler_timer::acknowledge_ready_timer
//! [`catch_unwind()`]: std::panic::catch_unwind
//! [`consume_pending_signals()`]: handler_signals::consume_pending_signals
//! [`resolve_ready_socket()`]: handler_socket::resolve_ready_socket

/// Logs every cycle, token, and resolved callback at debug level when `true`.
pub const DEBUG_REACTOR_SHOW_DISPATCH: bool = false;

// Attach sources.
pub mod dispatcher;
pub mod handler_deadlines;
pub mod handler_signals;
pub mod handler_socket;
pub mod handler_timer;
pub mod reactor;
pub mod reactor_config;
pub mod reactor_error;
pub mod reactor_state;
pub mod reactor_types;
pub mod reactor_waker;
pub mod sources;
pub mod timer_fd;

// Re-export.
pub use dispatcher::*;
pub use reactor::*;
pub use reactor_config::*;
pub use reactor_error::*;
pub use reactor_state::*;
pub use reactor_types::*;
pub use reactor_waker::*;
pub use sources::*;

#[cfg(test)]
mod tests;

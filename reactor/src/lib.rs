// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll timerfd signalfd EINTR

//! # r3bl_reactor
//!
//! A single process **event reactor with an attached worker pool**. One dispatch thread
//! waits on the union of every registered readiness source, and runs the callback that
//! belongs to whichever source became ready:
//!
//! | Source                       | Registered with                           | Callback       |
//! | :--------------------------- | :---------------------------------------- | :------------- |
//! | Periodic / oneshot timer     | [`Reactor::create_timer_event()`]         | `Fn()`         |
//! | Readable socket (any [`fd`]) | [`Reactor::create_socket_event()`]        | `Fn(RawFd)`    |
//! | OS signal                    | [`Reactor::create_signal_event()`]        | `Fn(i32)`      |
//! | Millisecond deadline         | [`Reactor::create_deadline_event()`]      | `Fn()`         |
//! | Ad hoc job                   | [`Reactor::run_execution()`]              | `FnOnce()`     |
//!
//! Callbacks run inline on the dispatch thread, or are forwarded to a fixed size
//! [`WorkerPool`] when the reactor is configured with [`DispatchMode::WorkerPool`].
//!
//! ```text
//! ┌──────────────────────────────┐          ┌──────────────────────────┐
//! │ Dispatch thread (start())    │          │ WorkerPool               │
//! │                              │  queue   │                          │
//! │ mio::Poll waits on:          ├──────────▶ worker-0 .. worker-(N-1) │
//! │   • Waker       (Token 0)    │          │ (private FIFO queues)    │
//! │   • Signals     (Token 1)    │          └──────────────────────────┘
//! │   • timerfds    (Token 2..)  │
//! │   • socket fds  (Token 2..)  │
//! │ + deadline heap → timeout    │
//! └──────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! <!-- It is ok to use ignore here - needs a live dispatch thread -->
//!
//! ```ignore
//! use r3bl_reactor::{Reactor, ReactorConfig};
//!
//! let reactor = Reactor::new(ReactorConfig::default())?;
//! reactor.create_timer_event(1, 0, || tracing::info!("tick"))?;
//!
//! let handle = reactor.clone();
//! reactor.register_term_signals(move |_sig| handle.terminate())?;
//!
//! reactor.start()?; // Blocks until SIGINT / SIGTERM.
//! ```
//!
//! [`fd`]: https://en.wikipedia.org/wiki/File_descriptor
//! [`Reactor::create_timer_event()`]: crate::Reactor::create_timer_event
//! [`Reactor::create_socket_event()`]: crate::Reactor::create_socket_event
//! [`Reactor::create_signal_event()`]: crate::Reactor::create_signal_event
//! [`Reactor::create_deadline_event()`]: crate::Reactor::create_deadline_event
//! [`Reactor::run_execution()`]: crate::Reactor::run_execution
//! [`WorkerPool`]: crate::WorkerPool
//! [`DispatchMode::WorkerPool`]: crate::DispatchMode::WorkerPool

// Enforce strict error handling in production library code only. Tests are allowed to
// use .unwrap() (workspace `Cargo.toml` config allows it).
#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]

// Attach modules (re-exported below to provide clean public API).
pub mod core;
pub mod network_io;

// Re-export.
pub use core::*;
pub use network_io::*;

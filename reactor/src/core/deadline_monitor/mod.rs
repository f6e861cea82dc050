// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Millisecond deadlines that run on the dispatch thread, without a second polling
//! thread.
//!
//! A [`DeadlineMonitor`] is a priority queue ordered by next due time. The
//! [`Reactor`] owns one inside its locked state, and each dispatch cycle:
//!
//! 1. Uses [`DeadlineMonitor::next_timeout()`] as the timeout of the blocking wait, so
//!    the wait unblocks when the earliest deadline is due.
//! 2. Calls [`DeadlineMonitor::take_due()`] after the wait, and fires what it returns.
//!
//! ```text
//! now ────────┬───────────────┬─────────────────────┬──────────▶ time
//!             │               │                     │
//!        reg#7 (due)     reg#3 (+40ms)         reg#9 (+250ms)
//!             ▲
//!             └── heap top: poll timeout = 0ms
//! ```
//!
//! The monitor is generic over the action it stores, and does not run anything itself.
//!
//! [`Reactor`]: crate::Reactor

// Attach sources.
pub mod deadline_heap;

// Re-export.
pub use deadline_heap::*;

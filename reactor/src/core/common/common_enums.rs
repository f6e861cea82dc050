// Copyright (c) 2023-2025 R3BL LLC. Licensed under Apache License, Version 2.0.

/// Control flow signal for loops and threads.
///
/// A unified type for indicating whether a loop or thread should continue processing or
/// stop. Used across:
/// - The [dispatch loop] (one value per wait cycle).
/// - The [`Worker`] thread loop.
///
/// [dispatch loop]: crate::Reactor::start
/// [`Worker`]: crate::Worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Continuation {
    /// Continue to the next iteration.
    #[default]
    Continue,

    /// Stop processing and exit the loop/thread.
    Stop,
}

/// An indication of whether a dedicated thread (the dispatch loop or a worker) is running
/// or terminated.
///
/// # Why Not Just `bool`?
///
/// `bool` requires remembering what `true` means. With this enum:
/// - [`LivenessState::Running`] is unambiguous
/// - Pattern matching catches all cases
/// - Code reads like documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    /// The thread is running and processing events.
    Running,
    /// The thread has exited or was never started.
    Terminated,
}

impl From<bool> for LivenessState {
    fn from(is_running: bool) -> Self {
        if is_running {
            LivenessState::Running
        } else {
            LivenessState::Terminated
        }
    }
}

// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// Attach sources.
pub mod common;
pub mod deadline_monitor;
pub mod event_reactor;
pub mod log;
pub mod worker_pool;

// Re-export.
pub use common::*;
pub use deadline_monitor::*;
pub use event_reactor::*;
pub use log::*;
pub use worker_pool::*;

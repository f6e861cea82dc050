// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Network services driven by the [`Reactor`](crate::Reactor) instead of a thread per
//! connection.

// Attach.
pub mod evt_tcp_service;

// Re-export.
pub use evt_tcp_service::*;

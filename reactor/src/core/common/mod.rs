// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// Attach sources.
pub mod common_enums;
pub mod registration_id;

// Re-export.
pub use common_enums::*;
pub use registration_id::*;

// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Opaque handles returned by every `create_*` call on the [`Reactor`]. See
//! [`RegistrationId`].
//!
//! [`Reactor`]: crate::Reactor

use mio::Token;
use std::{fmt::{Display, Formatter},
          sync::atomic::{AtomicUsize, Ordering}};

/// Tokens below this value are reserved for the reactor's own sources (the waker and
/// the signal pipe). See [`SourceKindReady`].
///
/// [`SourceKindReady`]: crate::SourceKindReady
pub const FIRST_REGISTRATION_TOKEN: usize = 2;

/// Counter for registration ids. Shared by every [`Reactor`] in the process, so ids are
/// unique process wide, and never reused.
///
/// [`Reactor`]: crate::Reactor
static NEXT_REGISTRATION_ID: AtomicUsize = AtomicUsize::new(FIRST_REGISTRATION_TOKEN);

/// A handle to one live registration (timer, socket, signal subscriber, or deadline).
///
/// Deletion is by handle rather than by comparing callbacks, so two registrations that
/// share an identical callback are still distinct.
///
/// # Generation Tagging
///
/// Ids come from a monotonic process wide counter and are never handed out twice.
/// Deleting a registration and creating a new one never resurrects the old id, so a
/// stale handle can't delete somebody else's registration.
///
/// # Token Mapping
///
/// For sources that participate in the wait set (timers and sockets) the id doubles as
/// the [`mio::Token`] the source is registered under. See [`to_token()`].
///
/// [`to_token()`]: Self::to_token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(usize);

impl RegistrationId {
    /// Allocates the next id.
    #[must_use]
    pub fn next() -> Self { Self(NEXT_REGISTRATION_ID.fetch_add(1, Ordering::SeqCst)) }

    #[must_use]
    pub const fn to_token(self) -> Token { Token(self.0) }

    #[must_use]
    pub const fn from_token(token: Token) -> Self { Self(token.0) }

    #[must_use]
    pub const fn as_usize(self) -> usize { self.0 }
}

impl Display for RegistrationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "reg#{}", self.0)
    }
}

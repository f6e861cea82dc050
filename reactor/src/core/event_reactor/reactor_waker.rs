// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use super::SourceKindReady;

/// Newtype wrapping [`mio::Waker`], registered under [`SourceKindReady::Waker`].
///
/// Calling [`wake()`] makes the blocking [`mio::Poll::poll()`] on the dispatch thread
/// return, so that it picks up a [`terminate()`] request or a registration change at
/// the top of the next cycle.
///
/// [`terminate()`]: crate::Reactor::terminate
/// [`wake()`]: Self::wake
#[derive(Debug)]
pub struct ReactorWaker(pub mio::Waker);

impl ReactorWaker {
    /// # Errors
    ///
    /// The eventfd backing the waker could not be created.
    pub fn new(registry: &mio::Registry) -> std::io::Result<Self> {
        mio::Waker::new(registry, SourceKindReady::Waker.to_token()).map(Self)
    }

    /// The return value of [`mio::Waker::wake()`] is discarded: if the poll is gone,
    /// there is nobody to wake.
    pub fn wake(&self) { let _unused = self.0.wake(); }
}

// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use signal_hook::consts::{SIGINT, SIGTERM};
use smallvec::{SmallVec, smallvec};
use std::{num::NonZeroUsize, str::FromStr};
use strum_macros::{Display, EnumString};

/// Environment variable read by [`ReactorConfig::from_env()`] for the worker count.
pub const ENV_WORKERS: &str = "R3BL_REACTOR_WORKERS";

/// Environment variable read by [`ReactorConfig::from_env()`] for the
/// [`DispatchMode`]. Values are `inline` or `worker_pool`.
pub const ENV_DISPATCH_MODE: &str = "R3BL_REACTOR_DISPATCH_MODE";

/// Default capacity of the [`mio::Events`] buffer filled by each wait.
pub const DEFAULT_EVENTS_CAPACITY: usize = 64;

/// Where a ready callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DispatchMode {
    /// On the dispatch thread, one after another, before the next wait.
    #[default]
    Inline,
    /// Wrapped in a [`WorkItem`] and queued on the [`WorkerPool`].
    ///
    /// [`WorkItem`]: crate::WorkItem
    /// [`WorkerPool`]: crate::WorkerPool
    WorkerPool,
}

/// Construction time settings for a [`Reactor`]. Nothing here changes after
/// [`Reactor::new()`].
///
/// [`Reactor`]: crate::Reactor
/// [`Reactor::new()`]: crate::Reactor::new
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Size of the [`WorkerPool`](crate::WorkerPool).
    pub worker_count: NonZeroUsize,
    pub dispatch_mode: DispatchMode,
    /// Max readiness events collected by one wait. More ready sources are picked up by
    /// the next cycle.
    pub events_capacity: usize,
    /// Signals subscribed by [`Reactor::register_term_signals()`].
    ///
    /// [`Reactor::register_term_signals()`]: crate::Reactor::register_term_signals
    pub term_signals: SmallVec<[i32; 2]>,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            dispatch_mode: DispatchMode::default(),
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            term_signals: smallvec![SIGINT, SIGTERM],
        }
    }
}

/// One worker per available hardware thread, or 1 if that can't be determined.
#[must_use]
pub fn default_worker_count() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

impl ReactorConfig {
    #[must_use]
    pub fn with_worker_count(mut self, worker_count: NonZeroUsize) -> Self {
        self.worker_count = worker_count;
        self
    }

    #[must_use]
    pub fn with_dispatch_mode(mut self, dispatch_mode: DispatchMode) -> Self {
        self.dispatch_mode = dispatch_mode;
        self
    }

    /// A capacity of 0 is raised to 1.
    #[must_use]
    pub fn with_events_capacity(mut self, events_capacity: usize) -> Self {
        self.events_capacity = events_capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_term_signals(mut self, term_signals: impl IntoIterator<Item = i32>) -> Self {
        self.term_signals = term_signals.into_iter().collect();
        self
    }

    /// [`ReactorConfig::default()`] with [`ENV_WORKERS`] and [`ENV_DISPATCH_MODE`]
    /// applied on top. Values that don't parse are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().apply_overrides(
            std::env::var(ENV_WORKERS).ok().as_deref(),
            std::env::var(ENV_DISPATCH_MODE).ok().as_deref(),
        )
    }

    fn apply_overrides(
        mut self,
        maybe_workers: Option<&str>,
        maybe_dispatch_mode: Option<&str>,
    ) -> Self {
        if let Some(workers) = maybe_workers {
            match NonZeroUsize::from_str(workers.trim()) {
                Ok(worker_count) => self.worker_count = worker_count,
                Err(err) => tracing::warn!(
                    message = "reactor-config: ignoring invalid worker count",
                    var = ENV_WORKERS,
                    value = workers,
                    error = %err
                ),
            }
        }

        if let Some(dispatch_mode) = maybe_dispatch_mode {
            match DispatchMode::from_str(dispatch_mode.trim()) {
                Ok(it) => self.dispatch_mode = it,
                Err(err) => tracing::warn!(
                    message = "reactor-config: ignoring invalid dispatch mode",
                    var = ENV_DISPATCH_MODE,
                    value = dispatch_mode,
                    error = %err
                ),
            }
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn test_default() {
        let config = ReactorConfig::default();
        assert_eq!(config.dispatch_mode, DispatchMode::Inline);
        assert_eq!(config.events_capacity, DEFAULT_EVENTS_CAPACITY);
        assert_eq!(config.term_signals.as_slice(), &[SIGINT, SIGTERM]);
        assert!(config.worker_count.get() >= 1);
    }

    #[test]
    fn test_builder() {
        let config = ReactorConfig::default()
            .with_worker_count(NonZeroUsize::new(3).unwrap())
            .with_dispatch_mode(DispatchMode::WorkerPool)
            .with_events_capacity(0)
            .with_term_signals([SIGTERM]);
        assert_eq!(config.worker_count.get(), 3);
        assert_eq!(config.dispatch_mode, DispatchMode::WorkerPool);
        assert_eq!(config.events_capacity, 1);
        assert_eq!(config.term_signals.as_slice(), &[SIGTERM]);
    }

    #[test_case("inline", DispatchMode::Inline)]
    #[test_case("worker_pool", DispatchMode::WorkerPool)]
    fn test_dispatch_mode_round_trip(text: &str, expected: DispatchMode) {
        assert_eq!(DispatchMode::from_str(text).unwrap(), expected);
        assert_eq!(expected.to_string(), text);
    }

    #[test]
    fn test_overrides_applied() {
        let config = ReactorConfig::default().apply_overrides(Some(" 5 "), Some("worker_pool"));
        assert_eq!(config.worker_count.get(), 5);
        assert_eq!(config.dispatch_mode, DispatchMode::WorkerPool);
    }

    #[test_case(Some("0"), Some("threads") ; "zero workers and unknown mode")]
    #[test_case(Some("many"), None ; "non numeric workers")]
    #[test_case(None, Some("") ; "empty mode")]
    fn test_invalid_overrides_ignored(workers: Option<&str>, mode: Option<&str>) {
        let default = ReactorConfig::default();
        let config = default.clone().apply_overrides(workers, mode);
        assert_eq!(config, default);
    }
}

// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use crate::RegistrationId;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::{cmp::Reverse,
          collections::BinaryHeap,
          time::{Duration, Instant}};

/// Rebuild the heap once stale entries outnumber live ones by this factor.
const COMPACT_RATIO: usize = 4;

/// Whether a deadline is removed after it fires, or reset for another period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineMode {
    Repeating,
    OneShot,
}

impl From<bool> for DeadlineMode {
    fn from(oneshot: bool) -> Self {
        if oneshot {
            DeadlineMode::OneShot
        } else {
            DeadlineMode::Repeating
        }
    }
}

#[derive(Debug)]
struct DeadlineEntry<A> {
    period: Duration,
    mode: DeadlineMode,
    due: Instant,
    /// Matches the heap node that currently represents this entry. Nodes with any other
    /// generation are stale.
    generation: u64,
    action: A,
}

/// Heap node: `(due, generation, id)`. The generation breaks ties in insertion order.
type HeapNode = Reverse<(Instant, u64, RegistrationId)>;

/// Timer heap of millisecond deadlines, each carrying an action of type `A`.
///
/// Removal is lazy: [`remove()`] only drops the entry from the map, and the matching
/// heap node is discarded when it reaches the top.
///
/// [`remove()`]: Self::remove
#[derive(Debug)]
pub struct DeadlineMonitor<A> {
    entries: FxHashMap<RegistrationId, DeadlineEntry<A>>,
    heap: BinaryHeap<HeapNode>,
    next_generation: u64,
}

impl<A> Default for DeadlineMonitor<A> {
    fn default() -> Self {
        Self {
            entries: FxHashMap::default(),
            heap: BinaryHeap::new(),
            next_generation: 0,
        }
    }
}

impl<A: Clone> DeadlineMonitor<A> {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    #[must_use]
    pub fn contains(&self, id: RegistrationId) -> bool { self.entries.contains_key(&id) }

    /// Schedules `action` to be due `period` after `now`. Replaces any previous entry
    /// with the same `id`.
    pub fn insert(
        &mut self,
        id: RegistrationId,
        period: Duration,
        mode: DeadlineMode,
        action: A,
        now: Instant,
    ) {
        let due = now + period;
        let generation = self.bump_generation();
        self.entries.insert(
            id,
            DeadlineEntry {
                period,
                mode,
                due,
                generation,
                action,
            },
        );
        self.heap.push(Reverse((due, generation, id)));
    }

    /// Returns `false` if `id` was not scheduled.
    pub fn remove(&mut self, id: RegistrationId) -> bool {
        let removed = self.entries.remove(&id).is_some();
        if removed {
            self.maybe_compact();
        }
        removed
    }

    /// Earliest due time among live entries.
    pub fn next_due(&mut self) -> Option<Instant> {
        self.discard_stale_top();
        self.heap.peek().map(|Reverse((due, _, _))| *due)
    }

    /// Time left until the earliest deadline, `Duration::ZERO` if one is already due,
    /// `None` if nothing is scheduled.
    pub fn next_timeout(&mut self, now: Instant) -> Option<Duration> {
        self.next_due().map(|due| due.saturating_duration_since(now))
    }

    /// Pops every deadline that is due at `now`, in due order.
    ///
    /// - [`DeadlineMode::OneShot`] entries are removed.
    /// - [`DeadlineMode::Repeating`] entries are reset to `due + period`, so the firing
    ///   schedule does not drift with dispatch latency. If the dispatch thread fell
    ///   behind by several periods, the missed firings collapse into this one.
    pub fn take_due(&mut self, now: Instant) -> SmallVec<[(RegistrationId, A); 4]> {
        let mut acc = SmallVec::new();

        while let Some(Reverse((due, generation, id))) = self.heap.peek().copied() {
            if due > now {
                break;
            }
            self.heap.pop();

            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            if entry.generation != generation {
                continue;
            }
            let mode = entry.mode;

            match mode {
                DeadlineMode::OneShot => {
                    if let Some(entry) = self.entries.remove(&id) {
                        acc.push((id, entry.action));
                    }
                }
                DeadlineMode::Repeating => {
                    let new_generation = self.bump_generation();
                    if let Some(entry) = self.entries.get_mut(&id) {
                        acc.push((id, entry.action.clone()));
                        entry.due = next_due_after(entry.due, entry.period, now);
                        entry.generation = new_generation;
                        self.heap.push(Reverse((entry.due, new_generation, id)));
                    }
                }
            }
        }

        acc
    }

    fn bump_generation(&mut self) -> u64 {
        let it = self.next_generation;
        self.next_generation += 1;
        it
    }

    fn discard_stale_top(&mut self) {
        while let Some(Reverse((_, generation, id))) = self.heap.peek().copied() {
            let is_live = self
                .entries
                .get(&id)
                .is_some_and(|entry| entry.generation == generation);
            if is_live {
                break;
            }
            self.heap.pop();
        }
    }

    fn maybe_compact(&mut self) {
        if self.heap.len() <= COMPACT_RATIO * (self.entries.len() + 1) {
            return;
        }
        self.heap = self
            .entries
            .iter()
            .map(|(id, entry)| Reverse((entry.due, entry.generation, *id)))
            .collect();
    }
}

/// Smallest `due + k * period` (k >= 1) that lies after `now`.
fn next_due_after(due: Instant, period: Duration, now: Instant) -> Instant {
    let mut next = due + period;
    if next > now || period.is_zero() {
        return next;
    }
    let behind = now.duration_since(next);
    let skipped_periods = behind.as_nanos() / period.as_nanos() + 1;
    // A u32 worth of periods is far beyond any realistic stall.
    let skipped_periods = u32::try_from(skipped_periods).unwrap_or(u32::MAX);
    next += period.saturating_mul(skipped_periods);
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ms(it: u64) -> Duration { Duration::from_millis(it) }

    fn ids(due: &[(RegistrationId, &'static str)]) -> Vec<&'static str> {
        due.iter().map(|(_, label)| *label).collect()
    }

    #[test]
    fn test_empty_monitor_has_no_timeout() {
        let mut monitor = DeadlineMonitor::<&str>::new();
        assert_eq!(monitor.next_timeout(Instant::now()), None);
        assert!(monitor.take_due(Instant::now()).is_empty());
    }

    #[test]
    fn test_next_timeout_is_time_left_on_earliest() {
        let now = Instant::now();
        let mut monitor = DeadlineMonitor::new();
        monitor.insert(RegistrationId::next(), ms(250), DeadlineMode::OneShot, "b", now);
        monitor.insert(RegistrationId::next(), ms(40), DeadlineMode::OneShot, "a", now);

        assert_eq!(monitor.next_timeout(now), Some(ms(40)));
        assert_eq!(monitor.next_timeout(now + ms(100)), Some(Duration::ZERO));
    }

    #[test]
    fn test_take_due_fires_in_due_order_and_removes_oneshots() {
        let now = Instant::now();
        let mut monitor = DeadlineMonitor::new();
        monitor.insert(RegistrationId::next(), ms(30), DeadlineMode::OneShot, "late", now);
        monitor.insert(RegistrationId::next(), ms(10), DeadlineMode::OneShot, "early", now);
        monitor.insert(RegistrationId::next(), ms(500), DeadlineMode::OneShot, "never", now);

        assert!(monitor.take_due(now + ms(5)).is_empty());
        assert_eq!(ids(&monitor.take_due(now + ms(30))), vec!["early", "late"]);
        assert_eq!(monitor.len(), 1);
    }

    #[test]
    fn test_repeating_resets_to_due_plus_period() {
        let now = Instant::now();
        let id = RegistrationId::next();
        let mut monitor = DeadlineMonitor::new();
        monitor.insert(id, ms(100), DeadlineMode::Repeating, "tick", now);

        // Fired late, at 130ms: the next firing is still at 200ms, not 230ms.
        assert_eq!(ids(&monitor.take_due(now + ms(130))), vec!["tick"]);
        assert!(monitor.contains(id));
        assert_eq!(monitor.next_due(), Some(now + ms(200)));
    }

    #[test]
    fn test_repeating_collapses_missed_periods() {
        let now = Instant::now();
        let mut monitor = DeadlineMonitor::new();
        monitor.insert(RegistrationId::next(), ms(10), DeadlineMode::Repeating, "tick", now);

        assert_eq!(monitor.take_due(now + ms(55)).len(), 1);
        assert_eq!(monitor.next_due(), Some(now + ms(60)));
    }

    #[test]
    fn test_removed_deadline_never_fires() {
        let now = Instant::now();
        let id = RegistrationId::next();
        let mut monitor = DeadlineMonitor::new();
        monitor.insert(id, ms(10), DeadlineMode::OneShot, "gone", now);

        assert!(monitor.remove(id));
        assert!(!monitor.remove(id));
        assert!(monitor.take_due(now + ms(20)).is_empty());
        assert_eq!(monitor.next_due(), None);
    }

    #[test]
    fn test_reinsert_replaces_schedule() {
        let now = Instant::now();
        let id = RegistrationId::next();
        let mut monitor = DeadlineMonitor::new();
        monitor.insert(id, ms(10), DeadlineMode::OneShot, "first", now);
        monitor.insert(id, ms(50), DeadlineMode::OneShot, "second", now);

        assert!(monitor.take_due(now + ms(20)).is_empty());
        assert_eq!(ids(&monitor.take_due(now + ms(50))), vec!["second"]);
    }

    #[test]
    fn test_compaction_keeps_live_entries() {
        let now = Instant::now();
        let keep = RegistrationId::next();
        let mut monitor = DeadlineMonitor::new();
        monitor.insert(keep, ms(5), DeadlineMode::OneShot, "keep", now);
        for _ in 0..64 {
            let id = RegistrationId::next();
            monitor.insert(id, ms(1), DeadlineMode::OneShot, "drop", now);
            monitor.remove(id);
        }

        assert_eq!(monitor.len(), 1);
        assert_eq!(ids(&monitor.take_due(now + ms(5))), vec!["keep"]);
    }

    #[test]
    fn test_deadline_mode_from_bool() {
        assert_eq!(DeadlineMode::from(true), DeadlineMode::OneShot);
        assert_eq!(DeadlineMode::from(false), DeadlineMode::Repeating);
    }
}

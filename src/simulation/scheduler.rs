//! Discrete-event scheduler driving simulated time.
//!
//! Events are kept in a map of `simulated timestamp -> FIFO list`, so events
//! sharing a timestamp fire in the order they were registered. Popping an
//! event advances the clock to its timestamp; time never moves backwards.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

pub struct Scheduler<E> {
    // Simulated timestamp -> events registered for it, in registration order
    queue: BTreeMap<Duration, VecDeque<E>>,
    now: Duration,
    stop_at: Option<Duration>,
    fired: u64,
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self {
            queue: BTreeMap::new(),
            now: Duration::ZERO,
            stop_at: None,
            fired: 0,
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Register `event` to fire at `time`. Times in the past are clamped to now.
    pub fn schedule_at(&mut self, time: Duration, event: E) {
        let at = time.max(self.now);
        self.queue.entry(at).or_default().push_back(event);
    }

    /// Register `event` to fire `delay` after now, saturating at `Duration::MAX`.
    pub fn schedule_in(&mut self, delay: Duration, event: E) {
        self.schedule_at(self.now.saturating_add(delay), event);
    }

    /// Bound the run: events later than `time` never fire, events at exactly
    /// `time` still do.
    pub fn stop_at(&mut self, time: Duration) {
        self.stop_at = Some(time);
    }

    /// Pop the earliest due event and advance the clock to it.
    ///
    /// Returns `None` when the queue is drained or the next event lies past
    /// the stop time.
    pub fn next_event(&mut self) -> Option<(Duration, E)> {
        let (at, event) = {
            let mut entry = self.queue.first_entry()?;
            let at = *entry.key();
            if self.stop_at.is_some_and(|stop| at > stop) {
                return None;
            }

            let event = entry.get_mut().pop_front()?;
            if entry.get().is_empty() {
                entry.remove();
            }
            (at, event)
        };

        self.now = at;
        self.fired += 1;
        Some((at, event))
    }

    /// Number of events still queued, including ones past the stop time.
    pub fn pending(&self) -> usize {
        self.queue.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of events dispatched so far.
    pub fn fired(&self) -> u64 {
        self.fired
    }
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

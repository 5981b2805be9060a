//! Deadline-ordered timer queue owned by the compatibility service.
//!
//! The wheel never sleeps on its own. The runtime asks for
//! [`TimerWheel::next_deadline`], sleeps until then and hands the current
//! instant back to the service, which drains [`TimerWheel::pop_expired`].

use std::collections::BTreeMap;
use std::time::Instant;

/// Handle returned by [`TimerWheel::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Timers keyed by `(deadline, sequence)` so equal deadlines fire in
/// scheduling order.
#[derive(Debug)]
pub struct TimerWheel<T> {
    entries: BTreeMap<(Instant, u64), T>,
    next_seq: u64,
}

impl<T> Default for TimerWheel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerWheel<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn schedule(&mut self, at: Instant, payload: T) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert((at, seq), payload);
        TimerId(seq)
    }

    /// Cancels one timer. Returns its payload if it had not fired yet.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let key = self.entries.keys().find(|(_, seq)| *seq == id.0).copied()?;
        self.entries.remove(&key)
    }

    /// Cancels every timer whose payload matches `predicate`; returns how many.
    pub fn cancel_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|_, payload| !predicate(payload));
        before - self.entries.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(at, _)| *at)
    }

    /// Removes and returns every payload due at or before `now`, earliest first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<T> {
        let mut due = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().0 > now {
                break;
            }
            due.push(entry.remove());
        }
        due
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

//! Sequence tracking for superseding async work.

use std::collections::VecDeque;

/// Remembers the most recently scheduled sequences and which one is latest.
///
/// A result is current only if its sequence is the latest one scheduled and
/// it hasn't been consumed or evicted yet.
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    next: u64,
    latest: Option<u64>,
    tracked: VecDeque<u64>,
    capacity: usize,
}

impl SequenceTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            next: 0,
            latest: None,
            tracked: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Allocates the next sequence (starting at 1) and makes it latest.
    pub fn track_next(&mut self) -> u64 {
        self.next += 1;
        let sequence = self.next;
        self.tracked.push_back(sequence);
        while self.tracked.len() > self.capacity {
            self.tracked.pop_front();
        }
        self.latest = Some(sequence);
        sequence
    }

    pub fn is_current(&self, sequence: u64) -> bool {
        self.latest == Some(sequence) && self.tracked.contains(&sequence)
    }

    /// Stops tracking `sequence`; a repeated completion for it is rejected.
    pub fn consume(&mut self, sequence: u64) {
        self.tracked.retain(|&tracked| tracked != sequence);
        if self.latest == Some(sequence) {
            self.latest = None;
        }
    }

    /// Makes every outstanding sequence stale without scheduling anything.
    pub fn invalidate(&mut self) {
        self.next += 1;
        self.latest = None;
    }

    /// How many recent sequences are remembered.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Latest sequence still waiting for its result.
    pub fn latest(&self) -> Option<u64> {
        self.latest
    }

    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }
}

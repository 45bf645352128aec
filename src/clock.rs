//! Logical clock shared by every branch.
//!
//! All commits in a store draw their timestamp from one `TimestampSource`.
//! The values form a total order across branches, which is what makes
//! "as of" reads on a child branch comparable with its parent's history.
//!
//! The clock is owned by the store and injected into the branching and
//! commit components, so tests can swap in a `SequenceClock` and get the
//! same timestamps on every run.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// A commit timestamp.
pub type Timestamp = u64;

/// Source of unique, strictly increasing commit timestamps.
pub trait TimestampSource: Send + Sync + fmt::Debug {
    /// Hand out the next timestamp. Never returns the same value twice.
    fn next(&self) -> Timestamp;

    /// The most recently issued timestamp (or the seed value).
    fn current(&self) -> Timestamp;

    /// Make sure every later `next()` is greater than `timestamp`.
    ///
    /// Used when reopening a persisted store and when a caller commits
    /// with an explicit timestamp.
    fn observe(&self, timestamp: Timestamp);

    /// Take `timestamp` as the next issued value if it is greater than every
    /// timestamp handed out so far. Check and update are one atomic step, so
    /// a concurrent `next()` can never return the same value.
    fn claim(&self, timestamp: Timestamp) -> bool;
}

/// Wall-clock based source: milliseconds since the epoch, bumped by one
/// whenever two calls land in the same millisecond.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn wall_millis() -> Timestamp {
        Utc::now().timestamp_millis().max(0) as Timestamp
    }
}

impl TimestampSource for MonotonicClock {
    fn next(&self) -> Timestamp {
        let now = Self::wall_millis();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }

    fn current(&self) -> Timestamp {
        self.last.load(Ordering::Acquire)
    }

    fn observe(&self, timestamp: Timestamp) {
        self.last.fetch_max(timestamp, Ordering::AcqRel);
    }

    fn claim(&self, timestamp: Timestamp) -> bool {
        self.last.fetch_max(timestamp, Ordering::AcqRel) < timestamp
    }
}

/// Deterministic counter: `start + step`, `start + 2 * step`, ...
#[derive(Debug)]
pub struct SequenceClock {
    last: AtomicU64,
    step: u64,
}

impl SequenceClock {
    /// Counter that starts after `start` and advances by one.
    pub fn new(start: Timestamp) -> Self {
        Self::with_step(start, 1)
    }

    /// Counter that advances by `step` (clamped to at least one).
    pub fn with_step(start: Timestamp, step: u64) -> Self {
        Self {
            last: AtomicU64::new(start),
            step: step.max(1),
        }
    }
}

impl TimestampSource for SequenceClock {
    fn next(&self) -> Timestamp {
        self.last.fetch_add(self.step, Ordering::AcqRel) + self.step
    }

    fn current(&self) -> Timestamp {
        self.last.load(Ordering::Acquire)
    }

    fn observe(&self, timestamp: Timestamp) {
        self.last.fetch_max(timestamp, Ordering::AcqRel);
    }

    fn claim(&self, timestamp: Timestamp) -> bool {
        self.last.fetch_max(timestamp, Ordering::AcqRel) < timestamp
    }
}

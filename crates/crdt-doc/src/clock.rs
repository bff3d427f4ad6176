//! Lamport clock for ordering document writes.
//!
//! Every write in a [`Document`](crate::Document) carries a [`Stamp`]. A stamp
//! is a logical counter plus the actor that produced it, which gives a total
//! order across replicas without any physical time source:
//!
//! - counters grow on every local write
//! - observing a remote stamp moves the local counter past it
//! - equal counters are ordered by actor id
//!
//! # Example
//!
//! ```
//! use crdt_doc::clock::{LamportClock, Stamp};
//!
//! let mut clock = LamportClock::new("a");
//! let s1 = clock.tick();
//! let s2 = clock.tick();
//! assert!(s2 > s1);
//!
//! // A write seen from a replica that is further ahead
//! clock.observe(&Stamp::new(10, "b"));
//! assert!(clock.tick() > Stamp::new(10, "b"));
//! ```

use core::cmp;

use serde::{Deserialize, Serialize};

/// A logical timestamp attached to a single write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
    /// Logical counter.
    pub counter: u64,
    /// Actor that produced the write; breaks ties between equal counters.
    pub actor: String,
}

impl Stamp {
    /// Create a stamp.
    pub fn new(counter: u64, actor: impl Into<String>) -> Self {
        Self {
            counter,
            actor: actor.into(),
        }
    }
}

impl Ord for Stamp {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.actor.cmp(&other.actor))
    }
}

impl PartialOrd for Stamp {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A Lamport clock owned by a single replica.
///
/// Call [`tick`](LamportClock::tick) for every local write and
/// [`observe`](LamportClock::observe) for every remote write that is merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LamportClock {
    actor: String,
    counter: u64,
}

impl LamportClock {
    /// Create a clock for the given actor, starting at zero.
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            counter: 0,
        }
    }

    /// Produce a stamp for a local write.
    ///
    /// The returned stamp is strictly greater than every stamp this clock
    /// has produced or observed.
    pub fn tick(&mut self) -> Stamp {
        self.counter += 1;
        Stamp::new(self.counter, self.actor.clone())
    }

    /// Advance past a stamp received from another replica.
    pub fn observe(&mut self, remote: &Stamp) {
        self.counter = cmp::max(self.counter, remote.counter);
    }

    /// Current counter value.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Actor this clock stamps writes with.
    pub fn actor(&self) -> &str {
        &self.actor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_monotonic() {
        let mut clock = LamportClock::new("a");

        let s1 = clock.tick();
        let s2 = clock.tick();
        let s3 = clock.tick();

        assert!(s1 < s2);
        assert!(s2 < s3);
        assert_eq!(s1.counter, 1);
        assert_eq!(s3.counter, 3);
    }

    #[test]
    fn observe_moves_past_remote() {
        let mut clock = LamportClock::new("a");
        clock.tick();

        let remote = Stamp::new(7, "b");
        clock.observe(&remote);

        let next = clock.tick();
        assert!(next > remote);
        assert_eq!(next.counter, 8);
    }

    #[test]
    fn observe_older_stamp_keeps_counter() {
        let mut clock = LamportClock::new("a");
        for _ in 0..5 {
            clock.tick();
        }

        clock.observe(&Stamp::new(2, "b"));
        assert_eq!(clock.counter(), 5);
    }

    #[test]
    fn ordering_is_total() {
        let a = Stamp::new(3, "a");
        let b = Stamp::new(3, "b");
        let c = Stamp::new(4, "a");

        assert!(a < b); // same counter, actor tiebreak
        assert!(b < c); // counter takes precedence over actor
        assert!(a < c);
    }
}

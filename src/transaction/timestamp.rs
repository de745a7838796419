//! Transaction timestamps.
//!
//! A timestamp is one 64-bit word: the low bit is the *committed* flag,
//! the high 63 bits a monotonically assigned counter. While a
//! transaction is in flight its writes carry `(transaction_id,
//! committed=false)`; commit promotes them to `(commit_time,
//! committed=true)` with a single compare-and-swap of the word, so
//! readers inspecting the commit bit observe the transition atomically.

use std::fmt;

/// One timestamp word.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// `(time = 0, committed = true)`: the "still alive" end timestamp.
    pub const INFINITY: Timestamp = Timestamp(1);

    /// Committed stamp carrying `time` in the counter bits.
    pub const fn committed(time: u64) -> Self {
        Timestamp(time << 1 | 1)
    }

    /// Uncommitted stamp carrying the owning transaction's id.
    pub const fn uncommitted(transaction_id: u64) -> Self {
        Timestamp(transaction_id << 1)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Timestamp(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The counter bits: commit time for committed stamps, transaction
    /// id for uncommitted ones.
    pub const fn time(self) -> u64 {
        self.0 >> 1
    }

    pub const fn is_committed(self) -> bool {
        self.0 & 1 == 1
    }

    pub const fn is_infinity(self) -> bool {
        self.0 == Self::INFINITY.0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinity() {
            write!(f, "Timestamp(inf)")
        } else if self.is_committed() {
            write!(f, "Timestamp(committed {})", self.time())
        } else {
            write!(f, "Timestamp(txn {})", self.time())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_bit_is_low_bit() {
        let ts = Timestamp::committed(9);
        assert!(ts.is_committed());
        assert_eq!(ts.time(), 9);

        let pending = Timestamp::uncommitted(9);
        assert!(!pending.is_committed());
        assert_eq!(pending.time(), 9);

        // Same counter, different words.
        assert_ne!(ts, pending);
    }

    #[test]
    fn infinity_is_committed_time_zero() {
        assert!(Timestamp::INFINITY.is_committed());
        assert_eq!(Timestamp::INFINITY.time(), 0);
        assert_eq!(Timestamp::committed(0), Timestamp::INFINITY);
    }

    #[test]
    fn raw_round_trip() {
        let ts = Timestamp::committed(123_456);
        assert_eq!(Timestamp::from_raw(ts.raw()), ts);
    }
}

use std::time::{Duration, Instant};

use lazy_static::lazy_static;

lazy_static! {
    /// The point all timestamps of this process are measured from.
    static ref ORIGIN: Instant = Instant::now();
}

/// A monotonic timestamp in nanoseconds, attached to messages when they are
/// built or parsed.
///
/// Timestamps of one process are comparable with each other, which is what
/// latency assertions between a stimulus and the resulting event need.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Timestamp(u64);

impl Timestamp {
    /// Takes a timestamp of the current instant.
    pub fn now() -> Self {
        Self::from_instant(Instant::now())
    }

    /// Converts an [`Instant`] into a timestamp. Instants earlier than the
    /// first timestamp ever taken saturate to zero.
    pub fn from_instant(instant: Instant) -> Self {
        let nanos = instant.saturating_duration_since(*ORIGIN).as_nanos();
        Self(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Nanoseconds since the process-wide origin.
    pub fn as_nanos(self) -> u64 {
        self.0
    }

    /// Time elapsed between `earlier` and `self`, zero if `earlier` is later.
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

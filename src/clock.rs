use crate::entry::Timespec;
use lazy_static::lazy_static;
use std::time::Instant;

lazy_static! {
    /// Shared time base for every producer in the process. Merge ordering
    /// compares timestamps across producers, so they must all measure from
    /// the same epoch.
    static ref EPOCH: Instant = Instant::now();
}

/// Current monotonic time relative to the process epoch.
#[inline]
pub fn now() -> Timespec {
    let elapsed = EPOCH.elapsed();
    Timespec {
        sec: elapsed.as_secs() as i64,
        nsec: elapsed.subsec_nanos() as i64,
    }
}

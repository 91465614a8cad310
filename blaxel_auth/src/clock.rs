//! Time sources used when judging token freshness
//!
//! Freshness is computed against an [`aliri_clock::Clock`] so that tests can
//! move time forward without sleeping.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

pub use aliri_clock::{Clock, System, UnixTime};

/// A manually driven clock
///
/// Unlike [`aliri_clock::TestClock`], clones share the same underlying time,
/// so a test can keep one handle while a strategy under test holds another.
#[derive(Clone, Debug, Default)]
pub struct SharedTestClock(Arc<AtomicU64>);

impl SharedTestClock {
    /// Creates a new test clock with the specified time
    pub fn new(time: UnixTime) -> Self {
        Self(Arc::new(AtomicU64::new(time.0)))
    }

    /// Updates the clock's current time to `val`
    pub fn set(&self, val: UnixTime) {
        self.0.store(val.0, Ordering::SeqCst);
    }

    /// Increments the clock's current time by `inc` seconds
    pub fn inc(&self, inc: u64) {
        self.0.fetch_add(inc, Ordering::SeqCst);
    }
}

impl Clock for SharedTestClock {
    #[inline]
    fn now(&self) -> UnixTime {
        UnixTime(self.0.load(Ordering::SeqCst))
    }
}

//! Wall-clock capability.
//!
//! The staleness gate and the dispatch epochs both read time through this
//! trait so tests can drive it.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current epoch in integer seconds.
pub trait Clock: Send + Sync {
    fn now_epoch(&self) -> i64;
}

/// System time clock used outside of tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_secs() as i64,
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
pub(crate) struct ManualClock(std::sync::atomic::AtomicI64);

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new(epoch: i64) -> Self {
        Self(std::sync::atomic::AtomicI64::new(epoch))
    }

    #[allow(dead_code)]
    pub(crate) fn set(&self, epoch: i64) {
        self.0.store(epoch, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_epoch(&self) -> i64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

//! Injectable wall-clock source.
//!
//! All timing decisions in the scheduler, cache, and state machine go
//! through a `Clock` instead of calling `Utc::now()` directly, so tests can
//! freeze time at sub-second granularity (spec's "Time source" note).

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that can be frozen and advanced manually, for deterministic
/// scheduler/cache tests.
#[derive(Clone)]
pub struct FrozenClock {
    millis: Arc<AtomicI64>,
}

impl FrozenClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(now.timestamp_millis())),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        self.millis
            .fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.millis.store(now.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for FrozenClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        DateTime::from_timestamp_millis(millis).expect("frozen clock millis always in range")
    }
}

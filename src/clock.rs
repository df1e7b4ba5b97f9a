use std::sync::atomic::{AtomicU64, Ordering};

/// Source of wall-clock time for signature expiry.
pub trait Clock: Send + Sync {
    fn now_epoch_secs(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;
impl Clock for SystemClock {
    fn now_epoch_secs(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}
impl ManualClock {
    pub fn new(now_epoch_secs: u64) -> Self {
        Self {
            now: AtomicU64::new(now_epoch_secs),
        }
    }

    pub fn set(&self, now_epoch_secs: u64) {
        self.now.store(now_epoch_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}
impl Clock for ManualClock {
    fn now_epoch_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

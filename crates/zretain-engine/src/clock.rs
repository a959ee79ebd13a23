//! Time source for snapshot names

/// Wall clock in whole unix seconds
pub trait Clock: Send + Sync {
    fn now_unix_seconds(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_seconds(&self) -> u64 {
        // Clamp clocks set before 1970
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }
}

/// Always returns the same instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_unix_seconds(&self) -> u64 {
        self.0
    }
}

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock abstraction for the control cycle.
///
/// - now_millis(): current time as epoch milliseconds
/// - minutes_since(): helper to compute elapsed minutes from an epoch-millis
///   reference, saturating at 0 on underflow
pub trait Clock {
    fn now_millis(&self) -> i64;

    /// Minutes elapsed since `epoch_millis`, saturating at 0 on underflow.
    fn minutes_since(&self, epoch_millis: i64) -> f64 {
        let dt = self.now_millis().saturating_sub(epoch_millis).max(0);
        (dt as f64) / 60_000.0
    }
}

/// Default real-time clock backed by std::time::SystemTime.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

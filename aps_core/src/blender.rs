//! Rate-limited blending of scalar candidates.
//!
//! `RateLimitedBlender` is a stateful primitive: each output may differ from
//! the previous output by at most
//! `min(max_step_pct_per_loop, max_step_pct_per_hour * elapsed_hours)`
//! relative change. The `(last_value, last_millis)` pair is plain mutable
//! state; a single exclusive caller per cycle is assumed (see the
//! concurrency notes on `LoopEngine`).

use crate::config::BlenderCfg;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Stateful rate limiter over a scalar signal.
#[derive(Debug, Clone)]
pub struct RateLimitedBlender {
    cfg: BlenderCfg,
    last: Option<(f64, i64)>,
}

impl RateLimitedBlender {
    pub fn new(cfg: BlenderCfg) -> Self {
        Self { cfg, last: None }
    }

    /// Last emitted value, if any.
    pub fn last_value(&self) -> Option<f64> {
        self.last.map(|(v, _)| v)
    }

    /// Move toward `target`, bounded by the per-loop and per-hour limits.
    ///
    /// The first call has no prior state and returns `target` unclamped,
    /// seeding the limiter.
    pub fn step(&mut self, target: f64, now_millis: i64) -> f64 {
        let out = match self.last {
            None => target,
            Some((last, last_millis)) => {
                let elapsed_h =
                    (now_millis.saturating_sub(last_millis).max(0) as f64) / MILLIS_PER_HOUR;
                let allowed_pct = self
                    .cfg
                    .max_step_pct_per_loop
                    .min(self.cfg.max_step_pct_per_hour * elapsed_h)
                    .max(0.0);
                let bound = last.abs() * allowed_pct;
                target.clamp(last - bound, last + bound)
            }
        };
        self.last = Some((out, now_millis));
        out
    }
}

/// Trust-weighted blend of a fast and a slow ISF signal, rate-limited.
#[derive(Debug, Clone)]
pub struct IsfBlender {
    inner: RateLimitedBlender,
}

impl IsfBlender {
    pub fn new(cfg: BlenderCfg) -> Self {
        Self {
            inner: RateLimitedBlender::new(cfg),
        }
    }

    /// `target = trust * fast + (1 - trust) * slow`, then rate-limited.
    ///
    /// On the first call the limiter is unseeded, so the blended target is
    /// returned unclamped.
    pub fn blend(&mut self, slow: f64, fast: f64, trust: f64, now_millis: i64) -> f64 {
        let trust = trust.clamp(0.0, 1.0);
        let target = trust * fast + (1.0 - trust) * slow;
        self.inner.step(target, now_millis)
    }
}

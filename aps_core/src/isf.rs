//! Insulin-sensitivity fusion.
//!
//! Three ISF candidates (profile, TDD-derived, PK/PD-derived) are fused by
//! median selection, clamped to a band around the TDD value, then smoothed
//! through the rate-limited blender so the effective sensitivity never
//! jumps between cycles.

use crate::audit::{AuditEvent, AuditTrail};
use crate::blender::RateLimitedBlender;
use crate::config::IsfFusionCfg;

/// Classic 1800-rule sensitivity from total daily dose.
pub fn tdd_isf(tdd_24h_u: f64) -> f64 {
    1800.0 / tdd_24h_u.max(10.0)
}

/// Median of three values.
fn median3(a: f64, b: f64, c: f64) -> f64 {
    let mut v = [a, b, c];
    v.sort_unstable_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    v[1]
}

/// Stateful ISF fusion; one instance lives across cycles.
#[derive(Debug, Clone)]
pub struct IsfFusion {
    cfg: IsfFusionCfg,
    blender: RateLimitedBlender,
}

impl IsfFusion {
    pub fn new(cfg: IsfFusionCfg) -> Self {
        let blender = RateLimitedBlender::new(cfg.blender);
        Self { cfg, blender }
    }

    /// Fuse the three candidates into one smoothed ISF.
    pub fn fuse(
        &mut self,
        profile_isf: f64,
        tdd_isf: f64,
        pkpd_isf: f64,
        now_millis: i64,
        trail: &mut AuditTrail,
    ) -> f64 {
        let median = median3(profile_isf, tdd_isf, pkpd_isf);
        trail.push(AuditEvent::Stage {
            tag: "isf median",
            value: median,
        });

        let lo = tdd_isf * self.cfg.tdd_clamp_min_factor;
        let hi = tdd_isf * self.cfg.tdd_clamp_max_factor;
        let banded = median.clamp(lo, hi);
        if banded != median {
            trail.push(AuditEvent::Clamped {
                field: "isf.tdd_band",
                from: median,
                to: banded,
            });
        }

        let fused = self.blender.step(banded, now_millis);
        trail.push(AuditEvent::Stage {
            tag: "isf fused",
            value: fused,
        });
        fused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlenderCfg;

    fn fusion() -> IsfFusion {
        IsfFusion::new(IsfFusionCfg {
            tdd_clamp_min_factor: 0.7,
            tdd_clamp_max_factor: 1.3,
            blender: BlenderCfg {
                max_step_pct_per_loop: 0.2,
                max_step_pct_per_hour: 0.3,
            },
        })
    }

    #[test]
    fn median_picks_the_middle_candidate() {
        assert_eq!(median3(40.0, 50.0, 60.0), 50.0);
        assert_eq!(median3(60.0, 40.0, 50.0), 50.0);
        assert_eq!(median3(50.0, 50.0, 90.0), 50.0);
    }

    #[test]
    fn first_fuse_returns_the_banded_median() {
        let mut f = fusion();
        let mut trail = AuditTrail::new();
        // tdd isf 45; band [31.5, 58.5]; median of (50, 45, 44) is 45.
        let out = f.fuse(50.0, 45.0, 44.0, 0, &mut trail);
        assert_eq!(out, 45.0);
    }

    #[test]
    fn outlier_median_is_clamped_to_tdd_band() {
        let mut f = fusion();
        let mut trail = AuditTrail::new();
        // Candidates (90, 45, 95): median 90, band top 58.5.
        let out = f.fuse(90.0, 45.0, 95.0, 0, &mut trail);
        assert!((out - 58.5).abs() < 1e-9);
        assert!(trail.any(|e| matches!(e, AuditEvent::Clamped { field: "isf.tdd_band", .. })));
    }

    #[test]
    fn consecutive_cycles_are_rate_limited() {
        let mut f = fusion();
        let mut trail = AuditTrail::new();
        let first = f.fuse(50.0, 50.0, 50.0, 0, &mut trail);
        assert_eq!(first, 50.0);
        // Five minutes later: hourly limit allows 30% * 1/12 = 2.5%.
        let second = f.fuse(80.0, 80.0, 80.0, 300_000, &mut trail);
        assert!((second - 51.25).abs() < 1e-9);
    }

    #[test]
    fn tdd_isf_guards_small_tdd() {
        assert_eq!(tdd_isf(36.0), 50.0);
        assert_eq!(tdd_isf(0.0), 180.0);
    }
}

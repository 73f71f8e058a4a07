//! Adaptive temporary-basal state machine.
//!
//! States are evaluated in priority order, first match wins, no
//! fall-through: hypo guard, profile-basal-zero, micro-resume, plateau
//! kicker, anti-stall bias, no action. Every branch that changes the rate
//! sets a reason string beginning with a stable tag; downstream audits and
//! tests depend on that prefix contract.

use crate::audit::{AuditEvent, AuditTrail};
use crate::config::BasalCfg;
use crate::types::{BasalPlan, LoopContext};

#[derive(Debug, Clone)]
pub struct BasalDecisionEngine {
    cfg: BasalCfg,
    /// Start of the currently running zero-temp, if one was issued.
    zero_temp_since_millis: Option<i64>,
}

impl BasalDecisionEngine {
    pub fn new(cfg: BasalCfg) -> Self {
        Self {
            cfg,
            zero_temp_since_millis: None,
        }
    }

    /// Record a zero temp issued outside this state machine (engine-level
    /// hypo dominance, fail-closed cycles) so micro-resume can fire once
    /// the suspension ends. Keeps the earliest start if one is running.
    pub fn note_zero_temp(&mut self, now_millis: i64) {
        if self.zero_temp_since_millis.is_none() {
            self.zero_temp_since_millis = Some(now_millis);
        }
    }

    /// Minutes the current zero-temp has been active, if any.
    fn stall_minutes(&self, now_millis: i64) -> Option<f64> {
        self.zero_temp_since_millis
            .map(|since| (now_millis.saturating_sub(since).max(0) as f64) / 60_000.0)
    }

    /// Evaluate the state machine for one cycle.
    pub fn decide(&mut self, ctx: &LoopContext, trail: &mut AuditTrail) -> Option<BasalPlan> {
        let bg = ctx.bg.mgdl;
        let profile_basal = ctx.profile.basal_uph;
        let now = ctx.now_epoch_millis;

        // 1. Hypo guard: terminal for the cycle.
        if bg < ctx.profile.hypo_guard_mgdl {
            if self.zero_temp_since_millis.is_none() {
                self.zero_temp_since_millis = Some(now);
            }
            tracing::debug!(bg, guard = ctx.profile.hypo_guard_mgdl, "basal: hypo guard");
            return Some(BasalPlan {
                rate_uph: 0.0,
                duration_min: self.cfg.hypo_duration_min,
                reason: format!(
                    "Hypo guard: bg {bg:.0} below {:.0}, zero temp",
                    ctx.profile.hypo_guard_mgdl
                ),
            });
        }

        // 2. Profile basal of zero leaves nothing to modulate.
        if profile_basal <= 0.0 {
            trail.push(AuditEvent::Note {
                tag: "basal",
                detail: "profile basal = 0".to_string(),
            });
            return None;
        }

        // 3. Micro-resume after a sufficiently long zero-temp stall.
        if let Some(stall_min) = self.stall_minutes(now) {
            if stall_min >= self.cfg.min_stall_min {
                self.zero_temp_since_millis = None;
                let rate = self
                    .cfg
                    .resume_floor_uph
                    .max(profile_basal * self.cfg.resume_fraction + self.cfg.resume_adjust_uph);
                let duration = stall_min.clamp(10.0, 30.0) as u32;
                tracing::debug!(stall_min, rate, "basal: micro-resume");
                return Some(BasalPlan {
                    rate_uph: rate,
                    duration_min: duration,
                    reason: format!("Micro-resume: zero temp {stall_min:.0}min, easing back in"),
                });
            }
        }

        let flat = ctx.bg.short_avg_delta.abs() <= self.cfg.flat_band_mgdl
            && ctx.bg.long_avg_delta.abs() <= self.cfg.flat_band_mgdl;
        let reliable = ctx.bg.r2 >= self.cfg.r2_min;

        // 4. Plateau kicker: a reliably flat curve stuck high.
        if bg > self.cfg.high_bg_mgdl && flat && reliable {
            let rate = profile_basal * self.cfg.plateau_kicker_factor;
            tracing::debug!(bg, rate, "basal: plateau kicker");
            return Some(BasalPlan {
                rate_uph: rate,
                duration_min: self.cfg.temp_duration_min,
                reason: format!(
                    "plateau kicker: bg {bg:.0} flat (r2 {:.2}), basal x{:.2}",
                    ctx.bg.r2, self.cfg.plateau_kicker_factor
                ),
            });
        }

        // 5. Anti-stall bias: glued curve, high, and not resolving.
        if bg > self.cfg.high_bg_mgdl
            && reliable
            && ctx.bg.long_avg_delta > self.cfg.resolving_delta_mgdl
        {
            let rate = profile_basal * self.cfg.anti_stall_factor;
            tracing::debug!(bg, rate, "basal: anti-stall bias");
            return Some(BasalPlan {
                rate_uph: rate,
                duration_min: self.cfg.temp_duration_min,
                reason: format!(
                    "anti-stall bias: bg {bg:.0} not resolving (long delta {:.1})",
                    ctx.bg.long_avg_delta
                ),
            });
        }

        // 6. Default: profile basal unchanged.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BgSnapshot, LoopProfile, ModeState, PumpCaps};

    fn ctx(bg: f64, now_millis: i64) -> LoopContext {
        LoopContext {
            bg: BgSnapshot {
                mgdl: bg,
                delta5: 0.0,
                short_avg_delta: 0.0,
                long_avg_delta: 0.0,
                accel: 0.0,
                r2: 0.95,
                combined_delta: 0.0,
                epoch_millis: now_millis,
            },
            iob_u: 1.0,
            cob_g: 0.0,
            profile: LoopProfile {
                target_mgdl: 100.0,
                isf_mgdl_per_u: 50.0,
                basal_uph: 1.0,
                hypo_guard_mgdl: 72.0,
            },
            pump: PumpCaps {
                basal_step_uph: 0.05,
                bolus_step_u: 0.05,
                min_duration_min: 30,
                max_basal_uph: 4.0,
                max_smb_u: 2.0,
            },
            modes: ModeState::default(),
            tdd_24h_u: 40.0,
            eventual_bg_mgdl: bg,
            predicted_bg_mgdl: bg,
            now_epoch_millis: now_millis,
            last_bolus_epoch_millis: None,
            kalman_isf: None,
            kalman_trust: 0.0,
            max_iob_u: 4.0,
            adjusters: Vec::new(),
        }
    }

    #[test]
    fn hypo_guard_is_terminal() {
        let mut engine = BasalDecisionEngine::new(BasalCfg::default());
        let mut trail = AuditTrail::new();
        let plan = engine.decide(&ctx(70.0, 0), &mut trail).unwrap();
        assert_eq!(plan.rate_uph, 0.0);
        assert_eq!(plan.duration_min, 30);
        assert!(plan.reason.starts_with("Hypo guard"));
    }

    #[test]
    fn zero_profile_basal_yields_no_action() {
        let mut engine = BasalDecisionEngine::new(BasalCfg::default());
        let mut trail = AuditTrail::new();
        let mut c = ctx(120.0, 0);
        c.profile.basal_uph = 0.0;
        assert!(engine.decide(&c, &mut trail).is_none());
        assert!(trail.any(|e| matches!(
            e,
            AuditEvent::Note { tag: "basal", detail } if detail == "profile basal = 0"
        )));
    }

    #[test]
    fn micro_resume_after_stalled_zero_temp() {
        let mut engine = BasalDecisionEngine::new(BasalCfg::default());
        let mut trail = AuditTrail::new();
        // Hypo cycle starts the zero-temp clock.
        assert!(engine.decide(&ctx(65.0, 0), &mut trail).is_some());
        // Recovered 15 minutes later; BG flat but not high.
        let plan = engine
            .decide(&ctx(100.0, 15 * 60_000), &mut trail)
            .unwrap();
        assert!(plan.reason.starts_with("Micro-resume"));
        // max(0.2, 1.0*0.25 + 0.05) = 0.3
        assert!((plan.rate_uph - 0.3).abs() < 1e-9);
        assert_eq!(plan.duration_min, 15);
    }

    #[test]
    fn noted_zero_temp_arms_micro_resume() {
        let mut engine = BasalDecisionEngine::new(BasalCfg::default());
        let mut trail = AuditTrail::new();
        // Zero temp issued elsewhere (engine-level hypo dominance).
        engine.note_zero_temp(0);
        let plan = engine
            .decide(&ctx(100.0, 12 * 60_000), &mut trail)
            .unwrap();
        assert!(plan.reason.starts_with("Micro-resume"));
        assert!((plan.rate_uph - 0.3).abs() < 1e-9);
    }

    #[test]
    fn no_micro_resume_before_min_stall() {
        let mut engine = BasalDecisionEngine::new(BasalCfg::default());
        let mut trail = AuditTrail::new();
        engine.decide(&ctx(65.0, 0), &mut trail);
        assert!(engine.decide(&ctx(100.0, 5 * 60_000), &mut trail).is_none());
    }

    #[test]
    fn plateau_kicker_on_flat_reliable_high() {
        let mut engine = BasalDecisionEngine::new(BasalCfg::default());
        let mut trail = AuditTrail::new();
        let plan = engine.decide(&ctx(170.0, 0), &mut trail).unwrap();
        assert!(plan.reason.starts_with("plateau kicker"));
        assert!((plan.rate_uph - 1.5).abs() < 1e-9);
    }

    #[test]
    fn anti_stall_when_high_but_not_flat() {
        let mut engine = BasalDecisionEngine::new(BasalCfg::default());
        let mut trail = AuditTrail::new();
        let mut c = ctx(170.0, 0);
        c.bg.short_avg_delta = 2.0; // not flat, so no plateau kicker
        c.bg.long_avg_delta = 0.2; // not resolving
        let plan = engine.decide(&c, &mut trail).unwrap();
        assert!(plan.reason.starts_with("anti-stall bias"));
        assert!((plan.rate_uph - 1.2).abs() < 1e-9);
    }

    #[test]
    fn resolving_high_gets_no_action() {
        let mut engine = BasalDecisionEngine::new(BasalCfg::default());
        let mut trail = AuditTrail::new();
        let mut c = ctx(170.0, 0);
        c.bg.short_avg_delta = -3.0;
        c.bg.long_avg_delta = -2.0; // clearly resolving
        assert!(engine.decide(&c, &mut trail).is_none());
    }

    #[test]
    fn noisy_curve_blocks_plateau_and_anti_stall() {
        let mut engine = BasalDecisionEngine::new(BasalCfg::default());
        let mut trail = AuditTrail::new();
        let mut c = ctx(170.0, 0);
        c.bg.r2 = 0.3;
        assert!(engine.decide(&c, &mut trail).is_none());
    }
}

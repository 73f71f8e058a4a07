//! Per-cycle data model: inputs, plans, and the terminal `Decision`.
//!
//! `LoopContext` is the sole input to the core and is immutable for the
//! duration of a cycle. Non-finite or out-of-domain inputs are clamped by
//! `sanitize` with `Clamped` audit events; the clamp is never silent.

use crate::audit::{AuditEvent, AuditTrail};

/// One glucose observation and its local trend fit.
#[derive(Debug, Clone, Copy)]
pub struct BgSnapshot {
    pub mgdl: f64,
    /// BG change over the last 5 minutes (mg/dL).
    pub delta5: f64,
    pub short_avg_delta: f64,
    pub long_avg_delta: f64,
    pub accel: f64,
    /// Trend-fit quality in [0, 1]; high means the curve is reliable.
    pub r2: f64,
    pub combined_delta: f64,
    pub epoch_millis: i64,
}

/// Static-per-cycle dosing parameters.
#[derive(Debug, Clone, Copy)]
pub struct LoopProfile {
    pub target_mgdl: f64,
    pub isf_mgdl_per_u: f64,
    pub basal_uph: f64,
    /// Absolute low-BG threshold below which all dosing is forced to zero.
    pub hypo_guard_mgdl: f64,
}

/// Pump hardware feasibility limits.
#[derive(Debug, Clone, Copy)]
pub struct PumpCaps {
    pub basal_step_uph: f64,
    pub bolus_step_u: f64,
    pub min_duration_min: u32,
    pub max_basal_uph: f64,
    pub max_smb_u: f64,
}

/// Active behavioral modes, produced by an external mode engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeState {
    pub meal: bool,
    pub breakfast: bool,
    pub lunch: bool,
    pub dinner: bool,
    pub high_carb: bool,
    pub snack: bool,
    pub sleep: bool,
    pub autodrive: bool,
    pub exercise: bool,
    /// Suspected slow-absorbing (late fat) meal.
    pub late_fat_meal: bool,
    /// Explicit user-triggered dose; bypasses the zone table.
    pub manual_dose: bool,
}

impl ModeState {
    /// Any meal-related flag.
    pub fn any_meal(&self) -> bool {
        self.meal || self.breakfast || self.lunch || self.dinner || self.high_carb || self.snack
    }
}

/// One external context adjuster's contribution for this cycle.
///
/// Adjusters (activity, cycle-phase, reactivity, ...) are opaque to the
/// core; each is consumed as plain multipliers plus a label for the audit.
#[derive(Debug, Clone)]
pub struct ContextAdjustment {
    pub basal_mult: f64,
    pub isf_mult: f64,
    pub smb_mult: f64,
    pub label: String,
}

/// Full per-cycle input bundle. Constructed once per cycle; immutable.
#[derive(Debug, Clone)]
pub struct LoopContext {
    pub bg: BgSnapshot,
    pub iob_u: f64,
    pub cob_g: f64,
    pub profile: LoopProfile,
    pub pump: PumpCaps,
    pub modes: ModeState,
    pub tdd_24h_u: f64,
    /// Model-predicted eventual BG (end of insulin action).
    pub eventual_bg_mgdl: f64,
    /// Short-horizon predicted BG.
    pub predicted_bg_mgdl: f64,
    pub now_epoch_millis: i64,
    pub last_bolus_epoch_millis: Option<i64>,
    /// Fast (Kalman-filtered) ISF signal, if a filter is running.
    pub kalman_isf: Option<f64>,
    /// Trust weight in [0, 1] for the fast ISF signal.
    pub kalman_trust: f64,
    /// IOB ceiling for SMB dosing; 0 disables the ceiling.
    pub max_iob_u: f64,
    pub adjusters: Vec<ContextAdjustment>,
}

/// Insulin activity phase at the current time since last bolus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityStage {
    Rising,
    Peak,
    Tail,
}

/// Fused pharmacology state, recomputed each cycle.
#[derive(Debug, Clone, Copy)]
pub struct PkPdSnapshot {
    pub dia_min: f64,
    pub peak_min: f64,
    pub fused_isf: f64,
    /// Proportion of active insulin in its low-activity decay tail.
    pub tail_fraction: f64,
    pub stage: ActivityStage,
    /// Current activity relative to peak activity, in [0, 1].
    pub relative_activity: f64,
    /// Fraction of the action window already elapsed, in [0, 1].
    pub post_window_fraction: f64,
}

/// Proposed temporary basal.
#[derive(Debug, Clone)]
pub struct BasalPlan {
    pub rate_uph: f64,
    pub duration_min: u32,
    /// Begins with a stable tag ("Hypo guard", "Micro-resume", ...).
    pub reason: String,
}

/// Proposed micro-bolus.
#[derive(Debug, Clone)]
pub struct SmbPlan {
    pub units: f64,
    pub deliver_at_millis: i64,
    /// Minutes until the next SMB is allowed; 0 means maximum cadence.
    pub next_interval_min: u32,
    pub reason: String,
}

/// Aggregate safety verdict; produced last, may veto prior plans.
#[derive(Debug, Clone, Default)]
pub struct SafetyReport {
    pub hypo_blocked: bool,
    pub notes: Vec<String>,
}

/// Final cycle output. Never mutated after being handed to actuator ports.
#[derive(Debug, Clone)]
pub struct Decision {
    pub basal: Option<BasalPlan>,
    pub smb: Option<SmbPlan>,
    pub safety: SafetyReport,
    pub trail: AuditTrail,
    pub computed_at_millis: i64,
    /// Decisions are cycle-bound; actuation past this instant is refused.
    pub expires_at_millis: i64,
}

/// Clamp a single scalar to a finite value in `[lo, hi]`, recording the
/// correction in the trail when anything changed.
fn clamp_finite(value: f64, lo: f64, hi: f64, field: &'static str, trail: &mut AuditTrail) -> f64 {
    let repaired = if value.is_finite() { value } else { lo };
    let clamped = repaired.clamp(lo, hi);
    if clamped != value {
        trail.push(AuditEvent::Clamped {
            field,
            from: value,
            to: clamped,
        });
        tracing::warn!(field, from = value, to = clamped, "input clamped");
    }
    clamped
}

/// Sanitize a context in place, recording every correction.
///
/// Returns `false` when the hypo-guard comparison cannot be evaluated at
/// all (no finite BG anywhere); the caller must then fail closed.
pub fn sanitize(ctx: &mut LoopContext, trail: &mut AuditTrail) -> bool {
    let bg_evaluable = ctx.bg.mgdl.is_finite()
        || ctx.predicted_bg_mgdl.is_finite()
        || ctx.eventual_bg_mgdl.is_finite();
    if !bg_evaluable {
        trail.push(AuditEvent::Note {
            tag: "fail-closed",
            detail: "hypo guard unevaluable: no finite BG input".to_string(),
        });
        return false;
    }

    // Unknown BG is treated conservatively: clamping a non-finite reading
    // to 0 lands in the Strict Guard zone and below the hypo guard.
    ctx.bg.mgdl = clamp_finite(ctx.bg.mgdl, 0.0, 1000.0, "bg.mgdl", trail);
    ctx.bg.delta5 = clamp_finite(ctx.bg.delta5, -50.0, 50.0, "bg.delta5", trail);
    ctx.bg.short_avg_delta =
        clamp_finite(ctx.bg.short_avg_delta, -50.0, 50.0, "bg.short_avg_delta", trail);
    ctx.bg.long_avg_delta =
        clamp_finite(ctx.bg.long_avg_delta, -50.0, 50.0, "bg.long_avg_delta", trail);
    ctx.bg.accel = clamp_finite(ctx.bg.accel, -20.0, 20.0, "bg.accel", trail);
    ctx.bg.r2 = clamp_finite(ctx.bg.r2, 0.0, 1.0, "bg.r2", trail);
    ctx.bg.combined_delta =
        clamp_finite(ctx.bg.combined_delta, -50.0, 50.0, "bg.combined_delta", trail);

    ctx.iob_u = clamp_finite(ctx.iob_u, 0.0, 50.0, "iob_u", trail);
    ctx.cob_g = clamp_finite(ctx.cob_g, 0.0, 500.0, "cob_g", trail);
    ctx.tdd_24h_u = clamp_finite(ctx.tdd_24h_u, 5.0, 300.0, "tdd_24h_u", trail);

    // Missing predictions fall back to the current reading rather than an
    // optimistic extrapolation.
    if !ctx.predicted_bg_mgdl.is_finite() {
        trail.push(AuditEvent::Clamped {
            field: "predicted_bg_mgdl",
            from: ctx.predicted_bg_mgdl,
            to: ctx.bg.mgdl,
        });
        ctx.predicted_bg_mgdl = ctx.bg.mgdl;
    }
    if !ctx.eventual_bg_mgdl.is_finite() {
        trail.push(AuditEvent::Clamped {
            field: "eventual_bg_mgdl",
            from: ctx.eventual_bg_mgdl,
            to: ctx.bg.mgdl,
        });
        ctx.eventual_bg_mgdl = ctx.bg.mgdl;
    }

    ctx.profile.isf_mgdl_per_u =
        clamp_finite(ctx.profile.isf_mgdl_per_u, 5.0, 500.0, "profile.isf", trail);
    ctx.profile.basal_uph = clamp_finite(ctx.profile.basal_uph, 0.0, 10.0, "profile.basal", trail);
    ctx.kalman_trust = clamp_finite(ctx.kalman_trust, 0.0, 1.0, "kalman_trust", trail);
    ctx.max_iob_u = clamp_finite(ctx.max_iob_u, 0.0, 50.0, "max_iob_u", trail);

    true
}

/// The lowest BG the trajectory touches: current, short-horizon, eventual.
#[inline]
pub fn hypo_floor(ctx: &LoopContext) -> f64 {
    ctx.bg
        .mgdl
        .min(ctx.predicted_bg_mgdl)
        .min(ctx.eventual_bg_mgdl)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nominal() -> LoopContext {
        LoopContext {
            bg: BgSnapshot {
                mgdl: 140.0,
                delta5: 1.0,
                short_avg_delta: 1.0,
                long_avg_delta: 0.5,
                accel: 0.0,
                r2: 0.9,
                combined_delta: 2.0,
                epoch_millis: 0,
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
            eventual_bg_mgdl: 150.0,
            predicted_bg_mgdl: 145.0,
            now_epoch_millis: 0,
            last_bolus_epoch_millis: None,
            kalman_isf: None,
            kalman_trust: 0.0,
            max_iob_u: 4.0,
            adjusters: Vec::new(),
        }
    }

    #[test]
    fn nan_bg_clamps_with_audit() {
        let mut ctx = nominal();
        ctx.bg.mgdl = f64::NAN;
        let mut trail = AuditTrail::new();
        assert!(sanitize(&mut ctx, &mut trail));
        assert_eq!(ctx.bg.mgdl, 0.0);
        assert!(trail.any(|e| matches!(e, AuditEvent::Clamped { field: "bg.mgdl", .. })));
    }

    #[test]
    fn negative_iob_clamps_to_zero() {
        let mut ctx = nominal();
        ctx.iob_u = -2.0;
        let mut trail = AuditTrail::new();
        assert!(sanitize(&mut ctx, &mut trail));
        assert_eq!(ctx.iob_u, 0.0);
    }

    #[test]
    fn all_bg_unevaluable_fails_closed() {
        let mut ctx = nominal();
        ctx.bg.mgdl = f64::NAN;
        ctx.predicted_bg_mgdl = f64::INFINITY;
        ctx.eventual_bg_mgdl = f64::NAN;
        let mut trail = AuditTrail::new();
        assert!(!sanitize(&mut ctx, &mut trail));
    }

    #[test]
    fn hypo_floor_takes_minimum() {
        let mut ctx = nominal();
        ctx.predicted_bg_mgdl = 60.0;
        assert_eq!(hypo_floor(&ctx), 60.0);
    }
}

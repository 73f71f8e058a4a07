//! Multiplicative SMB attenuation.
//!
//! Dosing audits must be able to attribute any reduction to a specific
//! cause, so every multiplier is logged individually whether or not it
//! applied. Multipliers are independent and compose multiplicatively.

use crate::audit::{AuditEvent, AuditTrail, DampingKind};
use crate::config::DampingCfg;
use crate::types::PkPdSnapshot;

/// Outcome of the damping pass.
#[derive(Debug, Clone, Copy)]
pub struct DampingAudit {
    pub units: f64,
    pub meal_bypass: bool,
}

/// Attenuate a raw SMB candidate.
///
/// With `bypass` set the input is returned unchanged and the bypass is
/// recorded. Otherwise the tail multiplier applies only above the
/// configured tail-fraction threshold, scaled back ("relief") by current
/// relative activity and by freshness of the action window; exercise and
/// late-fat-meal multipliers stack on top.
pub fn damp_smb(
    raw_units: f64,
    pkpd: &PkPdSnapshot,
    exercising: bool,
    late_fat_meal: bool,
    bypass: bool,
    cfg: &DampingCfg,
    trail: &mut AuditTrail,
) -> DampingAudit {
    if bypass {
        trail.push(AuditEvent::DampingApplied {
            kind: DampingKind::MealBypass,
            multiplier: 1.0,
            applied: true,
        });
        return DampingAudit {
            units: raw_units,
            meal_bypass: true,
        };
    }

    let tail_mult = if pkpd.tail_fraction > cfg.tail_fraction_threshold {
        let span = (1.0 - cfg.tail_fraction_threshold).max(f64::MIN_POSITIVE);
        let strength = ((pkpd.tail_fraction - cfg.tail_fraction_threshold) / span).clamp(0.0, 1.0);
        let freshness = (1.0 - pkpd.post_window_fraction).clamp(0.0, 1.0);
        let relief = (pkpd.relative_activity * freshness).clamp(0.0, 1.0);
        1.0 - strength * (1.0 - cfg.tail_floor) * (1.0 - relief)
    } else {
        1.0
    };
    trail.push(AuditEvent::DampingApplied {
        kind: DampingKind::Tail,
        multiplier: tail_mult,
        applied: tail_mult < 1.0,
    });

    let exercise_mult = if exercising { cfg.exercise_multiplier } else { 1.0 };
    trail.push(AuditEvent::DampingApplied {
        kind: DampingKind::Exercise,
        multiplier: exercise_mult,
        applied: exercising,
    });

    let meal_mult = if late_fat_meal {
        cfg.late_fat_meal_multiplier
    } else {
        1.0
    };
    trail.push(AuditEvent::DampingApplied {
        kind: DampingKind::LateFatMeal,
        multiplier: meal_mult,
        applied: late_fat_meal,
    });

    DampingAudit {
        units: raw_units * tail_mult * exercise_mult * meal_mult,
        meal_bypass: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActivityStage;

    fn pkpd(tail_fraction: f64, relative_activity: f64, post_window: f64) -> PkPdSnapshot {
        PkPdSnapshot {
            dia_min: 360.0,
            peak_min: 75.0,
            fused_isf: 50.0,
            tail_fraction,
            stage: ActivityStage::Tail,
            relative_activity,
            post_window_fraction: post_window,
        }
    }

    #[test]
    fn bypass_returns_input_unchanged() {
        let mut trail = AuditTrail::new();
        let out = damp_smb(
            0.8,
            &pkpd(0.9, 0.1, 0.9),
            true,
            true,
            true,
            &DampingCfg::default(),
            &mut trail,
        );
        assert_eq!(out.units, 0.8);
        assert!(out.meal_bypass);
        assert!(trail.any(|e| matches!(
            e,
            AuditEvent::DampingApplied {
                kind: DampingKind::MealBypass,
                applied: true,
                ..
            }
        )));
    }

    #[test]
    fn no_damping_below_tail_threshold() {
        let mut trail = AuditTrail::new();
        let out = damp_smb(
            1.0,
            &pkpd(0.3, 0.5, 0.5),
            false,
            false,
            false,
            &DampingCfg::default(),
            &mut trail,
        );
        assert_eq!(out.units, 1.0);
    }

    #[test]
    fn deep_tail_with_no_relief_hits_the_floor() {
        let mut trail = AuditTrail::new();
        // Full tail, no remaining activity, window fully elapsed.
        let out = damp_smb(
            1.0,
            &pkpd(1.0, 0.0, 1.0),
            false,
            false,
            false,
            &DampingCfg::default(),
            &mut trail,
        );
        assert!((out.units - 0.5).abs() < 1e-9);
    }

    #[test]
    fn relief_softens_the_tail_multiplier() {
        let mut trail = AuditTrail::new();
        let damped = damp_smb(
            1.0,
            &pkpd(1.0, 0.0, 1.0),
            false,
            false,
            false,
            &DampingCfg::default(),
            &mut trail,
        )
        .units;
        let relieved = damp_smb(
            1.0,
            &pkpd(1.0, 0.8, 0.2),
            false,
            false,
            false,
            &DampingCfg::default(),
            &mut trail,
        )
        .units;
        assert!(relieved > damped);
    }

    #[test]
    fn multipliers_compose() {
        let mut trail = AuditTrail::new();
        let out = damp_smb(
            1.0,
            &pkpd(0.0, 1.0, 0.0),
            true,
            true,
            false,
            &DampingCfg::default(),
            &mut trail,
        );
        // exercise 0.5 * late-fat-meal 0.7
        assert!((out.units - 0.35).abs() < 1e-9);
        let applied = trail
            .events()
            .iter()
            .filter(|e| matches!(e, AuditEvent::DampingApplied { applied: true, .. }))
            .count();
        assert_eq!(applied, 2);
    }
}
